mod common;
pub use common::*;

use scgroup::backend::uri_join;
use scgroup::writer::{write_obs_or_var, write_x_array};
use scgroup::*;

use nalgebra_sparse::{coo::CooMatrix, csr::CsrMatrix};
use ndarray::{array, Array2};
use polars::prelude::{CategoricalOrdering, DataFrame, DataType, NamedFrom, Series};
use proptest::prelude::*;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

fn strings(xs: &[&str]) -> Vec<String> {
    xs.iter().map(|x| x.to_string()).collect()
}

fn is_error<T: std::fmt::Debug>(
    result: anyhow::Result<T>,
    check: impl Fn(&IngestError) -> bool,
) -> bool {
    match result {
        Ok(_) => false,
        Err(e) => e.downcast_ref::<IngestError>().map_or(false, check),
    }
}

pub fn test_basic<B: Backend>() {
    with_tmp_dir(|dir| {
        let uri = uri_in(&dir, "pbmc");
        let x: ArrayData = array![[1.0f32, 0.0], [0.0, 2.0]].into();
        let dataset = Dataset::new(
            x,
            ["c1", "c2"].into_iter().collect(),
            ["g1", "g2"].into_iter().collect(),
        )
        .unwrap();
        let scgroup = SCGroup::<B>::new(&uri, false, None).unwrap();
        assert_eq!(scgroup.from_anndata(&dataset).unwrap(), uri);

        let store = scgroup.store();
        assert_eq!(member_names::<B>(store, &uri), vec!["X", "obs", "var"]);
        let x_uri = uri_join(&uri, "X");
        assert_eq!(member_names::<B>(store, &x_uri), vec!["data"]);

        let (schema, fragment) = B::read_sparse(store, &uri_join(&x_uri, "data")).unwrap();
        assert!(schema.allows_duplicates);
        assert_eq!(
            x_cells(&fragment),
            vec![
                ("c1".to_string(), "g1".to_string(), 1.0),
                ("c1".to_string(), "g2".to_string(), 0.0),
                ("c2".to_string(), "g1".to_string(), 0.0),
                ("c2".to_string(), "g2".to_string(), 2.0),
            ]
        );

        let (schema, fragment) = B::read_sparse(store, &uri_join(&uri, "obs")).unwrap();
        assert!(!schema.allows_duplicates);
        assert!(schema.attributes.is_empty());
        assert_eq!(
            fragment.coord("obs_id").unwrap().as_string().unwrap().iter().collect::<Vec<_>>(),
            vec!["c1", "c2"]
        );
        assert!(!B::exists(store, &uri_join(&uri, "obsm")).unwrap());
    })
}

/// Every stored matrix has one cell per (observation, variable) pair, and the axis tables
/// one row per label.
pub fn test_ingest<B: Backend>() {
    with_tmp_dir(|dir| {
        let datasets =
            (0usize..8, 0usize..8).prop_flat_map(|(n_obs, n_vars)| dataset_strat(n_obs, n_vars));
        let counter = AtomicUsize::new(0);
        proptest!(ProptestConfig::with_cases(32), |(dataset in datasets)| {
            let i = counter.fetch_add(1, Ordering::SeqCst);
            let uri = uri_in(&dir, &format!("ingest_{}", i));
            let scgroup = SCGroup::<B>::new(&uri, false, None).unwrap();
            scgroup.from_anndata(&dataset).unwrap();
            let store = scgroup.store();
            let x_uri = uri_join(&uri, "X");

            let (_, fragment) = B::read_sparse(store, &uri_join(&x_uri, "data")).unwrap();
            prop_assert_eq!(fragment.len(), dataset.n_obs() * dataset.n_vars());
            prop_assert_eq!(
                x_cells(&fragment),
                expected_cells(dataset.x(), dataset.obs_names().names(), dataset.var_names().names())
            );

            match dataset.raw() {
                Some(raw) => {
                    prop_assert_eq!(member_names::<B>(store, &x_uri), vec!["data", "raw"]);
                    let (_, fragment) = B::read_sparse(store, &uri_join(&x_uri, "raw")).unwrap();
                    prop_assert_eq!(
                        x_cells(&fragment),
                        expected_cells(raw.x(), raw.obs_names().names(), raw.var_names().names())
                    );
                }
                None => prop_assert_eq!(member_names::<B>(store, &x_uri), vec!["data"]),
            }

            let (_, obs) = B::read_sparse(store, &uri_join(&uri, "obs")).unwrap();
            prop_assert_eq!(obs.len(), dataset.n_obs());
            prop_assert_eq!(
                obs.attrs.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
                vec!["n_counts", "cluster"]
            );
            let (_, var) = B::read_sparse(store, &uri_join(&uri, "var")).unwrap();
            prop_assert_eq!(var.len(), dataset.n_vars());

            let mut expected_members = strings(&["X", "obs", "var"]);
            for role in AnnotationRole::ALL {
                let role_uri = uri_join(&uri, role.name());
                let arrays = dataset.annotations(role);
                if arrays.is_empty() {
                    prop_assert!(!B::exists(store, &role_uri).unwrap());
                    continue;
                }
                expected_members.push(role.name().to_string());
                prop_assert_eq!(
                    member_names::<B>(store, &role_uri),
                    arrays.keys().cloned().collect::<Vec<_>>()
                );
                for (name, data) in arrays {
                    let stored = B::read_dense(store, &uri_join(&role_uri, name)).unwrap();
                    prop_assert_eq!(stored, data.to_dense().unwrap());
                }
            }
            prop_assert_eq!(member_names::<B>(store, &uri), expected_members);
        });
    })
}

/// Categorical values are stored as their category strings.
pub fn test_categorical<B: Backend>() {
    with_tmp_dir(|dir| {
        let uri = uri_in(&dir, "categorical");
        let cell_type = Series::new("cell_type", &["T", "B", "T"])
            .cast(&DataType::Categorical(None, CategoricalOrdering::Physical))
            .unwrap();
        let gene_type = Series::new("gene_type", &["protein", "lncRNA"])
            .cast(&DataType::Categorical(None, CategoricalOrdering::Physical))
            .unwrap();
        let dataset = Dataset::new(
            Array2::<f64>::ones((3, 2)).into(),
            ["c1", "c2", "c3"].into_iter().collect(),
            ["g1", "g2"].into_iter().collect(),
        )
        .unwrap()
        .with_obs(DataFrame::new(vec![cell_type]).unwrap())
        .unwrap()
        .with_var(DataFrame::new(vec![gene_type]).unwrap())
        .unwrap()
        .with_annotation(
            AnnotationRole::Obsm,
            "leiden",
            ["0", "1", "0"].into_iter().collect::<CategoricalArray>(),
        )
        .unwrap();
        let scgroup = SCGroup::<B>::new(&uri, false, None).unwrap();
        scgroup.from_anndata(&dataset).unwrap();
        let store = scgroup.store();

        let (schema, obs) = B::read_sparse(store, &uri_join(&uri, "obs")).unwrap();
        assert_eq!(schema.attributes[0].dtype, backend::ScalarType::String);
        assert_eq!(
            obs.attr("cell_type").unwrap(),
            &DynArray::from(strings(&["T", "B", "T"]))
        );
        let (_, var) = B::read_sparse(store, &uri_join(&uri, "var")).unwrap();
        assert_eq!(
            var.attr("gene_type").unwrap(),
            &DynArray::from(strings(&["protein", "lncRNA"]))
        );
        let leiden = B::read_dense(store, &uri_join(&uri_join(&uri, "obsm"), "leiden")).unwrap();
        assert_eq!(leiden, DynArray::from(strings(&["0", "1", "0"])));
    })
}

/// A matrix that disagrees with its labels is rejected before anything is written.
pub fn test_shape_mismatch<B: Backend>() {
    with_tmp_dir(|dir| {
        let store = B::new_store(B::Config::default()).unwrap();
        let group_uri = uri_in(&dir, "X");
        let x: ArrayData = Array2::<f32>::zeros((3, 4)).into();
        let result = write_x_array::<B>(
            &store,
            &x,
            &group_uri,
            "data",
            &strings(&["c1", "c2", "c3"]),
            &strings(&["g1", "g2", "g3", "g4", "g5"]),
            false,
        );
        assert!(is_error(result, |e| matches!(e, IngestError::ShapeMismatch { .. })));
        assert!(!B::exists(&store, &uri_join(&group_uri, "data")).unwrap());

        let x: ArrayData = array![["a".to_string()]].into();
        let result = write_x_array::<B>(
            &store,
            &x,
            &group_uri,
            "data",
            &strings(&["c1"]),
            &strings(&["g1"]),
            false,
        );
        assert!(is_error(result, |e| matches!(e, IngestError::UnsupportedType { .. })));
        assert!(!B::exists(&store, &uri_join(&group_uri, "data")).unwrap());
    })
}

/// Expression matrices accept repeated labels, axis tables do not.
pub fn test_duplicates<B: Backend>() {
    with_tmp_dir(|dir| {
        let store = B::new_store(B::Config::default()).unwrap();
        let obs_names = strings(&["c1", "c1"]);
        let var_names = strings(&["g1"]);
        let x: ArrayData = array![[1.0f32], [2.0]].into();
        let x_uri = uri_in(&dir, "X");
        let uri =
            write_x_array::<B>(&store, &x, &x_uri, "data", &obs_names, &var_names, false).unwrap();
        let (_, fragment) = B::read_sparse(&store, &uri).unwrap();
        assert_eq!(
            x_cells(&fragment),
            vec![
                ("c1".to_string(), "g1".to_string(), 1.0),
                ("c1".to_string(), "g1".to_string(), 2.0),
            ]
        );

        let index = DataFrameIndex::from(obs_names);
        let base_uri = dir.to_string_lossy().to_string();
        let result =
            write_obs_or_var::<B>(&store, &DataFrame::empty(), &index, "obs", &base_uri, false);
        assert!(is_error(result, |e| matches!(e, IngestError::DuplicateCoordinate { .. })));
    })
}

/// Ingesting into an existing URI fails and leaves the first group untouched.
pub fn test_existing_target<B: Backend>() {
    with_tmp_dir(|dir| {
        let uri = uri_in(&dir, "target");
        let first = Dataset::new(
            Array2::<i32>::ones((1, 1)).into(),
            ["c1"].into_iter().collect(),
            ["g1"].into_iter().collect(),
        )
        .unwrap();
        let scgroup = SCGroup::<B>::new(&uri, false, None).unwrap();
        scgroup.from_anndata(&first).unwrap();
        let second = first
            .clone()
            .with_annotation(AnnotationRole::Obsm, "X_pca", Array2::<f32>::zeros((1, 2)))
            .unwrap();
        assert!(is_error(scgroup.from_anndata(&second), |e| matches!(
            e,
            IngestError::TargetExists(_)
        )));

        let store = scgroup.store();
        assert_eq!(member_names::<B>(store, &uri), vec!["X", "obs", "var"]);
        assert!(!B::exists(store, &uri_join(&uri, "obsm")).unwrap());
    })
}

fn write_10x_dir(dir: &PathBuf) -> PathBuf {
    let path = dir.join("filtered_feature_bc_matrix");
    fs::create_dir_all(&path).unwrap();
    fs::write(
        path.join("matrix.mtx"),
        "%%MatrixMarket matrix coordinate integer general\n\
         %metadata\n\
         3 2 3\n\
         1 1 5\n\
         3 1 1\n\
         2 2 7\n",
    )
    .unwrap();
    fs::write(path.join("barcodes.tsv"), "AAAC-1\nAAAG-1\n").unwrap();
    fs::write(
        path.join("features.tsv"),
        "ENSG01\tCD3E\tGene Expression\n\
         ENSG02\tMS4A1\tGene Expression\n\
         ENSG03\tCD3E\tGene Expression\n",
    )
    .unwrap();
    path
}

/// A 10x matrix directory is read, its variable names made unique, and written.
pub fn test_10x<B: Backend>() {
    with_tmp_dir(|dir| {
        let input = write_10x_dir(&dir);
        let uri = uri_in(&dir, "tenx");
        let scgroup = SCGroup::<B>::new(&uri, false, None).unwrap();
        scgroup.from_file(&input, FileFormat::TenX).unwrap();
        let store = scgroup.store();

        let (_, fragment) =
            B::read_sparse(store, &uri_join(&uri_join(&uri, "X"), "data")).unwrap();
        let obs = strings(&["AAAC-1", "AAAG-1"]);
        let var = strings(&["CD3E", "MS4A1", "CD3E-1"]);
        let coo = CooMatrix::try_from_triplets(2, 3, vec![0, 0, 1], vec![0, 2, 1], vec![5.0, 1.0, 7.0])
            .unwrap();
        let x = ArrayData::CsrMatrix(CsrMatrix::from(&coo));
        assert_eq!(x_cells(&fragment), expected_cells(&x, &obs, &var));

        let (_, var_table) = B::read_sparse(store, &uri_join(&uri, "var")).unwrap();
        assert_eq!(var_table.coord("var_id").unwrap(), &DynArray::from(var));
        assert_eq!(
            var_table.attr("gene_ids").unwrap(),
            &DynArray::from(strings(&["ENSG01", "ENSG02", "ENSG03"]))
        );
        assert!(var_table.attr("feature_types").is_some());

        assert!(is_error(
            scgroup.from_file(&input, FileFormat::TenX),
            |e| matches!(e, IngestError::TargetExists(_))
        ));
    })
}

/// Labels collide freely in generated indices; making them unique keeps their count.
pub fn test_make_unique() {
    proptest!(ProptestConfig::with_cases(64), |(mut index in (0usize..20).prop_flat_map(index_strat))| {
        let n = index.len();
        let renamed = index.make_unique();
        prop_assert_eq!(index.len(), n);
        prop_assert!(index.is_unique());
        prop_assert!(renamed < n.max(1));
    });
}
