use scgroup::backend::SparseFragment;
use scgroup::*;

use itertools::Itertools;
use nalgebra_sparse::{coo::CooMatrix, csc::CscMatrix, csr::CsrMatrix};
use ndarray::Array;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use polars::prelude::{DataFrame, NamedFrom, Series};
use proptest::prelude::*;
use proptest::strategy::BoxedStrategy;
use rand::seq::IteratorRandom;
use std::path::PathBuf;
use tempfile::tempdir;

pub fn with_tmp_dir<T, F: FnMut(PathBuf) -> T>(mut func: F) -> T {
    let dir = tempdir().unwrap();
    let path = dir.path().to_path_buf();
    func(path)
}

/// A fresh URI under `dir`.
pub fn uri_in(dir: &PathBuf, name: &str) -> String {
    dir.join(name).to_str().unwrap().to_string()
}

////////////////////////////////////////////////////////////////////////////////
/// Strategies
////////////////////////////////////////////////////////////////////////////////

/// Strategy for generating a random dataset with unique labels on both axes.
pub fn dataset_strat(n_obs: usize, n_vars: usize) -> impl Strategy<Value = Dataset> {
    let x = x_strat(n_obs, n_vars);
    let obsm = proptest::collection::vec(1usize..5, 0..3).prop_flat_map(move |shapes| {
        shapes
            .into_iter()
            .map(|d| dense_array_strat(n_obs, d))
            .collect::<Vec<_>>()
    });
    let varm = proptest::collection::vec(1usize..5, 0..3).prop_flat_map(move |shapes| {
        shapes
            .into_iter()
            .map(|d| x_strat(n_vars, d))
            .collect::<Vec<_>>()
    });
    let obsp = (0usize..2).prop_flat_map(move |d| {
        std::iter::repeat_with(|| x_strat(n_obs, n_obs))
            .take(d)
            .collect::<Vec<_>>()
    });
    let varp = (0usize..2).prop_flat_map(move |d| {
        std::iter::repeat_with(|| x_strat(n_vars, n_vars))
            .take(d)
            .collect::<Vec<_>>()
    });
    let raw = proptest::option::of(x_strat(n_obs, n_vars + 1));
    (x, obsm, varm, obsp, varp, raw).prop_map(move |(x, obsm, varm, obsp, varp, raw)| {
        let obs_names = index_strat_names("c", n_obs);
        let var_names = index_strat_names("g", n_vars);
        let obs = DataFrame::new(vec![
            Series::new("n_counts", (0..n_obs as i64).collect::<Vec<_>>()),
            Series::new(
                "cluster",
                (0..n_obs).map(|i| format!("k{}", i % 3)).collect::<Vec<_>>(),
            ),
        ])
        .unwrap();
        let mut dataset = Dataset::new(x, obs_names.clone(), var_names)
            .unwrap()
            .with_obs(obs)
            .unwrap();
        let roles = [
            (AnnotationRole::Obsm, obsm),
            (AnnotationRole::Varm, varm),
            (AnnotationRole::Obsp, obsp),
            (AnnotationRole::Varp, varp),
        ];
        for (role, arrays) in roles {
            for (i, arr) in arrays.into_iter().enumerate() {
                dataset
                    .add_annotation(role, &format!("{}_{}", role, i), arr)
                    .unwrap();
            }
        }
        if let Some(raw_x) = raw {
            let raw_vars = index_strat_names("r", n_vars + 1);
            dataset = dataset.with_raw(RawData::new(raw_x, obs_names, raw_vars).unwrap());
        }
        dataset
    })
}

fn index_strat_names(prefix: &str, n: usize) -> DataFrameIndex {
    (0..n).map(|i| format!("{}_{}", prefix, i)).collect()
}

/// Strategy for generating labels, unique or not.
pub fn index_strat(n: usize) -> BoxedStrategy<DataFrameIndex> {
    if n == 0 {
        Just(DataFrameIndex::empty()).boxed()
    } else {
        proptest::collection::vec("[a-c]{1,2}", n)
            .prop_map(DataFrameIndex::from)
            .boxed()
    }
}

/// Numeric matrices that can be stored as an expression matrix.
pub fn x_strat(num_rows: usize, num_cols: usize) -> impl Strategy<Value = ArrayData> {
    prop_oneof![
        csr_strat(num_rows, num_cols),
        csc_strat(num_rows, num_cols),
        dense_array_strat(num_rows, num_cols),
    ]
}

pub fn csr_strat(num_rows: usize, num_cols: usize) -> impl Strategy<Value = ArrayData> {
    let nnz = num_rows * num_cols / 10;
    Just(rand_csr(num_rows, num_cols, nnz, 1.0, 255.0).into())
}

pub fn csc_strat(num_rows: usize, num_cols: usize) -> impl Strategy<Value = ArrayData> {
    let nnz = num_rows * num_cols / 10;
    Just(CscMatrix::from(&rand_csr(num_rows, num_cols, nnz, 1.0, 255.0)).into())
}

fn dense_array_strat(num_rows: usize, num_cols: usize) -> impl Strategy<Value = ArrayData> {
    let shape = (num_rows, num_cols);
    prop_oneof![
        Just(Array::random(shape, Uniform::new(0u8, 255u8)).into()),
        Just(Array::random(shape, Uniform::new(0u32, 255u32)).into()),
        Just(Array::random(shape, Uniform::new(-128i16, 127i16)).into()),
        Just(Array::random(shape, Uniform::new(-128i64, 127i64)).into()),
        Just(Array::random(shape, Uniform::new(-128f32, 127f32)).into()),
        Just(Array::random(shape, Uniform::new(-128f64, 127f64)).into()),
        Just(
            Array::random(shape, Uniform::new(0u8, 2u8))
                .mapv(|x| x == 1)
                .into()
        ),
    ]
}

/// Generate a random compressed sparse row matrix
pub fn rand_csr(nrow: usize, ncol: usize, nnz: usize, low: f64, high: f64) -> CsrMatrix<f64> {
    let mut rng = rand::thread_rng();
    let values: Vec<f64> = Array::random((nnz,), Uniform::new(low, high)).to_vec();
    let (row_indices, col_indices) = (0..nrow)
        .cartesian_product(0..ncol)
        .choose_multiple(&mut rng, nnz)
        .into_iter()
        .unzip();
    (&CooMatrix::try_from_triplets(nrow, ncol, row_indices, col_indices, values).unwrap()).into()
}

////////////////////////////////////////////////////////////////////////////////
/// Stored data
////////////////////////////////////////////////////////////////////////////////

/// `(obs_id, var_id, value)` cells of a stored expression matrix, in storage order.
pub fn x_cells(fragment: &SparseFragment) -> Vec<(String, String, f32)> {
    let obs = fragment.coord("obs_id").unwrap().as_string().unwrap();
    let var = fragment.coord("var_id").unwrap().as_string().unwrap();
    let value = fragment.attr("value").unwrap().as_f32().unwrap();
    obs.iter()
        .zip(var.iter())
        .zip(value.iter())
        .map(|((o, v), x)| (o.clone(), v.clone(), *x))
        .collect()
}

/// Cells expected for a matrix with the given labels: every pair, row by row.
pub fn expected_cells(x: &ArrayData, obs: &[String], var: &[String]) -> Vec<(String, String, f32)> {
    let values = x.to_dense().unwrap().to_f32_vec().unwrap();
    obs.iter()
        .cartesian_product(var.iter())
        .zip(values)
        .map(|((o, v), x)| (o.clone(), v.clone(), x))
        .collect()
}

/// Names of the members of a stored group, in order.
pub fn member_names<B: Backend>(store: &B::Store, uri: &str) -> Vec<String> {
    B::read_members(store, uri)
        .unwrap()
        .into_iter()
        .map(|m| m.name)
        .collect()
}
