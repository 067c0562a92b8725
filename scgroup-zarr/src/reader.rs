//! Reader for AnnData datasets stored in Zarr.
use crate::read_array;

use anyhow::{anyhow, bail, ensure, Context, Result};
use log::{debug, warn};
use nalgebra_sparse::{CscMatrix, CsrMatrix};
use polars::prelude::{
    CategoricalChunkedBuilder, CategoricalOrdering, DataFrame, IntoSeries, NamedFrom, Series,
};
use scgroup::{
    AnnotationRole, ArrayData, CategoricalArray, DataFrameIndex, Dataset, DynArray, RawData,
};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zarrs::array::Array;
use zarrs::filesystem::FilesystemStore;
use zarrs::group::Group;

struct AnnDataZarr {
    root: PathBuf,
    store: Arc<FilesystemStore>,
}

enum Node {
    Array(Array<FilesystemStore>),
    Group(Map<String, Value>),
}

impl AnnDataZarr {
    fn open(root: &Path) -> Result<Self> {
        ensure!(root.is_dir(), "'{}' is not a zarr store", root.display());
        let store = Arc::new(FilesystemStore::new(root)?);
        Group::open(store.clone(), "/")
            .with_context(|| format!("'{}' is not a zarr group", root.display()))?;
        Ok(Self {
            root: root.to_path_buf(),
            store,
        })
    }

    fn exists(&self, path: &str) -> bool {
        self.root.join(path.trim_start_matches('/')).exists()
    }

    fn node(&self, path: &str) -> Result<Node> {
        if let Ok(array) = Array::open(self.store.clone(), path) {
            return Ok(Node::Array(array));
        }
        let group = Group::open(self.store.clone(), path)
            .with_context(|| format!("cannot open '{}'", path))?;
        Ok(Node::Group(group.attributes().clone()))
    }

    fn read_dense(&self, path: &str) -> Result<DynArray> {
        match self.node(path)? {
            Node::Array(array) => read_array(&array),
            Node::Group(_) => bail!("'{}' is not an array", path),
        }
    }

    /// Names of the child nodes of a group, sorted.
    fn children(&self, path: &str) -> Result<Vec<String>> {
        let dir = self.root.join(path.trim_start_matches('/'));
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                let name = entry.file_name().to_string_lossy().to_string();
                if !name.starts_with('.') {
                    names.push(name);
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn read_matrix(&self, path: &str) -> Result<Option<ArrayData>> {
        let attrs = match self.node(path)? {
            Node::Array(array) => return Ok(Some(ArrayData::Array(read_array(&array)?))),
            Node::Group(attrs) => attrs,
        };
        match encoding_type(&attrs) {
            Some("csr_matrix") | Some("csc_matrix") => {
                self.read_sparse(path, &attrs).map(Some)
            }
            Some("categorical") => {
                let (codes, categories) = self.read_categorical_parts(path)?;
                let codes = codes
                    .into_iter()
                    .map(|c| u32::try_from(c).map_err(|_| anyhow!("'{}' has missing values", path)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Some(ArrayData::Categorical(CategoricalArray {
                    codes: ndarray::Array1::from(codes).into_dyn(),
                    categories: categories.into(),
                })))
            }
            other => {
                warn!(
                    "Skipping '{}' with unsupported encoding '{}'",
                    path,
                    other.unwrap_or("none")
                );
                Ok(None)
            }
        }
    }

    fn read_sparse(&self, path: &str, attrs: &Map<String, Value>) -> Result<ArrayData> {
        let shape: Vec<usize> = attrs
            .get("shape")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .with_context(|| format!("'{}' has no shape", path))?;
        ensure!(shape.len() == 2, "'{}' is not two-dimensional", path);
        let data = to_f64_vec(&self.read_dense(&format!("{}/data", path))?)?;
        let indices = to_usize_vec(&self.read_dense(&format!("{}/indices", path))?)?;
        let indptr = to_usize_vec(&self.read_dense(&format!("{}/indptr", path))?)?;
        let matrix = if encoding_type(attrs) == Some("csr_matrix") {
            ArrayData::CsrMatrix(
                CsrMatrix::try_from_csr_data(shape[0], shape[1], indptr, indices, data)
                    .map_err(|e| anyhow!("cannot read csr matrix '{}': {}", path, e))?,
            )
        } else {
            ArrayData::CscMatrix(
                CscMatrix::try_from_csc_data(shape[0], shape[1], indptr, indices, data)
                    .map_err(|e| anyhow!("cannot read csc matrix '{}': {}", path, e))?,
            )
        };
        Ok(matrix)
    }

    fn read_categorical_parts(&self, path: &str) -> Result<(Vec<i64>, Vec<String>)> {
        let codes = to_i64_vec(&self.read_dense(&format!("{}/codes", path))?)?;
        let categories = self
            .read_dense(&format!("{}/categories", path))?
            .as_string()?
            .iter()
            .cloned()
            .collect();
        Ok((codes, categories))
    }

    fn read_column(&self, path: &str, name: &str) -> Result<Series> {
        let attrs = match self.node(path)? {
            Node::Array(array) => return dyn_to_series(name, &read_array(&array)?),
            Node::Group(attrs) => attrs,
        };
        match encoding_type(&attrs) {
            Some("categorical") => {
                let (codes, categories) = self.read_categorical_parts(path)?;
                let mut values = Vec::with_capacity(codes.len());
                for code in codes {
                    let value = if code < 0 {
                        None
                    } else {
                        let s = categories
                            .get(code as usize)
                            .with_context(|| format!("'{}': code {} out of range", path, code))?;
                        Some(s.as_str())
                    };
                    values.push(value);
                }
                Ok(CategoricalChunkedBuilder::new(name, values.len(), CategoricalOrdering::Lexical)
                    .drain_iter_and_finish(values)
                    .into_series())
            }
            Some("nullable-integer") | Some("nullable-boolean") => {
                let values = self.read_dense(&format!("{}/values", path))?;
                let mask = self.read_dense(&format!("{}/mask", path))?;
                let mask = mask.as_bool()?;
                if let DynArray::Bool(values) = &values {
                    let values: Vec<Option<bool>> = values
                        .iter()
                        .zip(mask.iter())
                        .map(|(v, m)| if *m { None } else { Some(*v) })
                        .collect();
                    Ok(Series::new(name, values))
                } else {
                    let values: Vec<Option<i64>> = to_i64_vec(&values)?
                        .into_iter()
                        .zip(mask.iter())
                        .map(|(v, m)| if *m { None } else { Some(v) })
                        .collect();
                    Ok(Series::new(name, values))
                }
            }
            other => bail!(
                "column '{}' has unsupported encoding '{}'",
                path,
                other.unwrap_or("none")
            ),
        }
    }

    fn read_frame(&self, path: &str) -> Result<(DataFrame, DataFrameIndex)> {
        let attrs = match self.node(path)? {
            Node::Group(attrs) => attrs,
            Node::Array(_) => bail!("'{}' is not a dataframe", path),
        };
        let index_name = attrs
            .get("_index")
            .and_then(|v| v.as_str())
            .with_context(|| format!("'{}' has no index", path))?
            .to_string();
        let names = self
            .read_column(&format!("{}/{}", path, index_name), &index_name)?
            .cast(&polars::prelude::DataType::String)?
            .str()?
            .into_iter()
            .map(|x| x.unwrap_or_default().to_string())
            .collect();
        let index = DataFrameIndex::new(&index_name, names);

        let columns: Vec<String> = match attrs.get("column-order") {
            Some(Value::Array(cols)) => cols
                .iter()
                .filter_map(|c| c.as_str().map(str::to_string))
                .collect(),
            Some(Value::String(col)) => vec![col.clone()],
            _ => Vec::new(),
        };
        let series = columns
            .iter()
            .map(|c| {
                self.read_column(&format!("{}/{}", path, c), c)
                    .with_context(|| format!("cannot read column '{}' of '{}'", c, path))
            })
            .collect::<Result<Vec<_>>>()?;
        let frame = if series.is_empty() {
            DataFrame::empty()
        } else {
            DataFrame::new(series)?
        };
        Ok((frame, index))
    }
}

fn encoding_type(attrs: &Map<String, Value>) -> Option<&str> {
    attrs.get("encoding-type").and_then(|v| v.as_str())
}

macro_rules! cast_elements {
    ($data:expr, $ty:ty, $what:expr) => {
        match $data {
            DynArray::I8(x) => x.iter().map(|v| *v as $ty).collect(),
            DynArray::I16(x) => x.iter().map(|v| *v as $ty).collect(),
            DynArray::I32(x) => x.iter().map(|v| *v as $ty).collect(),
            DynArray::I64(x) => x.iter().map(|v| *v as $ty).collect(),
            DynArray::U8(x) => x.iter().map(|v| *v as $ty).collect(),
            DynArray::U16(x) => x.iter().map(|v| *v as $ty).collect(),
            DynArray::U32(x) => x.iter().map(|v| *v as $ty).collect(),
            DynArray::U64(x) => x.iter().map(|v| *v as $ty).collect(),
            other => bail!("expected {} values, found {}", $what, other.dtype()),
        }
    };
}

fn to_i64_vec(data: &DynArray) -> Result<Vec<i64>> {
    Ok(cast_elements!(data, i64, "integer"))
}

fn to_usize_vec(data: &DynArray) -> Result<Vec<usize>> {
    if let DynArray::I8(_) | DynArray::I16(_) | DynArray::I32(_) | DynArray::I64(_) = data {
        ensure!(
            to_i64_vec(data)?.iter().all(|x| *x >= 0),
            "negative sparse index"
        );
    }
    Ok(cast_elements!(data, usize, "integer"))
}

fn to_f64_vec(data: &DynArray) -> Result<Vec<f64>> {
    match data {
        DynArray::F32(x) => Ok(x.iter().map(|v| *v as f64).collect()),
        DynArray::F64(x) => Ok(x.iter().copied().collect()),
        DynArray::Bool(x) => Ok(x.iter().map(|v| if *v { 1.0 } else { 0.0 }).collect()),
        other => Ok(cast_elements!(other, f64, "numeric")),
    }
}

fn dyn_to_series(name: &str, data: &DynArray) -> Result<Series> {
    ensure!(data.ndim() == 1, "column '{}' is not one-dimensional", name);
    let series = match data {
        DynArray::I8(x) => x.iter().copied().collect::<Series>(),
        DynArray::I16(x) => x.iter().copied().collect::<Series>(),
        DynArray::I32(x) => x.iter().copied().collect::<Series>(),
        DynArray::I64(x) => x.iter().copied().collect::<Series>(),
        DynArray::U8(x) => x.iter().copied().collect::<Series>(),
        DynArray::U16(x) => x.iter().copied().collect::<Series>(),
        DynArray::U32(x) => x.iter().copied().collect::<Series>(),
        DynArray::U64(x) => x.iter().copied().collect::<Series>(),
        DynArray::F32(x) => x.iter().copied().collect::<Series>(),
        DynArray::F64(x) => x.iter().copied().collect::<Series>(),
        DynArray::Bool(x) => x.iter().copied().collect::<Series>(),
        DynArray::String(x) => x.iter().map(|s| s.as_str()).collect::<Series>(),
    };
    Ok(series.with_name(name))
}

/// Read an AnnData Zarr store: `X`, `obs`, `var`, `obsm`, `varm`, `obsp`, `varp` and `raw`.
/// Dataframe-valued annotations are skipped. `uns` is not read.
pub(crate) fn read_anndata_zarr<P: AsRef<Path>>(path: P) -> Result<Dataset> {
    let file = AnnDataZarr::open(path.as_ref())?;
    debug!("Reading AnnData from {}", path.as_ref().display());

    let x = file
        .read_matrix("/X")?
        .context("X has an unsupported encoding")?;
    let (obs, obs_names) = file.read_frame("/obs")?;
    let (var, var_names) = file.read_frame("/var")?;
    let mut dataset = Dataset::new(x, obs_names.clone(), var_names)?
        .with_obs(obs)?
        .with_var(var)?;

    for role in AnnotationRole::ALL {
        let group = format!("/{}", role.name());
        if !file.exists(&group) {
            continue;
        }
        for name in file.children(&group)? {
            let path = format!("{}/{}", group, name);
            if let Some(data) = file.read_matrix(&path)? {
                dataset
                    .add_annotation(role, &name, data)
                    .with_context(|| format!("cannot add '{}'", path))?;
            }
        }
    }

    if file.exists("/raw/X") {
        let raw_x = file
            .read_matrix("/raw/X")?
            .context("raw/X has an unsupported encoding")?;
        let (_, raw_var_names) = file.read_frame("/raw/var")?;
        dataset = dataset.with_raw(RawData::new(raw_x, obs_names, raw_var_names)?);
    }
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::write_array;
    use ndarray::{array, Array2};
    use tempfile::tempdir;
    use zarrs::group::GroupBuilder;

    fn group(store: &Arc<FilesystemStore>, path: &str, attrs: Value) {
        let mut group = GroupBuilder::new().build(store.clone(), path).unwrap();
        if let Value::Object(attrs) = attrs {
            group.attributes_mut().extend(attrs);
        }
        group.store_metadata().unwrap();
    }

    fn array<A: Into<DynArray>>(store: &Arc<FilesystemStore>, path: &str, data: A) {
        write_array(store, path, &data.into(), &[], Vec::new()).unwrap();
    }

    fn strings(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|x| x.to_string()).collect()
    }

    fn write_frame(store: &Arc<FilesystemStore>, path: &str, index: &[&str]) {
        group(
            store,
            path,
            serde_json::json!({
                "encoding-type": "dataframe",
                "_index": "_index",
                "column-order": [],
            }),
        );
        array(store, &format!("{}/_index", path), strings(index));
    }

    #[test]
    fn test_read_anndata_zarr() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("data.zarr");
        std::fs::create_dir_all(&root).unwrap();
        let store = Arc::new(FilesystemStore::new(&root).unwrap());
        group(&store, "/", serde_json::json!({"encoding-type": "anndata"}));

        // 3 cells x 2 genes, csr
        group(
            &store,
            "/X",
            serde_json::json!({"encoding-type": "csr_matrix", "shape": [3, 2]}),
        );
        array(&store, "/X/data", vec![1.0f32, 2.0, 3.0]);
        array(&store, "/X/indices", vec![0i32, 1, 1]);
        array(&store, "/X/indptr", vec![0i32, 1, 2, 3]);

        group(
            &store,
            "/obs",
            serde_json::json!({
                "encoding-type": "dataframe",
                "_index": "cell",
                "column-order": ["cell_type", "n_counts"],
            }),
        );
        array(&store, "/obs/cell", strings(&["c1", "c2", "c3"]));
        array(&store, "/obs/n_counts", vec![10i64, 20, 30]);
        group(
            &store,
            "/obs/cell_type",
            serde_json::json!({"encoding-type": "categorical", "ordered": false}),
        );
        array(&store, "/obs/cell_type/codes", vec![0i8, 1, -1]);
        array(&store, "/obs/cell_type/categories", strings(&["B", "T"]));

        write_frame(&store, "/var", &["g1", "g2"]);

        group(&store, "/obsm", serde_json::json!({"encoding-type": "dict"}));
        array(
            &store,
            "/obsm/X_pca",
            Array2::<f64>::from_shape_vec((3, 2), vec![1., 2., 3., 4., 5., 6.])
                .unwrap()
                .into_dyn(),
        );
        group(&store, "/obsm/frame", serde_json::json!({"encoding-type": "dataframe"}));

        group(&store, "/raw", serde_json::json!({"encoding-type": "raw"}));
        array(&store, "/raw/X", array![[1.0f32, 0.0, 4.0], [0.0, 2.0, 0.0], [0.0, 3.0, 0.0]].into_dyn());
        write_frame(&store, "/raw/var", &["g1", "g2", "g3"]);

        let dataset = read_anndata_zarr(&root).unwrap();
        assert_eq!(dataset.x().shape(), vec![3, 2]);
        assert!(matches!(dataset.x(), ArrayData::CsrMatrix(_)));
        assert_eq!(dataset.obs_names().names(), &strings(&["c1", "c2", "c3"])[..]);
        assert_eq!(dataset.obs_names().index_name, "cell");
        assert_eq!(dataset.var_names().names(), &strings(&["g1", "g2"])[..]);
        assert_eq!(dataset.obs().get_column_names(), vec!["cell_type", "n_counts"]);
        let cell_type = dataset
            .obs()
            .column("cell_type")
            .unwrap()
            .cast(&polars::prelude::DataType::String)
            .unwrap();
        assert_eq!(
            cell_type.str().unwrap().into_iter().collect::<Vec<_>>(),
            vec![Some("B"), Some("T"), None]
        );
        let obsm = dataset.annotations(AnnotationRole::Obsm);
        assert_eq!(obsm.keys().collect::<Vec<_>>(), vec!["X_pca"]);
        let raw = dataset.raw().unwrap();
        assert_eq!(raw.var_names().len(), 3);
        assert_eq!(raw.obs_names(), dataset.obs_names());
    }

    #[test]
    fn test_not_a_store() {
        let dir = tempdir().unwrap();
        assert!(read_anndata_zarr(dir.path().join("missing.zarr")).is_err());
    }
}
