//! Zarr backend for scgroup.
//!
//! Every URI is a directory holding one Zarr node at its root:
//!
//! - groups are Zarr groups whose `members` attribute lists the registered members;
//! - sparse arrays are Zarr groups whose `sparse_array` attribute holds the schema, with one
//!   one-dimensional child array per dimension and per attribute;
//! - dense arrays are plain Zarr arrays stored as a single chunk.
mod reader;

use scgroup::backend::*;
use scgroup::{Dataset, DynArray, IngestError};

use anyhow::{bail, ensure, Context, Result};
use log::debug;
use ndarray::{ArrayD, IxDyn};
use std::num::NonZeroU64;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zarrs::array::chunk_grid::{ChunkGrid, RegularChunkGrid};
use zarrs::array::codec::{BytesToBytesCodecTraits, ZstdCodec};
use zarrs::array::{Array, ArrayBuilder, ChunkShape, DataType, FillValue};
use zarrs::filesystem::FilesystemStore;
use zarrs::group::{Group, GroupBuilder};

const MEMBERS_KEY: &str = "members";
const SCHEMA_KEY: &str = "sparse_array";

/// The Zarr backend.
pub struct Zarr;

#[derive(Debug, Clone)]
pub struct ZarrConfig {
    /// Number of cells per chunk of a sparse array column.
    pub chunk_size: u64,
    /// Zstd level used when a filter asks for the default level (`-1`).
    pub compression_level: i32,
}

impl Default for ZarrConfig {
    fn default() -> Self {
        Self {
            chunk_size: 10000,
            compression_level: 3,
        }
    }
}

/// Shared connection context. URIs are local paths, optionally prefixed by `file://`.
#[derive(Debug, Clone)]
pub struct ZarrStore {
    config: ZarrConfig,
}

impl ZarrStore {
    pub fn config(&self) -> &ZarrConfig {
        &self.config
    }

    fn path(&self, uri: &str) -> Result<PathBuf> {
        let path = uri.strip_prefix("file://").unwrap_or(uri);
        ensure!(
            !path.contains("://"),
            "unsupported URI '{}': only local paths are supported",
            uri
        );
        Ok(PathBuf::from(path))
    }

    /// Create the directory backing a new node. Fails if anything exists at `uri`.
    fn create_node(&self, uri: &str) -> Result<Arc<FilesystemStore>> {
        let path = self.path(uri)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create '{}'", parent.display()))?;
        }
        match std::fs::create_dir(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                bail!(IngestError::TargetExists(uri.to_string()))
            }
            Err(e) => {
                return Err(e).with_context(|| format!("cannot create '{}'", path.display()))
            }
        }
        Ok(Arc::new(FilesystemStore::new(&path)?))
    }

    fn open_node(&self, uri: &str) -> Result<Arc<FilesystemStore>> {
        let path = self.path(uri)?;
        ensure!(path.is_dir(), "'{}' does not exist", uri);
        Ok(Arc::new(FilesystemStore::new(&path)?))
    }
}

pub struct ZarrGroup {
    uri: String,
    group: Group<FilesystemStore>,
    members: Vec<Member>,
}

pub struct ZarrSparseArray {
    uri: String,
    store: Arc<FilesystemStore>,
    schema: ArraySchema,
    config: ZarrConfig,
}

impl Backend for Zarr {
    const NAME: &'static str = "zarr";

    type Config = ZarrConfig;

    type Store = ZarrStore;

    type Group = ZarrGroup;

    type SparseArray = ZarrSparseArray;

    fn new_store(config: ZarrConfig) -> Result<ZarrStore> {
        ensure!(config.chunk_size > 0, "chunk size must be positive");
        Ok(ZarrStore { config })
    }

    fn create_group(store: &ZarrStore, uri: &str) -> Result<ZarrGroup> {
        let node = store.create_node(uri)?;
        let group = GroupBuilder::new().build(node, "/")?;
        group.store_metadata()?;
        debug!("Created group '{}'", uri);
        Ok(ZarrGroup {
            uri: uri.to_string(),
            group,
            members: Vec::new(),
        })
    }

    fn create_sparse_array(
        store: &ZarrStore,
        uri: &str,
        schema: &ArraySchema,
    ) -> Result<ZarrSparseArray> {
        schema.validate()?;
        ensure!(schema.sparse, "'{}': only sparse schemas are supported", uri);
        for name in field_names(schema) {
            ensure!(
                !name.contains('/') && !name.starts_with("__"),
                "'{}': invalid field name '{}'",
                uri,
                name
            );
        }
        let node = store.create_node(uri)?;
        let mut group = GroupBuilder::new().build(node.clone(), "/")?;
        group
            .attributes_mut()
            .insert(SCHEMA_KEY.to_string(), serde_json::to_value(schema)?);
        group.store_metadata()?;
        debug!("Created sparse array '{}'", uri);
        Ok(ZarrSparseArray {
            uri: uri.to_string(),
            store: node,
            schema: schema.clone(),
            config: store.config.clone(),
        })
    }

    fn write_dense_array(store: &ZarrStore, uri: &str, data: &DynArray) -> Result<()> {
        let node = store.create_node(uri)?;
        let shape: Vec<u64> = data.shape().iter().map(|x| *x as u64).collect();
        write_array(&node, "/", data, &shape, Vec::new())
    }

    fn exists(store: &ZarrStore, uri: &str) -> Result<bool> {
        Ok(store.path(uri)?.exists())
    }

    fn read_members(store: &ZarrStore, uri: &str) -> Result<Vec<Member>> {
        let group = Group::open(store.open_node(uri)?, "/")?;
        match group.attributes().get(MEMBERS_KEY) {
            Some(members) => Ok(serde_json::from_value(members.clone())?),
            None => bail!("'{}' is not a group", uri),
        }
    }

    fn read_sparse(store: &ZarrStore, uri: &str) -> Result<(ArraySchema, SparseFragment)> {
        let node = store.open_node(uri)?;
        let group = Group::open(node.clone(), "/")?;
        let schema: ArraySchema = match group.attributes().get(SCHEMA_KEY) {
            Some(schema) => serde_json::from_value(schema.clone())?,
            None => bail!("'{}' is not a sparse array", uri),
        };
        let read_field = |name: &str, dtype: ScalarType| -> Result<DynArray> {
            let path = format!("/{}", name);
            match Array::open(node.clone(), &path) {
                Ok(array) => read_array(&array),
                Err(_) => Ok(empty_array(dtype)),
            }
        };
        let mut fragment = SparseFragment::new();
        for dim in &schema.dimensions {
            fragment.coords.push((dim.name.clone(), read_field(&dim.name, dim.dtype)?));
        }
        for attr in &schema.attributes {
            fragment.attrs.push((attr.name.clone(), read_field(&attr.name, attr.dtype)?));
        }
        Ok((schema, fragment))
    }

    fn read_dense(store: &ZarrStore, uri: &str) -> Result<DynArray> {
        let array = Array::open(store.open_node(uri)?, "/")
            .with_context(|| format!("'{}' is not a dense array", uri))?;
        read_array(&array)
    }

    fn read_anndata<P: AsRef<Path>>(path: P) -> Result<Dataset> {
        reader::read_anndata_zarr(path)
    }
}

impl GroupOp<Zarr> for ZarrGroup {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn members(&self) -> &[Member] {
        &self.members
    }

    fn add_member(&mut self, name: &str, uri: &str, relative: bool) -> Result<()> {
        ensure!(
            !self.contains(name),
            "'{}' already has a member named '{}'",
            self.uri,
            name
        );
        self.members.push(Member {
            name: name.to_string(),
            uri: uri.to_string(),
            relative,
        });
        Ok(())
    }

    fn close(mut self) -> Result<()> {
        let members = serde_json::to_value(&self.members)?;
        self.group
            .attributes_mut()
            .insert(MEMBERS_KEY.to_string(), members);
        self.group.store_metadata()?;
        debug!("Closed group '{}' with {} members", self.uri, self.members.len());
        Ok(())
    }
}

impl SparseArrayOp<Zarr> for ZarrSparseArray {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn schema(&self) -> &ArraySchema {
        &self.schema
    }

    fn write_fragment(&self, fragment: &SparseFragment) -> Result<()> {
        let n = fragment.len() as u64;
        let chunk = n.clamp(1, self.config.chunk_size);
        let filters = self
            .schema
            .dimensions
            .iter()
            .map(|d| &d.filters)
            .chain(self.schema.attributes.iter().map(|a| &a.filters));
        for ((name, data), filters) in fragment.coords.iter().chain(fragment.attrs.iter()).zip(filters) {
            let codecs = codecs_for(filters, &self.config);
            write_array(&self.store, &format!("/{}", name), data, &[chunk], codecs)
                .with_context(|| format!("cannot write field '{}' of '{}'", name, self.uri))?;
        }
        Ok(())
    }
}

fn field_names(schema: &ArraySchema) -> impl Iterator<Item = &str> {
    schema
        .dimensions
        .iter()
        .map(|d| d.name.as_str())
        .chain(schema.attributes.iter().map(|a| a.name.as_str()))
}

/// Zarr codecs realizing a filter pipeline. Only compression has a Zarr counterpart; the
/// other filters stay recorded in the schema.
fn codecs_for(filters: &[Filter], config: &ZarrConfig) -> Vec<Arc<dyn BytesToBytesCodecTraits>> {
    filters
        .iter()
        .filter_map(|f| match f {
            Filter::Zstd { level } => {
                let level = if *level == -1 {
                    config.compression_level
                } else {
                    *level
                };
                Some(Arc::new(ZstdCodec::new(level, false)) as Arc<dyn BytesToBytesCodecTraits>)
            }
            _ => None,
        })
        .collect()
}

fn make_chunk_grid(chunk: &[u64]) -> Result<ChunkGrid> {
    let sizes = chunk
        .iter()
        .map(|&s| NonZeroU64::new(s.max(1)).context("zero chunk size"))
        .collect::<Result<Vec<_>>>()?;
    Ok(ChunkGrid::new(RegularChunkGrid::new(ChunkShape::from(sizes))))
}

fn zarr_type(dtype: ScalarType) -> (DataType, FillValue) {
    match dtype {
        ScalarType::I8 => (DataType::Int8, FillValue::from(0i8)),
        ScalarType::I16 => (DataType::Int16, FillValue::from(0i16)),
        ScalarType::I32 => (DataType::Int32, FillValue::from(0i32)),
        ScalarType::I64 => (DataType::Int64, FillValue::from(0i64)),
        ScalarType::U8 => (DataType::UInt8, FillValue::from(0u8)),
        ScalarType::U16 => (DataType::UInt16, FillValue::from(0u16)),
        ScalarType::U32 => (DataType::UInt32, FillValue::from(0u32)),
        ScalarType::U64 => (DataType::UInt64, FillValue::from(0u64)),
        ScalarType::F32 => (DataType::Float32, FillValue::from(0.0f32)),
        ScalarType::F64 => (DataType::Float64, FillValue::from(0.0f64)),
        ScalarType::Bool => (DataType::Bool, FillValue::from(false)),
        ScalarType::String => (DataType::String, FillValue::from("")),
    }
}

macro_rules! store_elements {
    ($array:expr, $data:expr) => {{
        let elements: Vec<_> = $data.iter().cloned().collect();
        if !elements.is_empty() {
            $array.store_array_subset_elements(&$array.subset_all(), &elements)?;
        }
    }};
}

/// Write `data` as a Zarr array at `path` of `node`. An empty `chunk` means a single chunk
/// covering the whole array.
pub(crate) fn write_array(
    node: &Arc<FilesystemStore>,
    path: &str,
    data: &DynArray,
    chunk: &[u64],
    codecs: Vec<Arc<dyn BytesToBytesCodecTraits>>,
) -> Result<()> {
    let shape: Vec<u64> = data.shape().iter().map(|x| *x as u64).collect();
    let chunk = if chunk.is_empty() { shape.as_slice() } else { chunk };
    let (data_type, fill_value) = zarr_type(data.dtype());
    let array = ArrayBuilder::new(shape.clone(), data_type, make_chunk_grid(chunk)?, fill_value)
        .bytes_to_bytes_codecs(codecs)
        .build(node.clone(), path)?;
    array.store_metadata()?;
    match data {
        DynArray::I8(x) => store_elements!(array, x),
        DynArray::I16(x) => store_elements!(array, x),
        DynArray::I32(x) => store_elements!(array, x),
        DynArray::I64(x) => store_elements!(array, x),
        DynArray::U8(x) => store_elements!(array, x),
        DynArray::U16(x) => store_elements!(array, x),
        DynArray::U32(x) => store_elements!(array, x),
        DynArray::U64(x) => store_elements!(array, x),
        DynArray::F32(x) => store_elements!(array, x),
        DynArray::F64(x) => store_elements!(array, x),
        DynArray::Bool(x) => store_elements!(array, x),
        DynArray::String(x) => store_elements!(array, x),
    }
    Ok(())
}

macro_rules! retrieve_elements {
    ($array:expr, $shape:expr, $ty:ty) => {{
        let elements: Vec<$ty> = if $shape.iter().product::<usize>() == 0 {
            Vec::new()
        } else {
            $array.retrieve_array_subset_elements::<$ty>(&$array.subset_all())?
        };
        DynArray::from(ArrayD::from_shape_vec(IxDyn(&$shape), elements)?)
    }};
}

/// Read a whole Zarr array.
pub(crate) fn read_array(array: &Array<FilesystemStore>) -> Result<DynArray> {
    let shape: Vec<usize> = array.shape().iter().map(|x| *x as usize).collect();
    let data = match array.data_type() {
        DataType::Int8 => retrieve_elements!(array, shape, i8),
        DataType::Int16 => retrieve_elements!(array, shape, i16),
        DataType::Int32 => retrieve_elements!(array, shape, i32),
        DataType::Int64 => retrieve_elements!(array, shape, i64),
        DataType::UInt8 => retrieve_elements!(array, shape, u8),
        DataType::UInt16 => retrieve_elements!(array, shape, u16),
        DataType::UInt32 => retrieve_elements!(array, shape, u32),
        DataType::UInt64 => retrieve_elements!(array, shape, u64),
        DataType::Float32 => retrieve_elements!(array, shape, f32),
        DataType::Float64 => retrieve_elements!(array, shape, f64),
        DataType::Bool => retrieve_elements!(array, shape, bool),
        DataType::String => retrieve_elements!(array, shape, String),
        other => bail!("unsupported zarr data type: {:?}", other),
    };
    Ok(data)
}

fn empty_array(dtype: ScalarType) -> DynArray {
    match dtype {
        ScalarType::I8 => Vec::<i8>::new().into(),
        ScalarType::I16 => Vec::<i16>::new().into(),
        ScalarType::I32 => Vec::<i32>::new().into(),
        ScalarType::I64 => Vec::<i64>::new().into(),
        ScalarType::U8 => Vec::<u8>::new().into(),
        ScalarType::U16 => Vec::<u16>::new().into(),
        ScalarType::U32 => Vec::<u32>::new().into(),
        ScalarType::U64 => Vec::<u64>::new().into(),
        ScalarType::F32 => Vec::<f32>::new().into(),
        ScalarType::F64 => Vec::<f64>::new().into(),
        ScalarType::Bool => Vec::<bool>::new().into(),
        ScalarType::String => Vec::<String>::new().into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use tempfile::tempdir;

    fn store() -> ZarrStore {
        Zarr::new_store(ZarrConfig::default()).unwrap()
    }

    fn uri(dir: &Path, name: &str) -> String {
        dir.join(name).to_str().unwrap().to_string()
    }

    #[test]
    fn test_group_members() {
        let dir = tempdir().unwrap();
        let store = store();
        let root = uri(dir.path(), "root");
        let mut group = Zarr::create_group(&store, &root).unwrap();
        group.add_member("X", &uri_join(&root, "X"), false).unwrap();
        group.add_member("obs", &uri_join(&root, "obs"), false).unwrap();
        assert!(group.add_member("X", "elsewhere", false).is_err());
        group.close().unwrap();

        let members = Zarr::read_members(&store, &root).unwrap();
        assert_eq!(
            members.iter().map(|m| m.name.as_str()).collect::<Vec<_>>(),
            vec!["X", "obs"]
        );
        assert!(members.iter().all(|m| !m.relative));
        assert_eq!(members[0].uri, format!("{}/X", root));
    }

    #[test]
    fn test_exclusive_create() {
        let dir = tempdir().unwrap();
        let store = store();
        let root = uri(dir.path(), "root");
        Zarr::create_group(&store, &root).unwrap().close().unwrap();
        let err = Zarr::create_group(&store, &root).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<IngestError>(),
            Some(IngestError::TargetExists(_))
        ));
        assert!(Zarr::exists(&store, &root).unwrap());
    }

    #[test]
    fn test_concurrent_create() {
        let dir = tempdir().unwrap();
        let root = uri(dir.path(), "shared");
        let barrier = Barrier::new(8);
        let created = AtomicUsize::new(0);
        let rejected = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    let store = store();
                    barrier.wait();
                    match Zarr::create_group(&store, &root) {
                        Ok(group) => {
                            group.close().unwrap();
                            created.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(e) => {
                            assert!(matches!(
                                e.downcast_ref::<IngestError>(),
                                Some(IngestError::TargetExists(_))
                            ));
                            rejected.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(rejected.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_sparse_array() {
        let dir = tempdir().unwrap();
        let store = Zarr::new_store(ZarrConfig {
            chunk_size: 2,
            ..Default::default()
        })
        .unwrap();
        let uri = uri(dir.path(), "obs");
        let schema = ArraySchema::new_sparse(
            vec![Dimension::new("obs_id", ScalarType::String)
                .with_filters(vec![Filter::Zstd { level: -1 }])],
            vec![
                Attribute::new("n_genes", ScalarType::U32),
                Attribute::new("keep", ScalarType::Bool).with_filters(vec![Filter::Rle]),
            ],
        );
        let array = Zarr::create_sparse_array(&store, &uri, &schema).unwrap();
        let fragment = SparseFragment::new()
            .with_coord("obs_id", vec!["a".to_string(), "b".to_string(), "c".to_string()])
            .with_attr("n_genes", vec![3u32, 1, 2])
            .with_attr("keep", vec![true, false, true]);
        array.write(&fragment).unwrap();

        let (schema_in, fragment_in) = Zarr::read_sparse(&store, &uri).unwrap();
        assert_eq!(schema_in, schema);
        assert_eq!(fragment_in, fragment);
    }

    #[test]
    fn test_unwritten_sparse_array() {
        let dir = tempdir().unwrap();
        let store = store();
        let uri = uri(dir.path(), "var");
        let schema = ArraySchema::new_sparse(
            vec![Dimension::new("var_id", ScalarType::String)],
            vec![],
        );
        Zarr::create_sparse_array(&store, &uri, &schema).unwrap();
        let (_, fragment) = Zarr::read_sparse(&store, &uri).unwrap();
        assert!(fragment.is_empty());
        assert_eq!(fragment.coords[0].1.dtype(), ScalarType::String);
    }

    #[test]
    fn test_dense_array() {
        let dir = tempdir().unwrap();
        let store = store();
        let uri = uri(dir.path(), "X_pca");
        let data: DynArray = array![[1.5f64, 2.0], [3.0, 4.0], [5.0, 6.0]].into_dyn().into();
        Zarr::write_dense_array(&store, &uri, &data).unwrap();
        assert_eq!(Zarr::read_dense(&store, &uri).unwrap(), data);
        assert!(Zarr::write_dense_array(&store, &uri, &data).is_err());

        let uri = uri_join(&uri_join(dir.path().to_str().unwrap(), "m"), "labels");
        let data: DynArray = array!["x".to_string(), "y".to_string()].into_dyn().into();
        Zarr::write_dense_array(&store, &uri, &data).unwrap();
        assert_eq!(Zarr::read_dense(&store, &uri).unwrap(), data);
    }

    #[test]
    fn test_codecs() {
        let config = ZarrConfig::default();
        assert_eq!(
            codecs_for(&[Filter::DoubleDelta, Filter::BitWidthReduction, Filter::Zstd { level: -1 }], &config)
                .len(),
            1
        );
        assert!(codecs_for(&[Filter::Rle], &config).is_empty());
    }

    #[test]
    fn test_remote_uri_rejected() {
        let store = store();
        assert!(Zarr::create_group(&store, "s3://bucket/data").is_err());
    }
}
