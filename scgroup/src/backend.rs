mod datatype;
pub mod schema;

pub use datatype::{BackendData, ScalarType};
pub use schema::{ArraySchema, Attribute, Dimension, Filter};

use crate::data::DynArray;
use crate::dataset::Dataset;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::path::Path;

/// A named reference held by a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub name: String,
    pub uri: String,
    pub relative: bool,
}

/// Join a child name onto a parent URI.
pub fn uri_join(base: &str, name: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), name)
}

/// Columns of cells to be written to a sparse array, one column per dimension and per
/// attribute. All columns are one-dimensional and have the same length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseFragment {
    pub coords: Vec<(String, DynArray)>,
    pub attrs: Vec<(String, DynArray)>,
}

impl SparseFragment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_coord<A: Into<DynArray>>(mut self, name: &str, data: A) -> Self {
        self.coords.push((name.to_string(), data.into()));
        self
    }

    pub fn with_attr<A: Into<DynArray>>(mut self, name: &str, data: A) -> Self {
        self.attrs.push((name.to_string(), data.into()));
        self
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.coords
            .iter()
            .chain(self.attrs.iter())
            .next()
            .map_or(0, |(_, x)| x.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn coord(&self, name: &str) -> Option<&DynArray> {
        self.coords.iter().find(|(n, _)| n == name).map(|(_, x)| x)
    }

    pub fn attr(&self, name: &str) -> Option<&DynArray> {
        self.attrs.iter().find(|(n, _)| n == name).map(|(_, x)| x)
    }
}

pub trait Backend: 'static {
    /// The name of the backend.
    const NAME: &'static str;

    /// Options used to build a store.
    type Config: Default + Clone + Debug;

    /// Connection context shared by every writer of one run.
    type Store: Send + Sync;

    /// Groups hold named references to arrays and other groups.
    type Group: GroupOp<Self>;

    /// Arrays whose cells are addressed by typed coordinates.
    type SparseArray: SparseArrayOp<Self>;

    fn new_store(config: Self::Config) -> Result<Self::Store>;

    /// Create a group, open for writing. Fails with [`crate::IngestError::TargetExists`] if
    /// anything exists at `uri`.
    fn create_group(store: &Self::Store, uri: &str) -> Result<Self::Group>;

    /// Create an empty sparse array with the given schema.
    fn create_sparse_array(
        store: &Self::Store,
        uri: &str,
        schema: &ArraySchema,
    ) -> Result<Self::SparseArray>;

    /// Persist a dense array using the storage engine's default layout.
    fn write_dense_array(store: &Self::Store, uri: &str, data: &DynArray) -> Result<()>;

    /// Check if a group or array exists.
    fn exists(store: &Self::Store, uri: &str) -> Result<bool>;

    /// Members registered in a closed group.
    fn read_members(store: &Self::Store, uri: &str) -> Result<Vec<Member>>;

    /// Schema and full content of a sparse array.
    fn read_sparse(store: &Self::Store, uri: &str) -> Result<(ArraySchema, SparseFragment)>;

    fn read_dense(store: &Self::Store, uri: &str) -> Result<DynArray>;

    /// Read an annotated data matrix stored in this backend's native file format.
    fn read_anndata<P: AsRef<Path>>(path: P) -> Result<Dataset>;
}

pub trait GroupOp<B: Backend + ?Sized> {
    fn uri(&self) -> &str;

    /// Members registered so far, in registration order.
    fn members(&self) -> &[Member];

    /// Register a member. Names must be unique within the group.
    fn add_member(&mut self, name: &str, uri: &str, relative: bool) -> Result<()>;

    /// Seal the group and persist its membership.
    fn close(self) -> Result<()>;

    fn contains(&self, name: &str) -> bool {
        self.members().iter().any(|m| m.name == name)
    }
}

pub trait SparseArrayOp<B: Backend + ?Sized> {
    fn uri(&self) -> &str;

    fn schema(&self) -> &ArraySchema;

    /// Store a fragment that has already been checked against the schema. Replaces any
    /// previous content.
    fn write_fragment(&self, fragment: &SparseFragment) -> Result<()>;

    fn write(&self, fragment: &SparseFragment) -> Result<()> {
        self.schema().check(self.uri(), fragment)?;
        self.write_fragment(fragment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_join() {
        assert_eq!(uri_join("/tmp/a", "X"), "/tmp/a/X");
        assert_eq!(uri_join("/tmp/a/", "X"), "/tmp/a/X");
        assert_eq!(uri_join(&uri_join("s3://bucket/a", "X"), "data"), "s3://bucket/a/X/data");
    }

    #[test]
    fn test_fragment_len() {
        assert_eq!(SparseFragment::new().len(), 0);
        let frag = SparseFragment::new()
            .with_coord("obs_id", vec!["a".to_string(), "b".to_string()])
            .with_attr("value", vec![1.0f32, 2.0]);
        assert_eq!(frag.len(), 2);
        assert!(frag.coord("obs_id").is_some());
        assert!(frag.attr("obs_id").is_none());
    }
}
