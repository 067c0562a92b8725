use super::{ScalarType, SparseFragment};
use crate::error::IngestError;

use anyhow::{bail, ensure, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Compression and encoding stages applied to a column before it reaches storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "id", rename_all = "snake_case")]
pub enum Filter {
    /// Zstandard with the given level. Negative levels are the fast modes; `-1` is what
    /// the writers in this crate ask for.
    Zstd { level: i32 },
    Rle,
    DoubleDelta,
    BitWidthReduction,
    PositiveDelta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub dtype: ScalarType,
    /// Inclusive bounds for numeric dimensions; `None` for unbounded (string) dimensions.
    pub domain: Option<(i64, i64)>,
    pub filters: Vec<Filter>,
}

impl Dimension {
    pub fn new(name: &str, dtype: ScalarType) -> Self {
        Self {
            name: name.to_string(),
            dtype,
            domain: None,
            filters: Vec::new(),
        }
    }

    pub fn with_filters(mut self, filters: Vec<Filter>) -> Self {
        self.filters = filters;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub dtype: ScalarType,
    pub filters: Vec<Filter>,
}

impl Attribute {
    pub fn new(name: &str, dtype: ScalarType) -> Self {
        Self {
            name: name.to_string(),
            dtype,
            filters: Vec::new(),
        }
    }

    pub fn with_filters(mut self, filters: Vec<Filter>) -> Self {
        self.filters = filters;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArraySchema {
    pub dimensions: Vec<Dimension>,
    pub attributes: Vec<Attribute>,
    pub sparse: bool,
    pub allows_duplicates: bool,
    /// Filters for the offsets of variable-length cells.
    pub offsets_filters: Vec<Filter>,
    /// Number of cells per data tile.
    pub capacity: u64,
}

impl ArraySchema {
    pub fn new_sparse(dimensions: Vec<Dimension>, attributes: Vec<Attribute>) -> Self {
        Self {
            dimensions,
            attributes,
            sparse: true,
            allows_duplicates: false,
            offsets_filters: Vec::new(),
            capacity: 10000,
        }
    }

    pub fn with_duplicates(mut self, allows_duplicates: bool) -> Self {
        self.allows_duplicates = allows_duplicates;
        self
    }

    pub fn with_offsets_filters(mut self, filters: Vec<Filter>) -> Self {
        self.offsets_filters = filters;
        self
    }

    /// Structural checks performed before an array is created.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.dimensions.is_empty(), "an array needs at least one dimension");
        ensure!(self.capacity > 0, "capacity must be positive");
        let mut names = HashSet::new();
        for name in self
            .dimensions
            .iter()
            .map(|d| &d.name)
            .chain(self.attributes.iter().map(|a| &a.name))
        {
            ensure!(!name.is_empty(), "empty dimension or attribute name");
            ensure!(names.insert(name.as_str()), "duplicated field name '{}'", name);
        }
        for dim in &self.dimensions {
            if let Some((lo, hi)) = dim.domain {
                ensure!(dim.dtype.is_numeric(), "domain given for non-numeric dimension '{}'", dim.name);
                ensure!(lo <= hi, "empty domain for dimension '{}'", dim.name);
            }
        }
        Ok(())
    }

    /// Check a fragment against this schema before it is written to the array at `uri`.
    pub fn check(&self, uri: &str, fragment: &SparseFragment) -> Result<()> {
        let n = fragment.len();
        let coord_names: Vec<_> = fragment.coords.iter().map(|(n, _)| n.as_str()).collect();
        let dim_names: Vec<_> = self.dimensions.iter().map(|d| d.name.as_str()).collect();
        ensure!(
            coord_names == dim_names,
            "'{}': expecting coordinates {:?}, found {:?}",
            uri,
            dim_names,
            coord_names
        );
        let attr_names: Vec<_> = fragment.attrs.iter().map(|(n, _)| n.as_str()).collect();
        let schema_attr_names: Vec<_> = self.attributes.iter().map(|a| a.name.as_str()).collect();
        ensure!(
            attr_names == schema_attr_names,
            "'{}': expecting attributes {:?}, found {:?}",
            uri,
            schema_attr_names,
            attr_names
        );

        let expected = self
            .dimensions
            .iter()
            .map(|d| d.dtype)
            .chain(self.attributes.iter().map(|a| a.dtype));
        for ((name, column), dtype) in fragment.coords.iter().chain(fragment.attrs.iter()).zip(expected) {
            ensure!(column.ndim() == 1, "'{}': column '{}' is not one-dimensional", uri, name);
            if column.len() != n {
                bail!(IngestError::shape_mismatch(
                    format!("column '{}' of '{}'", name, uri),
                    &[n],
                    &[column.len()]
                ));
            }
            ensure!(
                column.dtype() == dtype,
                "'{}': column '{}' has type {}, expecting {}",
                uri,
                name,
                column.dtype(),
                dtype
            );
        }

        if !self.allows_duplicates {
            let keys: Vec<_> = fragment.coords.iter().map(|(_, x)| x.element_keys()).collect();
            let mut seen = HashSet::with_capacity(n);
            for i in 0..n {
                let coordinate = keys.iter().map(|k| k[i].as_str()).collect::<Vec<_>>().join(", ");
                if !seen.insert(coordinate.clone()) {
                    bail!(IngestError::DuplicateCoordinate {
                        uri: uri.to_string(),
                        coordinate,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_schema() -> ArraySchema {
        ArraySchema::new_sparse(
            vec![Dimension::new("obs_id", ScalarType::String)
                .with_filters(vec![Filter::Zstd { level: -1 }])],
            vec![Attribute::new("n_genes", ScalarType::I64)],
        )
    }

    fn names(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn test_validate() {
        assert!(table_schema().validate().is_ok());
        let mut schema = table_schema();
        schema.attributes.push(Attribute::new("obs_id", ScalarType::F32));
        assert!(schema.validate().is_err());
        let mut schema = table_schema();
        schema.dimensions[0].domain = Some((0, 10));
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_check_duplicates() {
        let frag = SparseFragment::new()
            .with_coord("obs_id", names(&["a", "b", "a"]))
            .with_attr("n_genes", vec![1i64, 2, 3]);
        let err = table_schema().check("t", &frag).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IngestError>(),
            Some(IngestError::DuplicateCoordinate { .. })
        ));
        assert!(table_schema().with_duplicates(true).check("t", &frag).is_ok());
    }

    #[test]
    fn test_check_columns() {
        let frag = SparseFragment::new()
            .with_coord("obs_id", names(&["a", "b"]))
            .with_attr("n_genes", vec![1i64]);
        let err = table_schema().check("t", &frag).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IngestError>(),
            Some(IngestError::ShapeMismatch { .. })
        ));

        let frag = SparseFragment::new()
            .with_coord("obs_id", names(&["a"]))
            .with_attr("n_genes", vec![1.0f32]);
        assert!(table_schema().check("t", &frag).is_err());

        let frag = SparseFragment::new().with_coord("obs_id", names(&["a"]));
        assert!(table_schema().check("t", &frag).is_err());
    }

    #[test]
    fn test_serde() {
        let schema = table_schema().with_offsets_filters(vec![
            Filter::PositiveDelta,
            Filter::Zstd { level: -1 },
        ]);
        let json = serde_json::to_value(&schema).unwrap();
        assert_eq!(json["dimensions"][0]["dtype"], "string");
        assert_eq!(json["offsets_filters"][0]["id"], "positive_delta");
        assert_eq!(json["offsets_filters"][1]["level"], -1);
        let back: ArraySchema = serde_json::from_value(json).unwrap();
        assert_eq!(back, schema);
    }
}
