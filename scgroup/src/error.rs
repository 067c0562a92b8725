use thiserror::Error;

/// Failures of the ingestion pipeline that callers may want to tell apart.
///
/// These travel inside `anyhow::Error`; use `err.downcast_ref::<IngestError>()` to inspect them.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("'{0}' already exists")]
    TargetExists(String),

    #[error("shape mismatch in {what}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        what: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("cannot store {what}: unsupported type {dtype}")]
    UnsupportedType { what: String, dtype: String },

    #[error("duplicate coordinate ({coordinate}) written to '{uri}'")]
    DuplicateCoordinate { uri: String, coordinate: String },
}

impl IngestError {
    pub(crate) fn shape_mismatch(what: impl Into<String>, expected: &[usize], found: &[usize]) -> Self {
        IngestError::ShapeMismatch {
            what: what.into(),
            expected: expected.to_vec(),
            found: found.to_vec(),
        }
    }

    pub(crate) fn unsupported(what: impl Into<String>, dtype: impl ToString) -> Self {
        IngestError::UnsupportedType {
            what: what.into(),
            dtype: dtype.to_string(),
        }
    }
}
