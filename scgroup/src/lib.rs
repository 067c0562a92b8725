mod dataset;
mod macros;
pub mod backend;
pub mod data;
pub mod error;
pub mod normalize;
pub mod reader;
mod scgroup;
pub mod writer;

pub use backend::{ArraySchema, Backend, GroupOp, Member, SparseArrayOp, SparseFragment};
pub use data::{ArrayData, CategoricalArray, DataFrameIndex, DynArray};
pub use dataset::{AnnotationRole, AxisArrays, Dataset, RawData};
pub use error::IngestError;
pub use normalize::decategoricalize;
pub use reader::{read_10x_mtx, read_dataset, FileFormat};
pub use crate::scgroup::{ingest_from_dataset, ingest_from_file, SCGroup};
