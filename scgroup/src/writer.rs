//! Writers that map each part of a dataset onto arrays and groups of a backend.
mod annotation;
mod axis_table;
mod x;

pub use annotation::write_annotation_matrices;
pub use axis_table::{axis_table_schema, write_obs_or_var};
pub use x::{write_x, write_x_array, x_array_schema};
