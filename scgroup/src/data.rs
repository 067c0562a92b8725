mod array;

pub use array::{series_to_dyn_array, ArrayData, CategoricalArray, DataFrameIndex, DynArray};
