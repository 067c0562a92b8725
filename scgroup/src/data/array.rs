mod dataframe;
mod dense;

pub use dataframe::{series_to_dyn_array, DataFrameIndex};
pub use dense::{CategoricalArray, DynArray};

use crate::backend::{BackendData, ScalarType};

use anyhow::Result;
use nalgebra_sparse::{CscMatrix, CsrMatrix};
use ndarray::{Array, Array2, Dimension};

/// A matrix-like value held by a dataset: dense, categorical, or one of the compressed
/// sparse encodings.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Array(DynArray),
    Categorical(CategoricalArray),
    CsrMatrix(CsrMatrix<f64>),
    CscMatrix(CscMatrix<f64>),
}

impl From<DynArray> for ArrayData {
    fn from(data: DynArray) -> Self {
        ArrayData::Array(data)
    }
}

impl From<CategoricalArray> for ArrayData {
    fn from(data: CategoricalArray) -> Self {
        ArrayData::Categorical(data)
    }
}

impl From<CsrMatrix<f64>> for ArrayData {
    fn from(data: CsrMatrix<f64>) -> Self {
        ArrayData::CsrMatrix(data)
    }
}

impl From<CscMatrix<f64>> for ArrayData {
    fn from(data: CscMatrix<f64>) -> Self {
        ArrayData::CscMatrix(data)
    }
}

impl<T: BackendData, D: Dimension> From<Array<T, D>> for ArrayData {
    fn from(data: Array<T, D>) -> Self {
        ArrayData::Array(T::into_dyn_arr(data.into_dyn()))
    }
}

impl ArrayData {
    pub fn shape(&self) -> Vec<usize> {
        match self {
            ArrayData::Array(x) => x.shape(),
            ArrayData::Categorical(x) => x.shape(),
            ArrayData::CsrMatrix(x) => vec![x.nrows(), x.ncols()],
            ArrayData::CscMatrix(x) => vec![x.nrows(), x.ncols()],
        }
    }

    /// Element type of the dense representation.
    pub fn dtype(&self) -> ScalarType {
        match self {
            ArrayData::Array(x) => x.dtype(),
            ArrayData::Categorical(_) => ScalarType::String,
            ArrayData::CsrMatrix(_) | ArrayData::CscMatrix(_) => ScalarType::F64,
        }
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, ArrayData::CsrMatrix(_) | ArrayData::CscMatrix(_))
    }

    /// Dense row-major representation. Sparse matrices are expanded with explicit zeros and
    /// categorical arrays are decoded to their category values.
    pub fn to_dense(&self) -> Result<DynArray> {
        let arr = match self {
            ArrayData::Array(x) => x.clone(),
            ArrayData::Categorical(x) => x.decode()?.into(),
            ArrayData::CsrMatrix(x) => {
                let mut out = Array2::<f64>::zeros((x.nrows(), x.ncols()));
                x.triplet_iter().for_each(|(i, j, v)| out[[i, j]] = *v);
                out.into_dyn().into()
            }
            ArrayData::CscMatrix(x) => {
                let mut out = Array2::<f64>::zeros((x.nrows(), x.ncols()));
                x.triplet_iter().for_each(|(i, j, v)| out[[i, j]] = *v);
                out.into_dyn().into()
            }
        };
        Ok(arr)
    }
}
