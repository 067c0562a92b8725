use crate::data::DynArray;

use anyhow::{bail, Result};
use core::fmt::{Display, Formatter};
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

/// All element types that can be stored as a dimension or an attribute.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Bool,
    String,
}

impl ScalarType {
    pub fn is_numeric(&self) -> bool {
        !matches!(self, ScalarType::Bool | ScalarType::String)
    }
}

impl Display for ScalarType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalarType::I8 => write!(f, "i8"),
            ScalarType::I16 => write!(f, "i16"),
            ScalarType::I32 => write!(f, "i32"),
            ScalarType::I64 => write!(f, "i64"),
            ScalarType::U8 => write!(f, "u8"),
            ScalarType::U16 => write!(f, "u16"),
            ScalarType::U32 => write!(f, "u32"),
            ScalarType::U64 => write!(f, "u64"),
            ScalarType::F32 => write!(f, "f32"),
            ScalarType::F64 => write!(f, "f64"),
            ScalarType::Bool => write!(f, "bool"),
            ScalarType::String => write!(f, "string"),
        }
    }
}

/// Rust types with a storage representation.
pub trait BackendData: Send + Sync + Clone + 'static {
    const DTYPE: ScalarType;
    fn into_dyn_arr(arr: ArrayD<Self>) -> DynArray;
    fn from_dyn_arr(arr: DynArray) -> Result<ArrayD<Self>>;
}

macro_rules! impl_backend_data {
    ($($ty:ty, $variant:ident),*) => {
        $(
            impl BackendData for $ty {
                const DTYPE: ScalarType = ScalarType::$variant;

                fn into_dyn_arr(arr: ArrayD<Self>) -> DynArray {
                    DynArray::$variant(arr)
                }

                fn from_dyn_arr(arr: DynArray) -> Result<ArrayD<Self>> {
                    match arr {
                        DynArray::$variant(x) => Ok(x),
                        v => bail!("Expecting {} array, found {}", ScalarType::$variant, v.dtype()),
                    }
                }
            }
        )*
    };
}

impl_backend_data!(
    i8, I8, i16, I16, i32, I32, i64, I64, u8, U8, u16, U16, u32, U32, u64, U64, f32, F32, f64, F64,
    bool, Bool, String, String
);
