use crate::backend::{BackendData, ScalarType};

use anyhow::{anyhow, bail, Result};
use ndarray::{Array1, ArrayD};
use paste::paste;
use std::collections::HashMap;

/// A dynamic-typed array.
#[derive(Debug, Clone, PartialEq)]
pub enum DynArray {
    I8(ArrayD<i8>),
    I16(ArrayD<i16>),
    I32(ArrayD<i32>),
    I64(ArrayD<i64>),
    U8(ArrayD<u8>),
    U16(ArrayD<u16>),
    U32(ArrayD<u32>),
    U64(ArrayD<u64>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
    Bool(ArrayD<bool>),
    String(ArrayD<String>),
}

macro_rules! impl_dynarray_into_array {
    ($($variant:ident, $scalar_ty:ident),*) => {
        $(
            paste! {
                pub fn [<as_ $scalar_ty:lower>](&self) -> Result<&ArrayD<$scalar_ty>> {
                    match self {
                        DynArray::$variant(x) => Ok(x),
                        v => bail!("Cannot convert {} to {}", v.dtype(), stringify!($scalar_ty)),
                    }
                }
            }
        )*
    };
}

impl DynArray {
    pub fn dtype(&self) -> ScalarType {
        match self {
            DynArray::I8(_) => ScalarType::I8,
            DynArray::I16(_) => ScalarType::I16,
            DynArray::I32(_) => ScalarType::I32,
            DynArray::I64(_) => ScalarType::I64,
            DynArray::U8(_) => ScalarType::U8,
            DynArray::U16(_) => ScalarType::U16,
            DynArray::U32(_) => ScalarType::U32,
            DynArray::U64(_) => ScalarType::U64,
            DynArray::F32(_) => ScalarType::F32,
            DynArray::F64(_) => ScalarType::F64,
            DynArray::Bool(_) => ScalarType::Bool,
            DynArray::String(_) => ScalarType::String,
        }
    }

    pub fn ndim(&self) -> usize {
        crate::macros::dyn_map_fun!(self, DynArray, ndim)
    }

    pub fn shape(&self) -> Vec<usize> {
        crate::macros::dyn_map_fun!(self, DynArray, shape).to_vec()
    }

    pub fn len(&self) -> usize {
        crate::macros::dyn_map_fun!(self, DynArray, len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elements in row-major order, converted to `f32`. Booleans become 0 or 1.
    pub fn to_f32_vec(&self) -> Result<Vec<f32>> {
        let values: Vec<f32> = crate::macros::dyn_map_numeric!(
            self,
            DynArray,
            |x| x.iter().map(|v| *v as f32).collect(),
            match self {
                DynArray::Bool(x) => x.iter().map(|v| if *v { 1.0 } else { 0.0 }).collect(),
                v => bail!("Cannot convert {} array to f32", v.dtype()),
            }
        );
        Ok(values)
    }

    /// Row-major element keys, equal iff the elements are equal.
    pub(crate) fn element_keys(&self) -> Vec<String> {
        match self {
            DynArray::String(x) => x.iter().cloned().collect(),
            DynArray::Bool(x) => x.iter().map(|v| v.to_string()).collect(),
            v => crate::macros::dyn_map_numeric!(
                v,
                DynArray,
                |x| x.iter().map(|e| format!("{:?}", e)).collect(),
                Vec::new()
            ),
        }
    }

    impl_dynarray_into_array!(
        I8, i8, I16, i16, I32, i32, I64, i64, U8, u8, U16, u16, U32, u32, U64, u64, F32, f32, F64,
        f64, Bool, bool, String, String
    );
}

impl<T: BackendData> From<ArrayD<T>> for DynArray {
    fn from(data: ArrayD<T>) -> Self {
        T::into_dyn_arr(data)
    }
}

impl<T: BackendData> From<Array1<T>> for DynArray {
    fn from(data: Array1<T>) -> Self {
        T::into_dyn_arr(data.into_dyn())
    }
}

impl<T: BackendData> From<Vec<T>> for DynArray {
    fn from(data: Vec<T>) -> Self {
        T::into_dyn_arr(Array1::from_vec(data).into_dyn())
    }
}

/// An array of integer codes into a small set of category values.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoricalArray {
    pub codes: ArrayD<u32>,
    pub categories: Array1<String>,
}

impl CategoricalArray {
    pub fn shape(&self) -> Vec<usize> {
        self.codes.shape().to_vec()
    }

    /// Replace every code by the category value it refers to.
    pub fn decode(&self) -> Result<ArrayD<String>> {
        let values = self
            .codes
            .iter()
            .map(|&i| {
                self.categories.get(i as usize).cloned().ok_or_else(|| {
                    anyhow!(
                        "categorical code {} out of range for {} categories",
                        i,
                        self.categories.len()
                    )
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ArrayD::from_shape_vec(self.codes.raw_dim(), values)?)
    }
}

impl<'a> FromIterator<&'a str> for CategoricalArray {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = &'a str>,
    {
        let mut str_to_id = HashMap::new();
        let mut counter = 0;
        let codes: Array1<u32> = iter
            .into_iter()
            .map(|x| {
                let str = x.to_string();
                match str_to_id.get(&str) {
                    Some(v) => *v,
                    None => {
                        let v = counter;
                        str_to_id.insert(str, v);
                        counter += 1;
                        v
                    }
                }
            })
            .collect();
        let mut categories = str_to_id.drain().collect::<Vec<_>>();
        categories.sort_by_key(|x| x.1);
        CategoricalArray {
            codes: codes.into_dyn(),
            categories: categories.into_iter().map(|x| x.0).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_categorical_decode() {
        let cat: CategoricalArray = ["b", "a", "b", "c"].into_iter().collect();
        assert_eq!(cat.categories.to_vec(), vec!["b", "a", "c"]);
        assert_eq!(cat.codes.iter().copied().collect::<Vec<_>>(), vec![0, 1, 0, 2]);
        let decoded = cat.decode().unwrap();
        assert_eq!(decoded.iter().cloned().collect::<Vec<_>>(), vec!["b", "a", "b", "c"]);
    }

    #[test]
    fn test_categorical_out_of_range() {
        let cat = CategoricalArray {
            codes: array![0u32, 3].into_dyn(),
            categories: array!["x".to_string()],
        };
        assert!(cat.decode().is_err());
    }

    #[test]
    fn test_to_f32() {
        let arr: DynArray = array![[1i64, 0], [0, 2]].into_dyn().into();
        assert_eq!(arr.to_f32_vec().unwrap(), vec![1.0, 0.0, 0.0, 2.0]);
        let arr: DynArray = array![true, false].into_dyn().into();
        assert_eq!(arr.to_f32_vec().unwrap(), vec![1.0, 0.0]);
        let arr: DynArray = vec!["a".to_string()].into();
        assert!(arr.to_f32_vec().is_err());
    }
}
