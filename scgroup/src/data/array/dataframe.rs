use crate::data::array::DynArray;
use crate::error::IngestError;

use anyhow::{bail, Result};
use ndarray::Array1;
use polars::datatypes::DataType;
use polars::prelude::Series;
use std::collections::{HashMap, HashSet};

macro_rules! collect_non_null {
    ($series:expr, $accessor:ident) => {{
        let name = $series.name();
        $series
            .$accessor()?
            .into_iter()
            .map(|x| {
                x.ok_or_else(|| {
                    anyhow::Error::from(IngestError::unsupported(
                        format!("column '{}'", name),
                        "integer or boolean with missing values",
                    ))
                })
            })
            .collect::<Result<Array1<_>>>()?
            .into_dyn()
            .into()
    }};
}

/// Convert a table column to a one-dimensional array, preserving its element type.
///
/// Missing floats become `NaN` and missing strings become empty strings. Integer and
/// boolean columns must not contain missing values.
pub fn series_to_dyn_array(series: &Series) -> Result<DynArray> {
    let array: DynArray = match series.dtype() {
        DataType::UInt8 => collect_non_null!(series, u8),
        DataType::UInt16 => collect_non_null!(series, u16),
        DataType::UInt32 => collect_non_null!(series, u32),
        DataType::UInt64 => collect_non_null!(series, u64),
        DataType::Int8 => collect_non_null!(series, i8),
        DataType::Int16 => collect_non_null!(series, i16),
        DataType::Int32 => collect_non_null!(series, i32),
        DataType::Int64 => collect_non_null!(series, i64),
        DataType::Boolean => collect_non_null!(series, bool),
        DataType::Float32 => series
            .f32()?
            .into_iter()
            .map(|x| x.unwrap_or(f32::NAN))
            .collect::<Array1<_>>()
            .into_dyn()
            .into(),
        DataType::Float64 => series
            .f64()?
            .into_iter()
            .map(|x| x.unwrap_or(f64::NAN))
            .collect::<Array1<_>>()
            .into_dyn()
            .into(),
        DataType::String => series
            .str()?
            .into_iter()
            .map(|x| x.unwrap_or_default().to_string())
            .collect::<Array1<_>>()
            .into_dyn()
            .into(),
        other => bail!(IngestError::unsupported(
            format!("column '{}'", series.name()),
            other
        )),
    };
    Ok(array)
}

/// Ordered row labels of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFrameIndex {
    pub index_name: String,
    names: Vec<String>,
}

impl DataFrameIndex {
    pub fn new(index_name: &str, names: Vec<String>) -> Self {
        Self {
            index_name: index_name.to_string(),
            names,
        }
    }

    pub fn empty() -> Self {
        Self::new("index", Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn get_index(&self, k: &str) -> Option<usize> {
        self.names.iter().position(|x| x == k)
    }

    pub fn into_vec(self) -> Vec<String> {
        self.names
    }

    pub fn is_unique(&self) -> bool {
        let mut seen = HashSet::with_capacity(self.names.len());
        self.names.iter().all(|x| seen.insert(x.as_str()))
    }

    /// Rename repeated labels to `label-1`, `label-2`, ... in order of appearance. The first
    /// occurrence keeps its name and generated names never collide with existing labels.
    /// Returns the number of renamed labels.
    pub fn make_unique(&mut self) -> usize {
        let mut taken: HashSet<String> = self.names.iter().cloned().collect();
        let mut first_seen = HashSet::with_capacity(self.names.len());
        let mut counter: HashMap<String, usize> = HashMap::new();
        let mut renamed = 0;
        for name in self.names.iter_mut() {
            if first_seen.insert(name.clone()) {
                continue;
            }
            let k = counter.entry(name.clone()).or_insert(0);
            let new_name = loop {
                *k += 1;
                let candidate = format!("{}-{}", name, k);
                if !taken.contains(&candidate) {
                    break candidate;
                }
            };
            taken.insert(new_name.clone());
            *name = new_name;
            renamed += 1;
        }
        renamed
    }
}

impl IntoIterator for DataFrameIndex {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.names.into_iter()
    }
}

impl From<Vec<String>> for DataFrameIndex {
    fn from(names: Vec<String>) -> Self {
        Self::new("index", names)
    }
}

impl<'a> FromIterator<&'a str> for DataFrameIndex {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = &'a str>,
    {
        iter.into_iter().map(|x| x.to_string()).collect::<Vec<_>>().into()
    }
}

impl FromIterator<String> for DataFrameIndex {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = String>,
    {
        iter.into_iter().collect::<Vec<_>>().into()
    }
}
