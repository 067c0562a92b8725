use crate::data::{ArrayData, DataFrameIndex};
use crate::error::IngestError;

use anyhow::{bail, ensure, Result};
use indexmap::IndexMap;
use polars::prelude::DataFrame;
use serde_json::{Map, Value};

/// Named matrices aligned with one axis, in insertion order.
pub type AxisArrays = IndexMap<String, ArrayData>;

/// The four collections of auxiliary matrices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnnotationRole {
    Obsm,
    Varm,
    Obsp,
    Varp,
}

impl AnnotationRole {
    /// Write order of the collections.
    pub const ALL: [AnnotationRole; 4] = [
        AnnotationRole::Obsm,
        AnnotationRole::Varm,
        AnnotationRole::Obsp,
        AnnotationRole::Varp,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AnnotationRole::Obsm => "obsm",
            AnnotationRole::Varm => "varm",
            AnnotationRole::Obsp => "obsp",
            AnnotationRole::Varp => "varp",
        }
    }

    /// Pairwise collections hold square matrices.
    pub fn is_pairwise(&self) -> bool {
        matches!(self, AnnotationRole::Obsp | AnnotationRole::Varp)
    }

    fn is_obs(&self) -> bool {
        matches!(self, AnnotationRole::Obsm | AnnotationRole::Obsp)
    }
}

impl std::fmt::Display for AnnotationRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// An unprocessed counterpart of the primary matrix with its own axis labels.
#[derive(Debug, Clone, PartialEq)]
pub struct RawData {
    x: ArrayData,
    obs_names: DataFrameIndex,
    var_names: DataFrameIndex,
}

impl RawData {
    pub fn new(x: ArrayData, obs_names: DataFrameIndex, var_names: DataFrameIndex) -> Result<Self> {
        check_matrix_shape("raw/X", &x, obs_names.len(), var_names.len())?;
        Ok(Self {
            x,
            obs_names,
            var_names,
        })
    }

    pub fn x(&self) -> &ArrayData {
        &self.x
    }

    pub fn obs_names(&self) -> &DataFrameIndex {
        &self.obs_names
    }

    pub fn var_names(&self) -> &DataFrameIndex {
        &self.var_names
    }
}

/// An annotated data matrix: `n_obs` observations by `n_vars` variables, with per-axis
/// tables and auxiliary matrices.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub(crate) x: ArrayData,
    pub(crate) raw: Option<RawData>,
    pub(crate) obs: DataFrame,
    pub(crate) obs_names: DataFrameIndex,
    pub(crate) var: DataFrame,
    pub(crate) var_names: DataFrameIndex,
    pub(crate) obsm: AxisArrays,
    pub(crate) varm: AxisArrays,
    pub(crate) obsp: AxisArrays,
    pub(crate) varp: AxisArrays,
    pub(crate) uns: Map<String, Value>,
}

fn check_matrix_shape(what: &str, x: &ArrayData, n_obs: usize, n_vars: usize) -> Result<()> {
    let shape = x.shape();
    if shape != [n_obs, n_vars] {
        bail!(IngestError::shape_mismatch(what, &[n_obs, n_vars], &shape));
    }
    Ok(())
}

fn check_table(what: &str, df: &DataFrame, n: usize) -> Result<()> {
    if df.width() > 0 && df.height() != n {
        bail!(IngestError::shape_mismatch(what, &[n], &[df.height()]));
    }
    Ok(())
}

impl Dataset {
    pub fn new(x: ArrayData, obs_names: DataFrameIndex, var_names: DataFrameIndex) -> Result<Self> {
        check_matrix_shape("X", &x, obs_names.len(), var_names.len())?;
        Ok(Self {
            x,
            raw: None,
            obs: DataFrame::empty(),
            obs_names,
            var: DataFrame::empty(),
            var_names,
            obsm: AxisArrays::new(),
            varm: AxisArrays::new(),
            obsp: AxisArrays::new(),
            varp: AxisArrays::new(),
            uns: Map::new(),
        })
    }

    pub fn with_raw(mut self, raw: RawData) -> Self {
        self.raw = Some(raw);
        self
    }

    pub fn with_obs(mut self, obs: DataFrame) -> Result<Self> {
        check_table("obs", &obs, self.n_obs())?;
        self.obs = obs;
        Ok(self)
    }

    pub fn with_var(mut self, var: DataFrame) -> Result<Self> {
        check_table("var", &var, self.n_vars())?;
        self.var = var;
        Ok(self)
    }

    pub fn with_uns(mut self, uns: Map<String, Value>) -> Self {
        self.uns = uns;
        self
    }

    /// Add a matrix to one of the auxiliary collections.
    pub fn with_annotation<A: Into<ArrayData>>(
        mut self,
        role: AnnotationRole,
        name: &str,
        data: A,
    ) -> Result<Self> {
        self.add_annotation(role, name, data.into())?;
        Ok(self)
    }

    pub fn add_annotation(&mut self, role: AnnotationRole, name: &str, data: ArrayData) -> Result<()> {
        let n = if role.is_obs() {
            self.n_obs()
        } else {
            self.n_vars()
        };
        let shape = data.shape();
        let what = format!("{}/{}", role, name);
        ensure!(!name.is_empty(), "empty name in {}", role);
        if role.is_pairwise() {
            if shape != [n, n] {
                bail!(IngestError::shape_mismatch(what, &[n, n], &shape));
            }
        } else if shape.first() != Some(&n) {
            bail!(IngestError::shape_mismatch(what, &[n], &shape));
        }
        self.annotations_mut(role).insert(name.to_string(), data);
        Ok(())
    }

    pub fn n_obs(&self) -> usize {
        self.obs_names.len()
    }

    pub fn n_vars(&self) -> usize {
        self.var_names.len()
    }

    pub fn x(&self) -> &ArrayData {
        &self.x
    }

    pub fn raw(&self) -> Option<&RawData> {
        self.raw.as_ref()
    }

    pub fn obs(&self) -> &DataFrame {
        &self.obs
    }

    pub fn obs_names(&self) -> &DataFrameIndex {
        &self.obs_names
    }

    pub fn var(&self) -> &DataFrame {
        &self.var
    }

    pub fn var_names(&self) -> &DataFrameIndex {
        &self.var_names
    }

    pub fn uns(&self) -> &Map<String, Value> {
        &self.uns
    }

    pub fn annotations(&self, role: AnnotationRole) -> &AxisArrays {
        match role {
            AnnotationRole::Obsm => &self.obsm,
            AnnotationRole::Varm => &self.varm,
            AnnotationRole::Obsp => &self.obsp,
            AnnotationRole::Varp => &self.varp,
        }
    }

    pub(crate) fn annotations_mut(&mut self, role: AnnotationRole) -> &mut AxisArrays {
        match role {
            AnnotationRole::Obsm => &mut self.obsm,
            AnnotationRole::Varm => &mut self.varm,
            AnnotationRole::Obsp => &mut self.obsp,
            AnnotationRole::Varp => &mut self.varp,
        }
    }

    /// Make variable names unique by appending `-1`, `-2`, ... to repeats.
    pub fn var_names_make_unique(&mut self) -> usize {
        self.var_names.make_unique()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::CategoricalArray;
    use nalgebra_sparse::{CooMatrix, CsrMatrix};
    use ndarray::{array, Array2};
    use polars::df;

    fn labels(prefix: &str, n: usize) -> DataFrameIndex {
        (0..n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    #[test]
    fn test_new_checks_shape() {
        let x: ArrayData = Array2::<f32>::zeros((3, 4)).into();
        assert!(Dataset::new(x.clone(), labels("c", 3), labels("g", 4)).is_ok());
        let err = Dataset::new(x, labels("c", 3), labels("g", 5)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IngestError>(),
            Some(IngestError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_tables_and_annotations() {
        let x: ArrayData = array![[1.0f64, 0.0], [0.0, 2.0], [3.0, 0.0]].into();
        let dataset = Dataset::new(x, labels("c", 3), labels("g", 2)).unwrap();

        let obs = df!("n_genes" => &[1i64, 2, 3]).unwrap();
        let bad = df!("n_genes" => &[1i64, 2]).unwrap();
        assert!(dataset.clone().with_obs(bad).is_err());
        let dataset = dataset.with_obs(obs).unwrap();
        assert_eq!(dataset.obs().height(), 3);

        let dataset = dataset
            .with_annotation(AnnotationRole::Obsm, "X_pca", Array2::<f64>::zeros((3, 5)))
            .unwrap()
            .with_annotation(
                AnnotationRole::Obsm,
                "louvain",
                ["a", "b", "a"].into_iter().collect::<CategoricalArray>(),
            )
            .unwrap();
        assert_eq!(dataset.annotations(AnnotationRole::Obsm).len(), 2);

        let coo = CooMatrix::try_from_triplets(3, 3, vec![0], vec![1], vec![1.0]).unwrap();
        let dataset = dataset
            .with_annotation(AnnotationRole::Obsp, "distances", CsrMatrix::from(&coo))
            .unwrap();
        assert!(dataset
            .clone()
            .with_annotation(AnnotationRole::Obsp, "bad", Array2::<f64>::zeros((3, 2)))
            .is_err());
        assert!(dataset
            .clone()
            .with_annotation(AnnotationRole::Varm, "bad", Array2::<f64>::zeros((3, 2)))
            .is_err());
        assert_eq!(
            AnnotationRole::ALL.map(|r| r.name()),
            ["obsm", "varm", "obsp", "varp"]
        );
    }

    #[test]
    fn test_raw_is_independent() {
        let x: ArrayData = Array2::<f32>::zeros((2, 2)).into();
        let raw_x: ArrayData = Array2::<f32>::zeros((2, 7)).into();
        let raw = RawData::new(raw_x, labels("c", 2), labels("r", 7)).unwrap();
        let dataset = Dataset::new(x, labels("c", 2), labels("g", 2))
            .unwrap()
            .with_raw(raw);
        assert_eq!(dataset.raw().unwrap().var_names().len(), 7);
        assert_eq!(dataset.raw().unwrap().x().shape(), vec![2, 7]);
        let err = RawData::new(
            Array2::<f32>::zeros((2, 2)).into(),
            labels("c", 2),
            labels("r", 3),
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IngestError>(),
            Some(IngestError::ShapeMismatch { .. })
        ));
    }
}
