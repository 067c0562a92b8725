use crate::data::ArrayData;
use crate::dataset::{AnnotationRole, AxisArrays, Dataset};

use anyhow::{Context, Result};
use log::debug;
use polars::prelude::{DataFrame, DataType, Series};

fn is_categorical(dtype: &DataType) -> bool {
    matches!(dtype, DataType::Categorical(_, _) | DataType::Enum(_, _))
}

fn uncat_frame(df: &DataFrame) -> Result<DataFrame> {
    if !df.get_columns().iter().any(|s| is_categorical(s.dtype())) {
        return Ok(df.clone());
    }
    let columns = df
        .get_columns()
        .iter()
        .map(|s| {
            if is_categorical(s.dtype()) {
                debug!("Converting categorical column '{}' to strings", s.name());
                s.cast(&DataType::String)
                    .with_context(|| format!("cannot decode column '{}'", s.name()))
            } else {
                Ok(s.clone())
            }
        })
        .collect::<Result<Vec<Series>>>()?;
    Ok(DataFrame::new(columns)?)
}

fn uncat_array(name: &str, data: &ArrayData) -> Result<ArrayData> {
    match data {
        ArrayData::Categorical(x) => {
            debug!("Converting categorical matrix '{}' to strings", name);
            let decoded = x
                .decode()
                .with_context(|| format!("cannot decode matrix '{}'", name))?;
            Ok(ArrayData::Array(decoded.into()))
        }
        _ => Ok(data.clone()),
    }
}

/// Return a copy of the dataset in which every categorical column of `obs` and `var`, and every
/// categorical matrix of `obsm`, `varm`, `obsp` and `varp`, is replaced by its string values.
/// `X`, `raw` and `uns` are carried over unchanged.
pub fn decategoricalize(dataset: &Dataset) -> Result<Dataset> {
    let mut result = dataset.clone();
    result.obs = uncat_frame(&dataset.obs).context("cannot decategoricalize obs")?;
    result.var = uncat_frame(&dataset.var).context("cannot decategoricalize var")?;
    for role in AnnotationRole::ALL {
        let converted: AxisArrays = dataset
            .annotations(role)
            .iter()
            .map(|(k, v)| Ok((k.clone(), uncat_array(&format!("{}/{}", role, k), v)?)))
            .collect::<Result<_>>()?;
        *result.annotations_mut(role) = converted;
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CategoricalArray, DataFrameIndex, DynArray};
    use ndarray::{array, Array2};
    use polars::prelude::*;

    fn dataset() -> Dataset {
        let obs_names: DataFrameIndex = ["c1", "c2", "c3"].into_iter().collect();
        let var_names: DataFrameIndex = ["g1", "g2"].into_iter().collect();
        let cell_type = Series::new("cell_type", &["T", "B", "T"])
            .cast(&DataType::Categorical(None, CategoricalOrdering::Physical))
            .unwrap();
        let n_counts = Series::new("n_counts", &[10i32, 20, 30]);
        let rev_map = cell_type.categorical().unwrap().get_rev_map().clone();
        let phase = Series::new("phase", &["B", "T", "B"])
            .cast(&DataType::Enum(Some(rev_map), CategoricalOrdering::Physical))
            .unwrap();
        let obs = DataFrame::new(vec![cell_type, n_counts, phase]).unwrap();
        Dataset::new(Array2::<f32>::zeros((3, 2)).into(), obs_names, var_names)
            .unwrap()
            .with_obs(obs)
            .unwrap()
            .with_annotation(
                AnnotationRole::Obsm,
                "cluster",
                ["a", "b", "a"].into_iter().collect::<CategoricalArray>(),
            )
            .unwrap()
            .with_annotation(AnnotationRole::Varm, "PCs", Array2::<f64>::ones((2, 3)))
            .unwrap()
    }

    #[test]
    fn test_decategoricalize() {
        let input = dataset();
        let output = decategoricalize(&input).unwrap();

        let col = output.obs().column("cell_type").unwrap();
        assert_eq!(col.dtype(), &DataType::String);
        assert_eq!(
            col.str().unwrap().into_no_null_iter().collect::<Vec<_>>(),
            vec!["T", "B", "T"]
        );
        assert_eq!(output.obs().column("n_counts").unwrap().dtype(), &DataType::Int32);
        let phase = output.obs().column("phase").unwrap();
        assert_eq!(phase.dtype(), &DataType::String);
        assert_eq!(
            phase.str().unwrap().into_no_null_iter().collect::<Vec<_>>(),
            vec!["B", "T", "B"]
        );

        let cluster = &output.annotations(AnnotationRole::Obsm)["cluster"];
        assert_eq!(
            cluster,
            &ArrayData::Array(DynArray::from(vec![
                "a".to_string(),
                "b".to_string(),
                "a".to_string()
            ]))
        );
        assert_eq!(
            output.annotations(AnnotationRole::Varm)["PCs"],
            input.annotations(AnnotationRole::Varm)["PCs"]
        );

        // input untouched
        assert!(matches!(
            input.obs().column("cell_type").unwrap().dtype(),
            DataType::Categorical(_, _)
        ));
        assert!(matches!(
            input.obs().column("phase").unwrap().dtype(),
            DataType::Enum(_, _)
        ));
    }

    #[test]
    fn test_idempotent() {
        let once = decategoricalize(&dataset()).unwrap();
        let twice = decategoricalize(&once).unwrap();
        assert!(once.obs().equals(twice.obs()));
        assert!(once.var().equals(twice.var()));
        for role in AnnotationRole::ALL {
            assert_eq!(once.annotations(role), twice.annotations(role));
        }
        assert_eq!(once.x(), twice.x());
    }

    #[test]
    fn test_invalid_code() {
        let bad = CategoricalArray {
            codes: array![0u32, 5, 0].into_dyn(),
            categories: array!["a".to_string()],
        };
        let input = Dataset::new(
            Array2::<f32>::zeros((3, 1)).into(),
            ["c1", "c2", "c3"].into_iter().collect(),
            ["g1"].into_iter().collect(),
        )
        .unwrap()
        .with_annotation(AnnotationRole::Obsm, "bad", bad)
        .unwrap();
        assert!(decategoricalize(&input).is_err());
    }
}
