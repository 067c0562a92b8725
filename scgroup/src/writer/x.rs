use crate::backend::{
    uri_join, ArraySchema, Attribute, Backend, Dimension, Filter, GroupOp, ScalarType,
    SparseArrayOp, SparseFragment,
};
use crate::data::ArrayData;
use crate::dataset::Dataset;
use crate::error::IngestError;

use anyhow::{bail, Context, Result};
use itertools::Itertools;
use log::{debug, info};

/// Schema shared by `X/data` and `X/raw`: one float cell per (observation, variable) pair.
pub fn x_array_schema() -> ArraySchema {
    ArraySchema::new_sparse(
        vec![
            Dimension::new("obs_id", ScalarType::String).with_filters(vec![Filter::Rle]),
            Dimension::new("var_id", ScalarType::String)
                .with_filters(vec![Filter::Zstd { level: -1 }]),
        ],
        vec![Attribute::new("value", ScalarType::F32)
            .with_filters(vec![Filter::Zstd { level: -1 }])],
    )
    .with_duplicates(true)
    .with_offsets_filters(vec![
        Filter::DoubleDelta,
        Filter::BitWidthReduction,
        Filter::Zstd { level: -1 },
    ])
}

/// Write one expression matrix as `{group_uri}/{name}` and return its URI.
///
/// Every cell of the matrix becomes one coordinate, zeros included, ordered row by row.
pub fn write_x_array<B: Backend>(
    store: &B::Store,
    x: &ArrayData,
    group_uri: &str,
    name: &str,
    obs_names: &[String],
    var_names: &[String],
    verbose: bool,
) -> Result<String> {
    let uri = uri_join(group_uri, name);
    let shape = x.shape();
    if shape != [obs_names.len(), var_names.len()] {
        bail!(IngestError::shape_mismatch(
            format!("'{}'", uri),
            &[obs_names.len(), var_names.len()],
            &shape
        ));
    }
    if !(x.dtype().is_numeric() || x.dtype() == ScalarType::Bool) {
        bail!(IngestError::unsupported(format!("matrix '{}'", uri), x.dtype()));
    }
    if verbose {
        info!("    START  WRITING {}", uri);
    }

    let array = B::create_sparse_array(store, &uri, &x_array_schema())?;
    let values = x.to_dense()?.to_f32_vec()?;
    let (obs_id, var_id): (Vec<String>, Vec<String>) = obs_names
        .iter()
        .cartesian_product(var_names.iter())
        .map(|(o, v)| (o.clone(), v.clone()))
        .unzip();
    debug!("Writing {} cells to '{}'", values.len(), uri);
    array
        .write(
            &SparseFragment::new()
                .with_coord("obs_id", obs_id)
                .with_coord("var_id", var_id)
                .with_attr("value", values),
        )
        .with_context(|| format!("cannot write '{}'", uri))?;

    if verbose {
        info!("    FINISH WRITING {}", uri);
    }
    Ok(uri)
}

/// Create the `X` group under `base_uri` holding `data` and, if the dataset has one, `raw`.
pub fn write_x<B: Backend>(
    store: &B::Store,
    dataset: &Dataset,
    base_uri: &str,
    verbose: bool,
) -> Result<String> {
    let x_uri = uri_join(base_uri, "X");
    let mut group = B::create_group(store, &x_uri)?;

    let data_uri = write_x_array::<B>(
        store,
        dataset.x(),
        &x_uri,
        "data",
        dataset.obs_names().names(),
        dataset.var_names().names(),
        verbose,
    )?;
    group.add_member("data", &data_uri, false)?;

    if let Some(raw) = dataset.raw() {
        let raw_uri = write_x_array::<B>(
            store,
            raw.x(),
            &x_uri,
            "raw",
            raw.obs_names().names(),
            raw.var_names().names(),
            verbose,
        )?;
        group.add_member("raw", &raw_uri, false)?;
    }

    group.close()?;
    Ok(x_uri)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_x_schema() {
        let schema = x_array_schema();
        schema.validate().unwrap();
        assert!(schema.sparse);
        assert!(schema.allows_duplicates);
        assert_eq!(schema.dimensions[0].filters, vec![Filter::Rle]);
        let frag = SparseFragment::new()
            .with_coord("obs_id", vec!["c1".to_string(), "c1".to_string()])
            .with_coord("var_id", vec!["g1".to_string(), "g1".to_string()])
            .with_attr("value", vec![1.0f32, 2.0]);
        assert!(schema.check("X/data", &frag).is_ok());
    }
}
