use crate::backend::{
    uri_join, ArraySchema, Attribute, Backend, Dimension, Filter, ScalarType, SparseArrayOp,
    SparseFragment,
};
use crate::data::{series_to_dyn_array, DataFrameIndex, DynArray};
use crate::error::IngestError;

use anyhow::{bail, Context, Result};
use log::info;
use polars::prelude::DataFrame;

/// Name of the dimension holding the row labels of a table.
fn index_dim_name(index: &DataFrameIndex, role: &str) -> String {
    match index.index_name.as_str() {
        "" | "index" | "_index" => format!("{}_id", role),
        name => name.to_string(),
    }
}

/// Schema of an obs or var table: the row labels form the only dimension and every column is
/// an attribute of the same element type.
pub fn axis_table_schema(dim_name: &str, columns: &[(String, DynArray)]) -> ArraySchema {
    let zstd = vec![Filter::Zstd { level: -1 }];
    let attributes = columns
        .iter()
        .map(|(name, data)| Attribute::new(name, data.dtype()).with_filters(zstd.clone()))
        .collect();
    ArraySchema::new_sparse(
        vec![Dimension::new(dim_name, ScalarType::String).with_filters(zstd)],
        attributes,
    )
    .with_duplicates(false)
    .with_offsets_filters(vec![Filter::PositiveDelta, Filter::Zstd { level: -1 }])
}

/// Write the obs or var table as `{base_uri}/{role}` and return its URI.
pub fn write_obs_or_var<B: Backend>(
    store: &B::Store,
    table: &DataFrame,
    index: &DataFrameIndex,
    role: &str,
    base_uri: &str,
    verbose: bool,
) -> Result<String> {
    let uri = uri_join(base_uri, role);
    if table.width() > 0 && table.height() != index.len() {
        bail!(IngestError::shape_mismatch(
            format!("'{}'", uri),
            &[index.len()],
            &[table.height()]
        ));
    }
    let columns = table
        .get_columns()
        .iter()
        .map(|s| Ok((s.name().to_string(), series_to_dyn_array(s)?)))
        .collect::<Result<Vec<_>>>()
        .with_context(|| format!("cannot build the schema of '{}'", uri))?;
    let dim_name = index_dim_name(index, role);
    let schema = axis_table_schema(&dim_name, &columns);

    if verbose {
        info!("    START  WRITING {}", uri);
    }
    let array = B::create_sparse_array(store, &uri, &schema)?;
    let fragment = SparseFragment {
        coords: vec![(dim_name, index.names().to_vec().into())],
        attrs: columns,
    };
    array
        .write(&fragment)
        .with_context(|| format!("cannot write '{}'", uri))?;
    if verbose {
        info!("    FINISH WRITING {}", uri);
    }
    Ok(uri)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_dim_name() {
        let index: DataFrameIndex = ["a"].into_iter().collect();
        assert_eq!(index_dim_name(&index, "obs"), "obs_id");
        let index = DataFrameIndex::new("gene_symbols", vec!["a".to_string()]);
        assert_eq!(index_dim_name(&index, "var"), "gene_symbols");
    }

    #[test]
    fn test_axis_table_schema() {
        let columns = vec![
            ("n_genes".to_string(), DynArray::from(vec![1i64, 2])),
            ("highly_variable".to_string(), DynArray::from(vec![true, false])),
        ];
        let schema = axis_table_schema("var_id", &columns);
        schema.validate().unwrap();
        assert!(!schema.allows_duplicates);
        assert_eq!(schema.dimensions[0].dtype, ScalarType::String);
        assert_eq!(
            schema.attributes.iter().map(|a| a.dtype).collect::<Vec<_>>(),
            vec![ScalarType::I64, ScalarType::Bool]
        );
        assert_eq!(
            schema.offsets_filters,
            vec![Filter::PositiveDelta, Filter::Zstd { level: -1 }]
        );
    }
}
