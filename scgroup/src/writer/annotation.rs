use crate::backend::{uri_join, Backend, GroupOp};
use crate::dataset::{AnnotationRole, AxisArrays};

use anyhow::{Context, Result};
use log::{debug, info};

/// Write one collection of auxiliary matrices as the group `{base_uri}/{role}`, one dense
/// array per matrix. Returns `None` without touching storage when the collection is empty.
pub fn write_annotation_matrices<B: Backend>(
    store: &B::Store,
    matrices: &AxisArrays,
    role: AnnotationRole,
    base_uri: &str,
    verbose: bool,
) -> Result<Option<String>> {
    if matrices.is_empty() {
        debug!("No {} matrices, skipping", role);
        return Ok(None);
    }
    let group_uri = uri_join(base_uri, role.name());
    let mut group = B::create_group(store, &group_uri)?;
    for (name, data) in matrices {
        let uri = uri_join(&group_uri, name);
        if verbose {
            info!("    START  WRITING {}", uri);
        }
        let dense = data
            .to_dense()
            .with_context(|| format!("cannot densify '{}'", uri))?;
        B::write_dense_array(store, &uri, &dense)
            .with_context(|| format!("cannot write '{}'", uri))?;
        if verbose {
            info!("    FINISH WRITING {}", uri);
        }
        group.add_member(name, &uri, false)?;
    }
    group.close()?;
    Ok(Some(group_uri))
}
