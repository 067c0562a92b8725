use crate::backend::{Backend, GroupOp};
use crate::dataset::{AnnotationRole, Dataset};
use crate::normalize;
use crate::reader::{read_dataset, FileFormat};
use crate::writer::{write_annotation_matrices, write_obs_or_var, write_x};

use anyhow::{Context, Result};
use log::{info, warn};
use std::path::Path;

/// Single-cell group: ingests annotated datasets into a group of arrays rooted at `uri`.
///
/// ```text
/// {uri}/             group
/// {uri}/X/data       sparse array, obs_id x var_id -> value
/// {uri}/X/raw        same layout, present if the dataset has raw data
/// {uri}/obs          sparse array indexed by observation
/// {uri}/var          sparse array indexed by variable
/// {uri}/obsm, varm, obsp, varp
///                    groups of dense arrays, present if non-empty
/// ```
pub struct SCGroup<B: Backend> {
    uri: String,
    verbose: bool,
    store: B::Store,
}

impl<B: Backend> SCGroup<B> {
    /// Create a handle writing to `uri`. A store is built from the backend's default
    /// configuration when none is given.
    pub fn new(uri: &str, verbose: bool, store: Option<B::Store>) -> Result<Self> {
        let store = match store {
            Some(store) => store,
            None => B::new_store(B::Config::default())?,
        };
        Ok(Self {
            uri: uri.to_string(),
            verbose,
            store,
        })
    }

    pub fn with_config(uri: &str, verbose: bool, config: B::Config) -> Result<Self> {
        Self::new(uri, verbose, Some(B::new_store(config)?))
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn store(&self) -> &B::Store {
        &self.store
    }

    /// Normalize and write an in-memory dataset. Returns the URI of the new group.
    pub fn from_anndata(&self, dataset: &Dataset) -> Result<String> {
        if self.verbose {
            info!("START  SCGroup.from_anndata -> {}", self.uri);
        }
        let dataset = self.decategoricalize(dataset)?;
        self.write_group(&dataset)?;
        if self.verbose {
            info!("FINISH SCGroup.from_anndata -> {}", self.uri);
        }
        Ok(self.uri.clone())
    }

    /// Read a file, make its variable names unique, then normalize and write it.
    pub fn from_file<P: AsRef<Path>>(&self, path: P, format: FileFormat) -> Result<String> {
        let path = path.as_ref();
        if self.verbose {
            info!("START  SCGroup.from_file {} -> {}", path.display(), self.uri);
        }
        let dataset = self.read_file(path, format)?;
        let dataset = self.decategoricalize(&dataset)?;
        self.write_group(&dataset)?;
        if self.verbose {
            info!("FINISH SCGroup.from_file {} -> {}", path.display(), self.uri);
        }
        Ok(self.uri.clone())
    }

    pub fn read_file<P: AsRef<Path>>(&self, path: P, format: FileFormat) -> Result<Dataset> {
        let path = path.as_ref();
        if self.verbose {
            info!("  START  READING {}", path.display());
        }
        let mut dataset = read_dataset::<B, _>(path, format)?;
        let renamed = dataset.var_names_make_unique();
        if renamed > 0 {
            warn!("{} variable names were not unique and have been renamed", renamed);
        }
        if self.verbose {
            info!("  FINISH READING {}", path.display());
        }
        Ok(dataset)
    }

    pub fn decategoricalize(&self, dataset: &Dataset) -> Result<Dataset> {
        if self.verbose {
            info!("  START  DECATEGORICALIZING");
        }
        let dataset = normalize::decategoricalize(dataset)?;
        if self.verbose {
            info!("  FINISH DECATEGORICALIZING");
        }
        Ok(dataset)
    }

    /// Write an already normalized dataset. Fails if anything exists at the target URI.
    pub fn write_group(&self, dataset: &Dataset) -> Result<()> {
        if self.verbose {
            info!("  START  WRITING {}", self.uri);
        }
        let mut base_group = B::create_group(&self.store, &self.uri)?;

        let x_uri = write_x::<B>(&self.store, dataset, &self.uri, self.verbose)?;
        base_group.add_member("X", &x_uri, false)?;

        let obs_uri = write_obs_or_var::<B>(
            &self.store,
            dataset.obs(),
            dataset.obs_names(),
            "obs",
            &self.uri,
            self.verbose,
        )?;
        base_group.add_member("obs", &obs_uri, false)?;

        let var_uri = write_obs_or_var::<B>(
            &self.store,
            dataset.var(),
            dataset.var_names(),
            "var",
            &self.uri,
            self.verbose,
        )?;
        base_group.add_member("var", &var_uri, false)?;

        for role in AnnotationRole::ALL {
            if let Some(uri) = write_annotation_matrices::<B>(
                &self.store,
                dataset.annotations(role),
                role,
                &self.uri,
                self.verbose,
            )? {
                base_group.add_member(role.name(), &uri, false)?;
            }
        }

        if self.verbose {
            info!("  FINISH WRITING {}", self.uri);
        }
        base_group
            .close()
            .with_context(|| format!("cannot close group '{}'", self.uri))
    }
}

/// Ingest an in-memory dataset into a new group at `uri` using a default store.
pub fn ingest_from_dataset<B: Backend>(uri: &str, dataset: &Dataset) -> Result<String> {
    SCGroup::<B>::new(uri, true, None)?.from_anndata(dataset)
}

/// Ingest a file into a new group at `uri` using a default store.
pub fn ingest_from_file<B: Backend, P: AsRef<Path>>(
    uri: &str,
    path: P,
    format: FileFormat,
) -> Result<String> {
    SCGroup::<B>::new(uri, true, None)?.from_file(path, format)
}
