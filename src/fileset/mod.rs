//! The Fileset Engine: reconciles a local directory against a path inside a
//! Docker volume, via a throwaway helper container.
//!
//! Four independent pieces compose into the public entry point
//! [`FilesetEngine::sync`]:
//! - [`manifest`] - the content-addressed inventory and its wire format.
//! - [`exclude`] - compiled gitignore-flavored glob filters.
//! - [`walk`] - builds a local manifest by walking and hashing.
//! - [`diff`] - sorted-merge comparison producing upload/delete/touch buckets.
//! - [`sync`] - fetches the remote manifest and applies the diff.

pub mod diff;
pub mod exclude;
pub mod manifest;
pub mod sync;
pub mod walk;

pub use diff::FilesetDiff;
pub use exclude::ExcludeMatcher;
pub use manifest::{FileEntry, FilesetManifest};

use crate::config::RuntimeConfig;
use crate::engine::Engine;
use crate::errors::Result;
use crate::identifier::Identifier;
use crate::manifest::Fileset;
use std::collections::HashMap;
use tracing::info;

/// Outcome of reconciling one fileset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesetSyncResult {
    /// Fileset name.
    pub fileset: String,
    /// Files uploaded (new or changed content).
    pub uploaded: usize,
    /// Files deleted (present remotely, absent locally).
    pub deleted: usize,
    /// Files with only a mode change applied.
    pub touched: usize,
}

impl FilesetSyncResult {
    /// Whether this sync changed anything remotely.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.uploaded > 0 || self.deleted > 0 || self.touched > 0
    }
}

/// Drives a single fileset's reconciliation: build the local manifest, fetch
/// the remote one, diff, and apply.
pub struct FilesetEngine<'a> {
    engine: &'a dyn Engine,
    config: &'a RuntimeConfig,
    identifier: &'a Identifier,
}

impl<'a> FilesetEngine<'a> {
    /// Build a fileset engine bound to an [`Engine`] and deployment
    /// identifier for the lifetime of one reconciliation run.
    #[must_use]
    pub fn new(engine: &'a dyn Engine, config: &'a RuntimeConfig, identifier: &'a Identifier) -> Self {
        Self {
            engine,
            config,
            identifier,
        }
    }

    /// Compute what a sync would change, without applying anything: walk and
    /// hash the local tree, fetch the remote inventory, and diff them. Read
    /// only- safe to call from the State Probe ahead of an apply.
    pub async fn diff(&self, fileset: &Fileset) -> Result<FilesetDiff> {
        let excludes = ExcludeMatcher::compile(&fileset.excludes)?;
        let local = walk::build_local_manifest(&fileset.source_dir_abs, &excludes)?;
        let remote = sync::fetch_remote_manifest(self.engine, fileset, self.config, &self.labels()).await?;
        Ok(diff::diff(&local, &remote))
    }

    /// Reconcile one fileset: diff it, then apply delete → upload → touch
    /// if anything changed.
    pub async fn sync(&self, fileset: &Fileset) -> Result<FilesetSyncResult> {
        let computed = self.diff(fileset).await?;

        info!(
            fileset = %fileset.name,
            upload = computed.upload.len(),
            delete = computed.delete.len(),
            touch = computed.touch.len(),
            "fileset diff computed"
        );

        if !computed.is_empty() {
            sync::apply(self.engine, fileset, &computed, self.config, &self.labels()).await?;
        }

        Ok(FilesetSyncResult {
            fileset: fileset.name.clone(),
            uploaded: computed.upload.len(),
            deleted: computed.delete.len(),
            touched: computed.touch.len(),
        })
    }

    fn labels(&self) -> HashMap<String, String> {
        let mut labels = HashMap::new();
        labels.insert(
            crate::labels::IDENTIFIER.to_string(),
            self.identifier.as_str().to_string(),
        );
        labels
    }
}
