//! One-shot entrypoints shared by the CLI's in-process commands.
//!
//! The daemon assembles the same collaborators itself and keeps them for its
//! whole lifetime; these helpers open, use, and close them around a single
//! call.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use dirsync_core::config::Config;
use dirsync_source::{new_source, DirectorySource};
use dirsync_store::Store;

use crate::diff::{plan_diff, RecordDiff};
use crate::engine::{SyncEngine, SyncReport};
use crate::SyncError;

/// The store and adapter described by a configuration.
pub struct Collaborators {
    pub store: Store,
    pub source: Arc<dyn DirectorySource>,
}

impl Collaborators {
    /// Open the store and build the adapter. The adapter connects lazily.
    pub fn open(config: &Config) -> Result<Self, SyncError> {
        let source = new_source(&config.source)?;
        let store = Store::open(&config.storage)?;
        Ok(Self { store, source })
    }

    /// Close the adapter, then the store. Both are attempted; the first
    /// failure is returned.
    pub async fn close(self) -> Result<(), SyncError> {
        let source = self.source.close().await;
        if let Err(err) = &source {
            warn!(error = %err, "closing directory source failed");
        }
        let store = self.store.close().await;
        source?;
        store?;
        Ok(())
    }
}

/// Reconcile once in-process.
pub async fn run_once(
    config: &Config,
    dry_run: bool,
    cancel: &CancellationToken,
) -> Result<SyncReport, SyncError> {
    let parts = Collaborators::open(config)?;
    let engine = SyncEngine::new(parts.store.clone(), Arc::clone(&parts.source));
    let outcome = engine.reconcile(dry_run, cancel).await;
    parts.close().await?;
    outcome
}

/// Describe what a reconciliation would write, in-process.
pub async fn diff_once(
    config: &Config,
    cancel: &CancellationToken,
) -> Result<Vec<RecordDiff>, SyncError> {
    let parts = Collaborators::open(config)?;
    let engine = SyncEngine::new(parts.store.clone(), Arc::clone(&parts.source));
    let outcome = plan_diff(&engine, cancel).await;
    parts.close().await?;
    outcome
}
