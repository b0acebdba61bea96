//! Synchronization engine: full-snapshot reconciliation of the directory into
//! the store, run on a fixed interval by a single loop task.
//!
//! Periodic ticks and manual requests are served by the same task, so at most
//! one cycle is ever running. Missed ticks are not caught up.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use dirsync_core::{Record, SurrogateKey};
use dirsync_source::{enumerate, DirectorySource};
use dirsync_store::Store;

use crate::error::SyncError;
use crate::plan::Plan;

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Outcome of one reconciliation cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub fetched: usize,
    pub stored: usize,
    pub upserted: Vec<SurrogateKey>,
    pub unchanged: usize,
    pub stale: Vec<SurrogateKey>,
    pub dry_run: bool,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    fn from_plan(plan: &Plan, dry_run: bool, elapsed: Duration) -> Self {
        Self {
            fetched: plan.fetched,
            stored: plan.stored,
            upserted: plan
                .upserts
                .iter()
                .map(|r| r.surrogate_key.clone())
                .collect(),
            unchanged: plan.unchanged,
            stale: plan.stale.clone(),
            dry_run,
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            finished_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    #[default]
    Idle,
    Running,
}

/// Published on a watch channel after every state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EngineStatus {
    pub state: EngineState,
    /// Completed non-dry-run cycles, successful or not.
    pub cycles: u64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_report: Option<SyncReport>,
}

/// A manual reconciliation request queued into the engine loop.
#[derive(Debug)]
pub struct SyncRequest {
    pub dry_run: bool,
    pub respond_to: oneshot::Sender<Result<SyncReport, SyncError>>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Reconciles `source` into `store`. Both collaborators are shared, not owned.
pub struct SyncEngine {
    store: Store,
    source: Arc<dyn DirectorySource>,
}

impl SyncEngine {
    pub fn new(store: Store, source: Arc<dyn DirectorySource>) -> Self {
        Self { store, source }
    }

    /// Fetch both full snapshots concurrently.
    pub async fn snapshot(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(Vec<Record>, Vec<Record>), SyncError> {
        let fetched = async {
            enumerate(self.source.as_ref(), cancel)
                .await
                .collect()
                .await
                .map_err(SyncError::from)
        };
        let stored = async {
            self.store
                .list(cancel.clone())
                .collect()
                .await
                .map_err(SyncError::from)
        };
        tokio::try_join!(fetched, stored)
    }

    /// Run one cycle: fetch, diff, and write the delta as a single batch.
    ///
    /// An empty delta performs no write. With `dry_run` nothing is written.
    pub async fn reconcile(
        &self,
        dry_run: bool,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        let started = Instant::now();
        let (fetched, stored) = self.snapshot(cancel).await?;
        let plan = Plan::compute(fetched, stored);

        if !plan.stale.is_empty() {
            warn!(
                stale = plan.stale.len(),
                "stored records missing from directory; retaining them"
            );
        }

        if !dry_run && !plan.is_noop() {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            self.store.upsert_batch(plan.upserts.clone()).await?;
        }

        let report = SyncReport::from_plan(&plan, dry_run, started.elapsed());
        info!(
            fetched = report.fetched,
            upserted = report.upserted.len(),
            unchanged = report.unchanged,
            stale = report.stale.len(),
            dry_run,
            duration_ms = report.duration_ms,
            "reconciliation finished",
        );
        Ok(report)
    }

    /// Compute the write-set without writing anything.
    pub async fn plan(&self, cancel: &CancellationToken) -> Result<Plan, SyncError> {
        let (fetched, stored) = self.snapshot(cancel).await?;
        Ok(Plan::compute(fetched, stored))
    }

    /// Loop until `shutdown` fires, reconciling every `interval` and serving
    /// queued [`SyncRequest`]s in between. The first tick fires immediately.
    pub async fn run(
        self: Arc<Self>,
        interval: Duration,
        mut requests: mpsc::Receiver<SyncRequest>,
        status: watch::Sender<EngineStatus>,
        shutdown: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = interval.as_secs(), "sync engine started");

        loop {
            let request = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(request) = requests.recv() => Some(request),
                _ = ticker.tick() => None,
            };

            let dry_run = request.as_ref().is_some_and(|r| r.dry_run);
            status.send_modify(|s| s.state = EngineState::Running);
            let outcome = self.reconcile(dry_run, &shutdown.child_token()).await;
            status.send_modify(|s| record_outcome(s, dry_run, &outcome));

            match &outcome {
                Ok(_) => {}
                Err(err) if err.is_cancelled() => debug!("reconciliation cancelled"),
                Err(err) => error!(error = %err, "reconciliation failed"),
            }
            if let Some(request) = request {
                let _ = request.respond_to.send(outcome);
            }
        }
        info!("sync engine stopped");
    }
}

fn record_outcome(
    status: &mut EngineStatus,
    dry_run: bool,
    outcome: &Result<SyncReport, SyncError>,
) {
    status.state = EngineState::Idle;
    if dry_run {
        return;
    }
    status.cycles += 1;
    match outcome {
        Ok(report) => {
            status.last_success_at = Some(report.finished_at);
            status.last_error = None;
            status.last_report = Some(report.clone());
        }
        Err(err) if err.is_cancelled() => {}
        Err(err) => status.last_error = Some(err.to_string()),
    }
}
