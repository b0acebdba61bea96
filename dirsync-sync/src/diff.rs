//! Dry-run unified diff support for `dirsync diff`.

use similar::TextDiff;
use tokio_util::sync::CancellationToken;

use dirsync_core::{Record, SurrogateKey};

use crate::engine::SyncEngine;
use crate::plan::Plan;
use crate::SyncError;

/// How a pending upsert relates to what is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Changed,
}

/// One record that a reconciliation would write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDiff {
    pub key: SurrogateKey,
    /// Human-readable label (username, else source id, else key).
    pub label: String,
    pub change: ChangeKind,
    pub unified_diff: String,
}

/// Fetch both snapshots and describe every pending write. Nothing is written.
pub async fn plan_diff(
    engine: &SyncEngine,
    cancel: &CancellationToken,
) -> Result<Vec<RecordDiff>, SyncError> {
    let plan = engine.plan(cancel).await?;
    Ok(render(&plan))
}

/// Render the upserts of `plan` as pretty-JSON unified diffs, ordered by key.
pub fn render(plan: &Plan) -> Vec<RecordDiff> {
    let mut diffs: Vec<_> = plan
        .upserts
        .iter()
        .map(|record| {
            let previous = plan.previous.get(&record.surrogate_key);
            let old = previous.map(to_json).unwrap_or_default();
            let new = to_json(record);
            let old_header = format!("a/{}", record.surrogate_key);
            let new_header = format!("b/{}", record.surrogate_key);
            let unified_diff = TextDiff::from_lines(&old, &new)
                .unified_diff()
                .header(&old_header, &new_header)
                .context_radius(3)
                .to_string();
            RecordDiff {
                key: record.surrogate_key.clone(),
                label: label(record),
                change: if previous.is_some() {
                    ChangeKind::Changed
                } else {
                    ChangeKind::Added
                },
                unified_diff,
            }
        })
        .collect();
    diffs.sort_by(|a, b| a.key.cmp(&b.key));
    diffs
}

fn to_json(record: &Record) -> String {
    // Record contains only strings, enums and vectors; encoding cannot fail.
    let mut out = serde_json::to_string_pretty(record).unwrap_or_default();
    out.push('\n');
    out
}

fn label(record: &Record) -> String {
    match &record.pii {
        Some(pii) if !pii.username.is_empty() => pii.username.clone(),
        Some(pii) if !pii.source_id.is_empty() => pii.source_id.clone(),
        _ => record.surrogate_key.to_string(),
    }
}
