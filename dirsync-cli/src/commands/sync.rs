//! `dirsync sync`: run one reconciliation cycle.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use dirsync_daemon::request_sync;
use dirsync_sync::{pipeline, SyncReport};

use super::{run_cancellable, Invocation};

/// Arguments for `dirsync sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Report what would be written without writing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Reconcile in this process instead of asking the running daemon.
    #[arg(long)]
    pub local: bool,
}

impl SyncArgs {
    pub fn run(self, invocation: &Invocation) -> Result<()> {
        let report = if self.local {
            let config = invocation.load_config()?;
            run_cancellable(|cancel| async move {
                pipeline::run_once(&config, self.dry_run, &cancel)
                    .await
                    .context("sync failed")
            })?
        } else {
            request_sync(&invocation.home, self.dry_run).context("sync via daemon failed")?
        };
        print_report(&report);
        Ok(())
    }
}

fn print_report(report: &SyncReport) {
    let prefix = if report.dry_run { "[dry-run] " } else { "" };

    if report.upserted.is_empty() && report.stale.is_empty() {
        println!(
            "{prefix}{} nothing to do ({} records current, {}ms)",
            "✓".green(),
            report.unchanged,
            report.duration_ms,
        );
        return;
    }

    println!(
        "{prefix}{} {} fetched, {} stored: {} upserted, {} unchanged, {} stale ({}ms)",
        "✓".green(),
        report.fetched,
        report.stored,
        report.upserted.len(),
        report.unchanged,
        report.stale.len(),
        report.duration_ms,
    );
    let marker = if report.dry_run { "~" } else { "✎" };
    for key in &report.upserted {
        println!("  {marker}  {key}");
    }
    for key in &report.stale {
        println!("  {}  {key} (not in directory, retained)", "?".yellow());
    }
}
