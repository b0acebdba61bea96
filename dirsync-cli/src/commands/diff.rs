//! `dirsync diff`: show unified diffs for what a sync would write.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use dirsync_sync::diff::ChangeKind;
use dirsync_sync::pipeline;

use super::{run_cancellable, Invocation};

/// Arguments for `dirsync diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Print only the summary line per record.
    #[arg(long)]
    pub stat: bool,
}

impl DiffArgs {
    pub fn run(self, invocation: &Invocation) -> Result<()> {
        let config = invocation.load_config()?;
        let diffs = run_cancellable(|cancel| async move {
            pipeline::diff_once(&config, &cancel)
                .await
                .context("diff failed")
        })?;

        if diffs.is_empty() {
            println!("No differences.");
            return Ok(());
        }

        for diff in &diffs {
            let change = match diff.change {
                ChangeKind::Added => "added".green(),
                ChangeKind::Changed => "changed".yellow(),
            };
            println!("{} {} ({change})", diff.label.bold(), diff.key);
            if self.stat {
                continue;
            }
            print!("{}", diff.unified_diff);
            if !diff.unified_diff.ends_with('\n') {
                println!();
            }
        }

        Ok(())
    }
}
