//! dirsync: mirror an LDAP / Active Directory user directory into a local
//! store and query it.
//!
//! # Usage
//!
//! ```text
//! dirsync daemon start|stop|status
//! dirsync sync [--dry-run] [--local]
//! dirsync diff
//! dirsync get <key> [--pii] [--json]
//! dirsync list [--pii] [--json] [--limit N]
//! dirsync resolve <id> [--pii] [--json]
//! dirsync key <source-id>
//! ```
//!
//! Every command accepts `--config <path>`.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    daemon::DaemonCommand,
    diff::DiffArgs,
    key::KeyArgs,
    query::{GetArgs, ListArgs, ResolveArgs},
    sync::SyncArgs,
    Invocation,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "dirsync",
    version,
    about = "Mirror a user directory into a local store and query it",
    long_about = None,
)]
struct Cli {
    /// Configuration file (default: ~/.dirsync/config.yaml).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run, stop or inspect the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Reconcile the directory into the store once.
    Sync(SyncArgs),

    /// Show unified diffs of what a sync would write.
    Diff(DiffArgs),

    /// Look up one record by surrogate key.
    Get(GetArgs),

    /// Stream every record.
    List(ListArgs),

    /// Re-fetch one user from the directory by login name.
    Resolve(ResolveArgs),

    /// Print the surrogate key derived from a directory identifier.
    Key(KeyArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let invocation = Invocation::new(cli.config)?;
    match cli.command {
        Commands::Daemon { command } => commands::daemon::run(&invocation, command),
        Commands::Sync(args) => args.run(&invocation),
        Commands::Diff(args) => args.run(&invocation),
        Commands::Get(args) => args.run(&invocation),
        Commands::List(args) => args.run(&invocation),
        Commands::Resolve(args) => args.run(&invocation),
        Commands::Key(args) => args.run(),
    }
}
