//! `dirsync daemon`: foreground daemon lifecycle over the Unix socket.

use anyhow::{Context, Result};
use clap::Subcommand;

use dirsync_daemon::paths::socket_path;
use dirsync_daemon::{request_status, request_stop, start_blocking, DaemonError};

use super::Invocation;

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground (sync loop + socket server).
    Start,
    /// Request graceful daemon shutdown over the Unix socket.
    Stop,
    /// Query daemon runtime status over the Unix socket.
    Status,
}

pub fn run(invocation: &Invocation, command: DaemonCommand) -> Result<()> {
    let home = &invocation.home;

    match command {
        DaemonCommand::Start => {
            start_blocking(home, invocation.config_path()).context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match request_stop(home) {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => {
            let payload = match request_status(home) {
                Ok(status) => {
                    serde_json::to_value(status).context("failed to encode daemon status")?
                }
                Err(DaemonError::DaemonNotRunning { .. }) => serde_json::json!({
                    "running": false,
                    "socket": socket_path(home).display().to_string(),
                }),
                Err(err) => return Err(err).context("failed to query daemon status"),
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&payload)
                    .context("failed to render daemon status JSON")?
            );
        }
    }

    Ok(())
}
