pub mod daemon;
pub mod diff;
pub mod key;
pub mod query;
pub mod sync;

use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use dirsync_core::config::{self, Config};

/// Where this invocation finds its home directory and configuration.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub home: PathBuf,
    pub config_path: Option<PathBuf>,
}

impl Invocation {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self> {
        let home = config::home().context("could not determine home directory")?;
        Ok(Self { home, config_path })
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    pub fn load_config(&self) -> Result<Config> {
        config::load_at(&self.home, self.config_path()).context("failed to load configuration")
    }
}

/// Run `work` to completion on a single-threaded runtime. Ctrl-c fires the
/// token handed to it.
pub fn run_cancellable<F, Fut, T>(work: F) -> Result<T>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(async move {
        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_signal.cancel();
            }
        });
        work(cancel).await
    })
}
