//! `dirsync key <source-id>`: print the surrogate key for an identifier.

use anyhow::{ensure, Result};
use clap::Args;

use dirsync_core::surrogate_key;

/// Arguments for `dirsync key`.
#[derive(Args, Debug)]
pub struct KeyArgs {
    /// Directory identifier, e.g. a distinguished name.
    pub source_id: String,
}

impl KeyArgs {
    pub fn run(self) -> Result<()> {
        ensure!(!self.source_id.is_empty(), "source id must not be empty");
        println!("{}", surrogate_key(&self.source_id));
        Ok(())
    }
}
