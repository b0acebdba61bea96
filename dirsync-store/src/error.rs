//! Error types for dirsync-store.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from store operations.
///
/// A missing key is never an error; lookups return `Option::None`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite failure, annotated with the operation and, when known, the key.
    #[error("store {op} failed{}: {source}", key_suffix(.key))]
    Sqlite {
        op: &'static str,
        key: Option<String>,
        #[source]
        source: rusqlite::Error,
    },

    /// A stored value could not be encoded or decoded.
    #[error("record codec error for key {key}: {source}")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Filesystem failure preparing the database location.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The store was closed; no further operations are accepted.
    #[error("store is closed")]
    Closed,

    /// The consumer's cancellation token fired during enumeration.
    #[error("enumeration cancelled")]
    Cancelled,

    /// The blocking worker running the operation panicked or was aborted.
    #[error("store worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

fn key_suffix(key: &Option<String>) -> String {
    match key {
        Some(k) => format!(" for key {k}"),
        None => String::new(),
    }
}

pub(crate) fn sqlite_err(op: &'static str, key: Option<&str>) -> impl FnOnce(rusqlite::Error) -> StoreError {
    let key = key.map(str::to_owned);
    move |source| StoreError::Sqlite { op, key, source }
}
