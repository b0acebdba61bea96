//! Error types for dirsync-sync.

use thiserror::Error;

use dirsync_source::SourceError;
use dirsync_store::StoreError;

/// Why a reconciliation cycle was aborted.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Fetching the directory snapshot failed.
    #[error("source error: {0}")]
    Source(SourceError),

    /// Reading the stored snapshot or writing the batch failed.
    #[error("store error: {0}")]
    Store(StoreError),

    /// The cycle's cancellation token fired.
    #[error("reconciliation cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }
}

impl From<SourceError> for SyncError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Cancelled => SyncError::Cancelled,
            other => SyncError::Source(other),
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Cancelled => SyncError::Cancelled,
            other => SyncError::Store(other),
        }
    }
}

/// Outcome classes a query caller can distinguish.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Malformed request, rejected before any collaborator is touched.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("source error: {0}")]
    Source(SourceError),

    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,
}

impl QueryError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, QueryError::Cancelled)
    }
}

impl From<SourceError> for QueryError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Cancelled => QueryError::Cancelled,
            other => QueryError::Source(other),
        }
    }
}

impl From<StoreError> for QueryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Cancelled => QueryError::Cancelled,
            other => QueryError::Store(other),
        }
    }
}
