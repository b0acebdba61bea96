//! The adapter contract shared by every directory backend.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use dirsync_core::{Record, RecordStream, SourceKind};

use crate::error::SourceError;

/// A full enumeration in whichever shape the adapter produces.
#[derive(Debug)]
pub enum UserListing {
    /// The adapter fetched everything before returning.
    Batch(Vec<Record>),
    /// The adapter emits records as the backend delivers them.
    Stream(RecordStream<SourceError>),
}

impl UserListing {
    /// Normalise either shape to a stream.
    ///
    /// A batch is fed through a task that honours `cancel`; a stream is
    /// returned as-is (its producer already holds a token).
    pub fn into_stream(self, cancel: CancellationToken) -> RecordStream<SourceError> {
        match self {
            UserListing::Batch(records) => {
                RecordStream::from_records(records, cancel, || SourceError::Cancelled)
            }
            UserListing::Stream(stream) => stream,
        }
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, UserListing::Batch(_))
    }
}

/// Read access to an external identity directory.
///
/// Implementations connect lazily and reconnect on demand; none of these
/// calls assume a live session.
#[async_trait]
pub trait DirectorySource: Send + Sync {
    /// Which backend this adapter speaks to.
    fn kind(&self) -> SourceKind;

    /// Look up one user by the backend's login identifier.
    async fn get_user(&self, id: &str) -> Result<Option<Record>, SourceError>;

    /// Enumerate every user. Stream-shaped listings observe `cancel`.
    async fn list_users(&self, cancel: CancellationToken) -> Result<UserListing, SourceError>;

    /// Release the backend session. Later calls fail with
    /// [`SourceError::Closed`].
    async fn close(&self) -> Result<(), SourceError>;
}

/// Enumerate `source` as a stream regardless of its listing shape.
///
/// Failures before the first record (connect, bind, batch search) become the
/// stream's terminal error. Cancellation while waiting on a batch ends the
/// stream with [`SourceError::Cancelled`].
pub async fn enumerate(
    source: &dyn DirectorySource,
    cancel: &CancellationToken,
) -> RecordStream<SourceError> {
    let listing = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SourceError::Cancelled),
        listing = source.list_users(cancel.clone()) => listing,
    };
    match listing {
        Ok(listing) => listing.into_stream(cancel.clone()),
        Err(err) => RecordStream::failed(err),
    }
}
