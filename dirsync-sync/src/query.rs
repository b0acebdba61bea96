//! Query pipeline: point lookups and streamed enumeration for API callers,
//! answered from the store or straight from the directory.
//!
//! Enumeration is transform-and-forward. Each record is redacted as needed
//! and handed downstream before the next one is read, and one token stops
//! both directions at once.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use dirsync_core::config::QueryMode;
use dirsync_core::{record_channel, Delivery, Record, RecordSender, RecordStream, SurrogateKey};
use dirsync_source::{enumerate, DirectorySource};
use dirsync_store::Store;

use crate::error::QueryError;

/// Which collaborator answers queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    /// The reconciled local store.
    Store,
    /// The directory itself; nothing is persisted.
    Source,
}

impl From<QueryMode> for Backing {
    fn from(mode: QueryMode) -> Self {
        match mode {
            QueryMode::Cache => Backing::Store,
            QueryMode::Passthrough => Backing::Source,
        }
    }
}

#[derive(Clone)]
pub struct QueryPipeline {
    backing: Backing,
    store: Store,
    source: Arc<dyn DirectorySource>,
}

impl QueryPipeline {
    pub fn new(backing: Backing, store: Store, source: Arc<dyn DirectorySource>) -> Self {
        Self {
            backing,
            store,
            source,
        }
    }

    pub fn backing(&self) -> Backing {
        self.backing
    }

    /// Single record by surrogate key. `Ok(None)` when it does not exist.
    pub async fn get_record(
        &self,
        key: &str,
        include_pii: bool,
        cancel: &CancellationToken,
    ) -> Result<Option<Record>, QueryError> {
        if key.is_empty() {
            return Err(QueryError::InvalidArgument("key must not be empty".into()));
        }
        let key = SurrogateKey::from(key);
        let found = match self.backing {
            Backing::Store => tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(QueryError::Cancelled),
                found = self.store.get(&key) => found?,
            },
            Backing::Source => self.find_in_source(&key, cancel).await?,
        };
        Ok(found.map(|r| r.with_pii_policy(include_pii)))
    }

    /// Scan the directory until `key` turns up, then stop the enumeration.
    ///
    /// Directories are addressed by DN, not by surrogate key, so each lookup
    /// costs one enumeration: O(n) in the directory size per call.
    async fn find_in_source(
        &self,
        key: &SurrogateKey,
        cancel: &CancellationToken,
    ) -> Result<Option<Record>, QueryError> {
        let scan = cancel.child_token();
        let _stop = scan.clone().drop_guard();
        let mut stream = enumerate(self.source.as_ref(), &scan).await;
        while let Some(item) = stream.next().await {
            let record = item?;
            if record.surrogate_key == *key {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// Stream every record, redacting PII unless `include_pii`.
    ///
    /// The stream ends with exactly one of: `None` (exhausted), the upstream
    /// error, or [`QueryError::Cancelled`].
    pub fn list_records(
        &self,
        include_pii: bool,
        cancel: CancellationToken,
    ) -> RecordStream<QueryError> {
        let (tx, rx) = record_channel();
        match self.backing {
            Backing::Store => {
                let upstream = self.store.list(cancel.clone());
                tokio::spawn(forward(upstream, tx, include_pii, cancel));
            }
            Backing::Source => {
                let source = Arc::clone(&self.source);
                tokio::spawn(async move {
                    let upstream = enumerate(source.as_ref(), &cancel).await;
                    forward(upstream, tx, include_pii, cancel).await;
                });
            }
        }
        rx
    }

    /// Re-fetch one user from the directory by its login identifier,
    /// whichever backing is configured.
    pub async fn resolve(
        &self,
        native_id: &str,
        include_pii: bool,
        cancel: &CancellationToken,
    ) -> Result<Option<Record>, QueryError> {
        if native_id.is_empty() {
            return Err(QueryError::InvalidArgument("id must not be empty".into()));
        }
        let found = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(QueryError::Cancelled),
            found = self.source.get_user(native_id) => found?,
        };
        Ok(found.map(|r| r.with_pii_policy(include_pii)))
    }
}

/// Move records from `upstream` to `tx` one at a time.
///
/// Returning drops `upstream`, which stops its producer.
async fn forward<E>(
    mut upstream: RecordStream<E>,
    tx: RecordSender<QueryError>,
    include_pii: bool,
    cancel: CancellationToken,
) where
    E: Into<QueryError> + Send + 'static,
{
    let mut forwarded = 0usize;
    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tx.fail(QueryError::Cancelled);
                return;
            }
            _ = tx.closed() => {
                debug!(forwarded, "list consumer went away");
                return;
            }
            item = upstream.next() => item,
        };
        let record = match item {
            None => break,
            Some(Ok(record)) => record,
            Some(Err(err)) => {
                tx.fail(err.into());
                return;
            }
        };
        match tx.send(record.with_pii_policy(include_pii), &cancel).await {
            Delivery::Delivered => forwarded += 1,
            Delivery::Closed => {
                debug!(forwarded, "list consumer went away");
                return;
            }
            Delivery::Cancelled => {
                tx.fail(QueryError::Cancelled);
                return;
            }
        }
    }
    debug!(forwarded, "list finished");
}
