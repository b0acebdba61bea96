//! Record stream: a point-to-point record channel paired with a one-shot
//! error channel.
//!
//! The record channel has capacity one, so a producer is held on `send`
//! until the consumer has taken the previous record. The error channel
//! carries at most one value and is resolved before the record channel
//! closes. A consumer therefore observes exactly one terminal outcome:
//! `None` (exhausted) or a single `Some(Err(_))`.

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::types::Record;

/// Result of handing one record to the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The consumer has the record.
    Delivered,
    /// The consumer dropped its end of the stream.
    Closed,
    /// The cancellation token fired before the consumer took the record.
    Cancelled,
}

/// Create a connected sender/stream pair.
pub fn record_channel<E>() -> (RecordSender<E>, RecordStream<E>) {
    let (records_tx, records_rx) = mpsc::channel(1);
    let (error_tx, error_rx) = oneshot::channel();
    (
        RecordSender {
            records: records_tx,
            error: error_tx,
        },
        RecordStream {
            records: records_rx,
            error: Some(error_rx),
        },
    )
}

/// Producer half. Dropping it without calling [`RecordSender::fail`] ends the
/// stream cleanly.
#[derive(Debug)]
pub struct RecordSender<E> {
    records: mpsc::Sender<Record>,
    error: oneshot::Sender<E>,
}

impl<E> RecordSender<E> {
    /// Wait until the consumer takes `record` or `cancel` fires, whichever
    /// comes first.
    pub async fn send(&self, record: Record, cancel: &CancellationToken) -> Delivery {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Delivery::Cancelled,
            sent = self.records.send(record) => match sent {
                Ok(()) => Delivery::Delivered,
                Err(_) => Delivery::Closed,
            },
        }
    }

    /// [`RecordSender::send`] for producers running on the blocking pool.
    ///
    /// Must be called from a thread inside a tokio runtime context that is
    /// not itself driving async tasks (e.g. `spawn_blocking`).
    pub fn blocking_send(&self, record: Record, cancel: &CancellationToken) -> Delivery {
        tokio::runtime::Handle::current().block_on(self.send(record, cancel))
    }

    /// True once the consumer has dropped the stream.
    pub fn is_closed(&self) -> bool {
        self.records.is_closed()
    }

    /// Resolves once the consumer has dropped the stream.
    pub async fn closed(&self) {
        self.records.closed().await
    }

    /// Terminate the stream with `err`. Any record still waiting in the
    /// channel is delivered before the error.
    pub fn fail(self, err: E) {
        let RecordSender { records, error } = self;
        let _ = error.send(err);
        drop(records);
    }
}

/// Consumer half.
#[derive(Debug)]
pub struct RecordStream<E> {
    records: mpsc::Receiver<Record>,
    error: Option<oneshot::Receiver<E>>,
}

impl<E> RecordStream<E> {
    /// Next record, the terminal error, or `None` when the producer finished
    /// cleanly. Returns `None` forever after the terminal outcome.
    ///
    /// Cancel-safe: dropping the future loses neither a record nor the error.
    pub async fn next(&mut self) -> Option<Result<Record, E>> {
        if let Some(record) = self.records.recv().await {
            return Some(Ok(record));
        }
        let error = self.error.as_mut()?;
        let outcome = error.await.ok();
        self.error = None;
        outcome.map(Err)
    }

    /// A stream whose only outcome is `err`.
    pub fn failed(err: E) -> Self {
        let (tx, rx) = record_channel();
        tx.fail(err);
        rx
    }

    /// Drain every record, failing on the terminal error.
    pub async fn collect(mut self) -> Result<Vec<Record>, E> {
        let mut out = Vec::new();
        while let Some(item) = self.next().await {
            out.push(item?);
        }
        Ok(out)
    }
}

impl<E: Send + 'static> RecordStream<E> {
    /// Stream an already materialized collection.
    ///
    /// The feeding task observes `cancel`; when it fires before the
    /// collection is exhausted the stream ends with `on_cancel()`.
    pub fn from_records<F>(records: Vec<Record>, cancel: CancellationToken, on_cancel: F) -> Self
    where
        F: FnOnce() -> E + Send + 'static,
    {
        let (tx, rx) = record_channel();
        tokio::spawn(async move {
            for record in records {
                match tx.send(record, &cancel).await {
                    Delivery::Delivered => {}
                    Delivery::Closed => return,
                    Delivery::Cancelled => {
                        tx.fail(on_cancel());
                        return;
                    }
                }
            }
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PersonalInfo, SourceKind, UserStatus};

    fn record(n: usize) -> Record {
        Record::from_source(
            UserStatus::Active,
            SourceKind::Ldap,
            PersonalInfo {
                source_id: format!("uid=user{n},dc=example,dc=com"),
                username: format!("user{n}"),
                ..PersonalInfo::default()
            },
        )
    }

    #[tokio::test]
    async fn clean_end_yields_none_after_records() {
        let (tx, mut rx) = record_channel::<String>();
        tokio::spawn(async move {
            let cancel = CancellationToken::new();
            for n in 0..3 {
                assert_eq!(tx.send(record(n), &cancel).await, Delivery::Delivered);
            }
        });

        let mut seen = 0;
        while let Some(item) = rx.next().await {
            item.expect("no error");
            seen += 1;
        }
        assert_eq!(seen, 3);
        assert!(rx.next().await.is_none(), "terminal outcome is sticky");
    }

    #[tokio::test]
    async fn error_is_delivered_once_after_pending_records() {
        let (tx, mut rx) = record_channel::<String>();
        tokio::spawn(async move {
            let cancel = CancellationToken::new();
            tx.send(record(1), &cancel).await;
            tx.fail("boom".to_string());
        });

        assert!(matches!(rx.next().await, Some(Ok(_))));
        assert!(matches!(rx.next().await, Some(Err(e)) if e == "boom"));
        assert!(rx.next().await.is_none());
    }

    #[tokio::test]
    async fn send_observes_cancellation_while_blocked() {
        let (tx, _rx) = record_channel::<String>();
        let cancel = CancellationToken::new();
        // Fill the single slot; nobody is receiving.
        assert_eq!(tx.send(record(0), &cancel).await, Delivery::Delivered);

        let waiter = {
            let cancel = cancel.clone();
            tokio::spawn(async move { tx.send(record(1), &cancel).await })
        };
        tokio::task::yield_now().await;
        cancel.cancel();
        assert_eq!(waiter.await.expect("join"), Delivery::Cancelled);
    }

    #[tokio::test]
    async fn send_reports_closed_consumer() {
        let (tx, rx) = record_channel::<String>();
        drop(rx);
        let cancel = CancellationToken::new();
        assert_eq!(tx.send(record(0), &cancel).await, Delivery::Closed);
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn closed_resolves_when_consumer_drops() {
        let (tx, rx) = record_channel::<String>();
        let waiter = tokio::spawn(async move { tx.closed().await });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        drop(rx);
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("closed() resolved")
            .expect("join");
    }

    #[tokio::test]
    async fn failed_stream_yields_only_the_error() {
        let mut rx = RecordStream::failed("unreachable".to_string());
        assert!(matches!(rx.next().await, Some(Err(e)) if e == "unreachable"));
        assert!(rx.next().await.is_none());
    }

    #[tokio::test]
    async fn from_records_streams_everything() {
        let records: Vec<_> = (0..5).map(record).collect();
        let stream = RecordStream::<String>::from_records(
            records.clone(),
            CancellationToken::new(),
            || "cancelled".to_string(),
        );
        assert_eq!(stream.collect().await.expect("collect"), records);
    }

    #[tokio::test]
    async fn from_records_ends_with_cancellation_error() {
        let cancel = CancellationToken::new();
        let mut stream = RecordStream::<String>::from_records(
            (0..100).map(record).collect(),
            cancel.clone(),
            || "cancelled".to_string(),
        );
        assert!(matches!(stream.next().await, Some(Ok(_))));
        cancel.cancel();

        let mut delivered = 1;
        let terminal = loop {
            match stream.next().await {
                Some(Ok(_)) => delivered += 1,
                other => break other,
            }
        };
        assert!(matches!(terminal, Some(Err(e)) if e == "cancelled"));
        assert!(delivered < 100, "cancellation must cut the stream short");
    }
}
