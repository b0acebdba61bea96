//! Query pipeline behaviour in both backing modes.

use std::sync::Arc;

use dirsync_core::Record;
use dirsync_source::fake::{ldap_user, FakeSource};
use dirsync_source::DirectorySource;
use dirsync_store::Store;
use dirsync_sync::{Backing, QueryError, QueryPipeline};
use rstest::rstest;
use tokio_util::sync::CancellationToken;

/// Pipeline over `users`, seeded into the store for cache mode and served by
/// a streaming fake for passthrough mode.
async fn pipeline(backing: Backing, users: Vec<Record>) -> (QueryPipeline, Arc<FakeSource>) {
    let store = Store::open_in_memory().unwrap();
    let source = Arc::new(FakeSource::streaming(users.clone()));
    if backing == Backing::Store {
        store.upsert_batch(users).await.unwrap();
    }
    (QueryPipeline::new(backing, store, source.clone()), source)
}

async fn drain(
    mut stream: dirsync_core::RecordStream<QueryError>,
) -> (Vec<Record>, Option<QueryError>) {
    let mut records = Vec::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(record) => records.push(record),
            Err(err) => return (records, Some(err)),
        }
    }
    (records, None)
}

#[rstest]
#[case::cache(Backing::Store)]
#[case::passthrough(Backing::Source)]
#[tokio::test]
async fn get_missing_key_is_absent(#[case] backing: Backing) {
    let (pipeline, _) = pipeline(backing, vec![ldap_user("alice")]).await;
    let found = pipeline
        .get_record("missing-key", true, &CancellationToken::new())
        .await
        .unwrap();
    assert!(found.is_none());
}

#[rstest]
#[case::cache(Backing::Store)]
#[case::passthrough(Backing::Source)]
#[tokio::test]
async fn get_applies_redaction_flag(#[case] backing: Backing) {
    let alice = ldap_user("alice");
    let (pipeline, _) = pipeline(backing, vec![alice.clone()]).await;
    let key = alice.surrogate_key.as_str();
    let cancel = CancellationToken::new();

    let with = pipeline.get_record(key, true, &cancel).await.unwrap().unwrap();
    assert_eq!(with.pii, alice.pii);

    let without = pipeline.get_record(key, false, &cancel).await.unwrap().unwrap();
    assert!(without.pii.is_none());
    assert_eq!(without.surrogate_key, alice.surrogate_key);
    assert_eq!(without.status, alice.status);
}

#[rstest]
#[case::cache(Backing::Store)]
#[case::passthrough(Backing::Source)]
#[tokio::test]
async fn list_without_pii_strips_every_record(#[case] backing: Backing) {
    let users = vec![ldap_user("alice"), ldap_user("bob")];
    let (pipeline, _) = pipeline(backing, users).await;

    let (records, terminal) = drain(pipeline.list_records(false, CancellationToken::new())).await;
    assert!(terminal.is_none());
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.pii.is_none()));
}

#[rstest]
#[case::cache(Backing::Store)]
#[case::passthrough(Backing::Source)]
#[tokio::test]
async fn list_with_pii_is_exact(#[case] backing: Backing) {
    let users = vec![ldap_user("alice")];
    let (pipeline, _) = pipeline(backing, users.clone()).await;

    let (records, terminal) = drain(pipeline.list_records(true, CancellationToken::new())).await;
    assert!(terminal.is_none());
    assert_eq!(records, users);
}

#[rstest]
#[case::cache(Backing::Store)]
#[case::passthrough(Backing::Source)]
#[tokio::test]
async fn cancelling_a_list_ends_it_early_with_cancellation(#[case] backing: Backing) {
    let users: Vec<_> = (0..200).map(|n| ldap_user(&format!("user{n}"))).collect();
    let (pipeline, _) = pipeline(backing, users).await;
    let cancel = CancellationToken::new();

    let mut stream = pipeline.list_records(true, cancel.clone());
    assert!(matches!(stream.next().await, Some(Ok(_))));
    cancel.cancel();

    let (rest, terminal) = drain(stream).await;
    assert!(matches!(terminal, Some(QueryError::Cancelled)));
    assert!(rest.len() < 199, "remaining records must not all be delivered");
}

#[tokio::test]
async fn source_error_is_the_single_terminal_outcome() {
    let users: Vec<_> = (0..4).map(|n| ldap_user(&format!("user{n}"))).collect();
    let (pipeline, source) = pipeline(Backing::Source, users).await;
    source.fail_stream_after(2, "connection reset");

    let mut stream = pipeline.list_records(true, CancellationToken::new());
    let (records, terminal) = {
        let mut records = Vec::new();
        let terminal = loop {
            match stream.next().await {
                Some(Ok(r)) => records.push(r),
                other => break other,
            }
        };
        (records, terminal)
    };
    assert_eq!(records.len(), 2);
    assert!(matches!(terminal, Some(Err(QueryError::Source(_)))));
    assert!(stream.next().await.is_none(), "no second terminal outcome");
}

#[tokio::test]
async fn store_failure_surfaces_as_store_error() {
    let store = Store::open_in_memory().unwrap();
    let pipeline = QueryPipeline::new(
        Backing::Store,
        store.clone(),
        Arc::new(FakeSource::batch(Vec::new())),
    );
    store.close().await.unwrap();

    let err = pipeline
        .get_record("some-key", false, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::Store(_)));

    let (_, terminal) = drain(pipeline.list_records(false, CancellationToken::new())).await;
    assert!(matches!(terminal, Some(QueryError::Store(_))));
}

#[tokio::test]
async fn resolve_missing_user_is_absent() {
    let (pipeline, _) = pipeline(Backing::Store, vec![ldap_user("alice")]).await;
    let found = pipeline
        .resolve("nobody", true, &CancellationToken::new())
        .await
        .unwrap();
    assert!(found.is_none());
}

#[tokio::test]
async fn resolve_rejects_empty_id() {
    let (pipeline, source) = pipeline(Backing::Store, Vec::new()).await;
    source.close().await.unwrap();
    let err = pipeline
        .resolve("", true, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::InvalidArgument(_)));
}
