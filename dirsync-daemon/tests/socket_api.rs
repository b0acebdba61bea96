//! End-to-end tests of the daemon socket API over a fake directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dirsync_core::config::{Config, QueryMode};
use dirsync_core::Record;
use dirsync_daemon::paths::socket_path;
use dirsync_daemon::{
    request_get, request_list, request_resolve, request_status, request_stop, request_sync,
    serve, DaemonError, DaemonStatus, StatusCode,
};
use dirsync_source::fake::{ldap_user, FakeSource};
use dirsync_store::{Store, StoreError};
use dirsync_sync::pipeline::Collaborators;
use dirsync_sync::EngineState;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Harness {
    home: TempDir,
    store: Store,
    source: Arc<FakeSource>,
    shutdown: CancellationToken,
    daemon: JoinHandle<Result<(), DaemonError>>,
}

impl Harness {
    async fn start(mode: QueryMode, source: FakeSource) -> Self {
        let home = TempDir::new().unwrap();
        let store = Store::open_in_memory().unwrap();
        let source = Arc::new(source);
        let mut config = Config::default();
        config.sync.interval_secs = 3600;
        config.query.mode = mode;

        let shutdown = CancellationToken::new();
        let parts = Collaborators {
            store: store.clone(),
            source: source.clone(),
        };
        let daemon = tokio::spawn(serve(
            socket_path(home.path()),
            config,
            parts,
            shutdown.clone(),
        ));

        let harness = Self {
            home,
            store,
            source,
            shutdown,
            daemon,
        };
        // The first cycle runs as soon as the engine starts.
        harness
            .wait_for(|s| s.engine.cycles >= 1 && s.engine.state == EngineState::Idle)
            .await;
        harness
    }

    fn home(&self) -> PathBuf {
        self.home.path().to_path_buf()
    }

    async fn wait_for(&self, ready: impl Fn(&DaemonStatus) -> bool) -> DaemonStatus {
        for _ in 0..200 {
            let home = self.home();
            if let Ok(status) = blocking(move || request_status(&home)).await {
                if ready(&status) {
                    return status;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("daemon never reached the expected status");
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.daemon.await.unwrap().unwrap();
    }
}

async fn blocking<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
    tokio::task::spawn_blocking(f).await.unwrap()
}

async fn get(home: &Path, key: &str, include_pii: bool) -> Result<Option<Record>, DaemonError> {
    let (home, key) = (home.to_path_buf(), key.to_string());
    blocking(move || request_get(&home, &key, include_pii)).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lookups_over_the_socket() {
    let alice = ldap_user("alice");
    let bob = ldap_user("bob");
    let daemon = Harness::start(
        QueryMode::Cache,
        FakeSource::batch(vec![alice.clone(), bob.clone()]),
    )
    .await;
    let home = daemon.home();

    let redacted = get(&home, alice.surrogate_key.as_str(), false)
        .await
        .unwrap()
        .unwrap();
    assert!(redacted.pii.is_none());
    assert_eq!(redacted.surrogate_key, alice.surrogate_key);

    let full = get(&home, alice.surrogate_key.as_str(), true).await.unwrap();
    assert_eq!(full, Some(alice.clone()));

    assert!(get(&home, "no-such-key", true).await.unwrap().is_none());

    let err = get(&home, "", true).await.unwrap_err();
    assert!(matches!(
        err,
        DaemonError::Remote {
            status: StatusCode::InvalidArgument,
            ..
        }
    ));

    let resolved = {
        let home = home.clone();
        blocking(move || request_resolve(&home, "bob", true)).await
    };
    assert_eq!(resolved.unwrap(), Some(bob));

    let missing = {
        let home = home.clone();
        blocking(move || request_resolve(&home, "nobody", true)).await
    };
    assert!(missing.unwrap().is_none());

    daemon.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn listing_streams_every_record_then_ends() {
    let users: Vec<_> = ["alice", "bob", "carol"].map(ldap_user).into();
    let daemon = Harness::start(QueryMode::Cache, FakeSource::batch(users.clone())).await;
    let home = daemon.home();

    let listed: Vec<Record> = blocking(move || {
        request_list(&home, false)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
    })
    .await
    .unwrap();

    assert_eq!(listed.len(), 3);
    assert!(listed.iter().all(|r| r.pii.is_none()));
    let mut keys: Vec<_> = listed.iter().map(|r| r.surrogate_key.clone()).collect();
    let mut expected: Vec<_> = users.iter().map(|r| r.surrogate_key.clone()).collect();
    keys.sort();
    expected.sort();
    assert_eq!(keys, expected);

    daemon.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abandoned_listing_leaves_the_daemon_serving() {
    let users: Vec<_> = (0..300).map(|n| ldap_user(&format!("user{n}"))).collect();
    let daemon = Harness::start(QueryMode::Passthrough, FakeSource::streaming(users)).await;
    let home = daemon.home();

    let first = blocking(move || {
        let mut listing = request_list(&home, true).unwrap();
        listing.next()
    })
    .await;
    assert!(matches!(first, Some(Ok(_))));

    let status = daemon.wait_for(|s| s.running).await;
    assert_eq!(status.query_mode, QueryMode::Passthrough);

    daemon.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn passthrough_mode_answers_from_the_directory() {
    let daemon = Harness::start(
        QueryMode::Passthrough,
        FakeSource::batch(vec![ldap_user("alice")]),
    )
    .await;
    let dave = ldap_user("dave");
    daemon.source.set_users(vec![ldap_user("alice"), dave.clone()]);

    let found = get(&daemon.home(), dave.surrogate_key.as_str(), true)
        .await
        .unwrap();
    assert_eq!(found, Some(dave.clone()));
    assert_eq!(daemon.store.get(&dave.surrogate_key).await.unwrap(), None);

    daemon.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn manual_sync_writes_the_delta() {
    let alice = ldap_user("alice");
    let daemon = Harness::start(QueryMode::Cache, FakeSource::batch(vec![alice.clone()])).await;
    assert_eq!(daemon.store.count().await.unwrap(), 1);

    let carol = ldap_user("carol");
    daemon.source.set_users(vec![alice, carol.clone()]);

    let preview = {
        let home = daemon.home();
        blocking(move || request_sync(&home, true)).await.unwrap()
    };
    assert!(preview.dry_run);
    assert_eq!(preview.upserted, vec![carol.surrogate_key.clone()]);
    assert_eq!(daemon.store.count().await.unwrap(), 1);

    let report = {
        let home = daemon.home();
        blocking(move || request_sync(&home, false)).await.unwrap()
    };
    assert_eq!(report.upserted, vec![carol.surrogate_key.clone()]);
    assert_eq!(daemon.store.count().await.unwrap(), 2);

    let status = daemon.wait_for(|s| s.engine.cycles >= 2).await;
    assert_eq!(status.stored_records, Some(2));
    assert!(status.engine.last_error.is_none());

    daemon.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_request_is_rejected_and_the_connection_survives() {
    use std::io::{BufRead, BufReader, Write};
    use std::os::unix::net::UnixStream;

    let daemon = Harness::start(QueryMode::Cache, FakeSource::batch(Vec::new())).await;
    let socket = socket_path(daemon.home.path());

    let lines: Vec<serde_json::Value> = blocking(move || {
        let mut stream = UnixStream::connect(&socket).unwrap();
        stream
            .write_all(b"not json\n{\"cmd\":\"status\"}\n")
            .unwrap();
        let mut reader = BufReader::new(stream);
        (0..2)
            .map(|_| {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                serde_json::from_str(&line).unwrap()
            })
            .collect()
    })
    .await;

    assert_eq!(lines[0]["status"], "invalid_argument");
    assert_eq!(lines[1]["status"], "ok");
    assert_eq!(lines[1]["data"]["running"], true);

    daemon.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_daemon_does_not_take_over_a_live_socket() {
    let daemon = Harness::start(QueryMode::Cache, FakeSource::batch(Vec::new())).await;

    let parts = Collaborators {
        store: Store::open_in_memory().unwrap(),
        source: Arc::new(FakeSource::batch(Vec::new())),
    };
    let err = serve(
        socket_path(daemon.home.path()),
        Config::default(),
        parts,
        CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("already in use"));

    daemon.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_request_closes_everything() {
    let daemon = Harness::start(QueryMode::Cache, FakeSource::batch(vec![ldap_user("alice")])).await;
    let home = daemon.home();

    {
        let home = home.clone();
        blocking(move || request_stop(&home)).await.unwrap();
    }
    daemon.daemon.await.unwrap().unwrap();

    assert!(!socket_path(&home).exists());
    assert!(daemon.source.is_closed());
    assert!(matches!(daemon.store.count().await, Err(StoreError::Closed)));

    let err = blocking(move || request_status(&home)).await.unwrap_err();
    assert!(matches!(err, DaemonError::DaemonNotRunning { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_does_not_wait_on_a_client_that_stopped_reading() {
    use std::io::Write;
    use std::os::unix::net::UnixStream;

    let users: Vec<_> = (0..5_000).map(|n| ldap_user(&format!("user{n}"))).collect();
    let Harness {
        home,
        shutdown,
        daemon,
        ..
    } = Harness::start(QueryMode::Cache, FakeSource::batch(users)).await;
    let socket = socket_path(home.path());

    // Ask for far more than the socket buffers hold, then never read.
    let client = blocking(move || {
        let mut stream = UnixStream::connect(&socket).unwrap();
        stream
            .write_all(b"{\"cmd\":\"list\",\"include_pii\":true}\n")
            .unwrap();
        stream
    })
    .await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    shutdown.cancel();
    let finished = tokio::time::timeout(Duration::from_secs(5), daemon).await;
    assert!(
        finished.is_ok(),
        "daemon shutdown hung behind a client that stopped reading"
    );
    finished.unwrap().unwrap().unwrap();
    drop(client);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn request_sent_during_a_listing_is_answered_after_it() {
    use std::io::{BufRead, BufReader, Write};
    use std::os::unix::net::UnixStream;

    let users: Vec<_> = ["alice", "bob", "carol"].map(ldap_user).into();
    let daemon = Harness::start(QueryMode::Cache, FakeSource::batch(users)).await;
    let socket = socket_path(daemon.home.path());

    let lines: Vec<serde_json::Value> = blocking(move || {
        let mut stream = UnixStream::connect(&socket).unwrap();
        stream
            .write_all(b"{\"cmd\":\"list\",\"include_pii\":false}\n{\"cmd\":\"status\"}\n")
            .unwrap();
        let mut reader = BufReader::new(stream);
        (0..5)
            .map(|_| {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                serde_json::from_str(&line).unwrap()
            })
            .collect()
    })
    .await;

    assert!(lines[..3].iter().all(|l| l["status"] == "ok" && l["data"]["pii"].is_null()));
    assert_eq!(lines[3]["done"], true);
    assert_eq!(lines[4]["data"]["running"], true);

    daemon.stop().await;
}
