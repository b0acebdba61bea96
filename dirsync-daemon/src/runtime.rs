use std::collections::VecDeque;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use dirsync_core::config::{self, Config, LogFormat};
use dirsync_core::Record;
use dirsync_store::Store;
use dirsync_sync::pipeline::Collaborators;
use dirsync_sync::{
    EngineStatus, QueryError, QueryPipeline, SyncEngine, SyncReport, SyncRequest,
};

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;
use crate::protocol::{DaemonRequest, DaemonResponse, DaemonStatus, StatusCode};

/// Manual sync requests waiting for the engine loop.
const SYNC_QUEUE_DEPTH: usize = 16;

/// Request lines buffered from one client while a listing is in flight.
const PENDING_REQUEST_LIMIT: usize = 32;

/// What every socket client handler shares.
#[derive(Clone)]
struct ApiContext {
    pipeline: QueryPipeline,
    store: Store,
    sync_tx: mpsc::Sender<SyncRequest>,
    status_rx: watch::Receiver<EngineStatus>,
    shutdown: CancellationToken,
    socket: PathBuf,
    config: Arc<Config>,
    started_at: DateTime<Utc>,
}

/// Load configuration, start the daemon runtime and block the current thread
/// until it exits.
pub fn start_blocking(home: &Path, config_path: Option<&Path>) -> Result<(), DaemonError> {
    let config = config::load_at(home, config_path)?;
    init_tracing(config.log.format);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), config))
}

/// Open the store and adapter described by `config` and serve until ctrl-c,
/// SIGTERM or a `stop` request.
pub async fn run(home: PathBuf, config: Config) -> Result<(), DaemonError> {
    let parts = Collaborators::open(&config)?;
    info!(
        source = %config.source.kind,
        url = %config.source.url(),
        store = %parts.store.location(),
        "collaborators ready",
    );
    serve(socket_path(&home), config, parts, CancellationToken::new()).await
}

/// Run the engine loop, the socket server and the signal handler over already
/// open collaborators until `shutdown` fires, then close the adapter and the
/// store in that order.
pub async fn serve(
    socket: PathBuf,
    config: Config,
    parts: Collaborators,
    shutdown: CancellationToken,
) -> Result<(), DaemonError> {
    let listener = bind_socket(&socket)?;
    info!(socket = %socket.display(), "daemon listening");

    let engine = Arc::new(SyncEngine::new(
        parts.store.clone(),
        Arc::clone(&parts.source),
    ));
    let pipeline = QueryPipeline::new(
        config.query.mode.into(),
        parts.store.clone(),
        Arc::clone(&parts.source),
    );
    let (sync_tx, sync_rx) = mpsc::channel::<SyncRequest>(SYNC_QUEUE_DEPTH);
    let (status_tx, status_rx) = watch::channel(EngineStatus::default());
    let interval = config.sync.interval();

    let ctx = ApiContext {
        pipeline,
        store: parts.store.clone(),
        sync_tx,
        status_rx,
        shutdown: shutdown.clone(),
        socket: socket.clone(),
        config: Arc::new(config),
        started_at: Utc::now(),
    };

    let engine_handle = {
        let stop = shutdown.clone();
        spawn_until_shutdown(&shutdown, async move {
            engine.run(interval, sync_rx, status_tx, stop).await;
            Ok(())
        })
    };
    let socket_handle = spawn_until_shutdown(&shutdown, socket_server_task(listener, ctx));
    let signal_handle = spawn_until_shutdown(&shutdown, signal_task(shutdown.clone()));

    let (engine_result, socket_result, signal_result) =
        tokio::join!(engine_handle, socket_handle, signal_handle);

    let mut outcome = Ok(());
    for (task, result) in [
        ("sync_engine", engine_result),
        ("socket_server", socket_result),
        ("signal_handler", signal_result),
    ] {
        if let Err(err) = handle_join(task, result) {
            error!(task, error = %err, "daemon task failed");
            if outcome.is_ok() {
                outcome = Err(err);
            }
        }
    }

    let closed = parts.close().await;
    info!("daemon stopped");
    outcome?;
    closed?;
    Ok(())
}

/// Spawn `task`; whichever way it ends, every other task is told to stop.
fn spawn_until_shutdown<F>(
    shutdown: &CancellationToken,
    task: F,
) -> JoinHandle<Result<(), DaemonError>>
where
    F: std::future::Future<Output = Result<(), DaemonError>> + Send + 'static,
{
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        let result = task.await;
        shutdown.cancel();
        result
    })
}

async fn signal_task(shutdown: CancellationToken) -> Result<(), DaemonError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).map_err(|e| io_err("SIGTERM handler", e))?;
    tokio::select! {
        _ = shutdown.cancelled() => Ok(()),
        _ = terminate.recv() => {
            info!("received SIGTERM, shutting down daemon");
            shutdown.cancel();
            Ok(())
        }
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => {
                    info!("received ctrl-c, shutting down daemon");
                    shutdown.cancel();
                    Ok(())
                }
                Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Socket server
// ---------------------------------------------------------------------------

async fn socket_server_task(listener: UnixListener, ctx: ApiContext) -> Result<(), DaemonError> {
    let mut clients = JoinSet::new();

    let result = loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => break Ok(()),
            accepted = listener.accept() => {
                let stream = match accepted {
                    Ok((stream, _)) => stream,
                    Err(err) => break Err(io_err(&ctx.socket, err)),
                };
                let ctx = ctx.clone();
                clients.spawn(async move {
                    if let Err(err) = handle_socket_client(stream, ctx).await {
                        warn!(error = %err, "socket client error");
                    }
                });
            }
            Some(_) = clients.join_next(), if !clients.is_empty() => {}
        }
    };

    // Handlers observe the shutdown token; wait for them before the
    // collaborators are closed underneath them.
    while clients.join_next().await.is_some() {}

    if ctx.socket.exists() {
        let _ = fs::remove_file(&ctx.socket);
    }
    result
}

async fn handle_socket_client(stream: UnixStream, ctx: ApiContext) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut pending: VecDeque<String> = VecDeque::new();

    loop {
        let line = match pending.pop_front() {
            Some(line) => line,
            None => {
                let next = tokio::select! {
                    _ = ctx.shutdown.cancelled() => break,
                    next = lines.next_line() => next.map_err(|e| io_err("daemon socket read", e))?,
                };
                match next {
                    Some(line) => line,
                    None => break,
                }
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<DaemonRequest>(&line) {
            Ok(request) => request,
            Err(err) => {
                let rejected = DaemonResponse::error(
                    StatusCode::InvalidArgument,
                    format!("invalid request: {err}"),
                );
                if !write_or_cancel(&mut writer, &rejected, &ctx.shutdown).await? {
                    break;
                }
                continue;
            }
        };

        // Fires when this request is done, the client leaves or the daemon stops.
        let cancel = ctx.shutdown.child_token();
        let _cancel_on_exit = cancel.clone().drop_guard();

        let response = match request {
            DaemonRequest::List { include_pii } => {
                let end = stream_list(
                    &ctx,
                    include_pii,
                    &cancel,
                    &mut lines,
                    &mut writer,
                    &mut pending,
                )
                .await?;
                match end {
                    ListEnd::Finished => continue,
                    ListEnd::Abandoned => break,
                }
            }
            DaemonRequest::Stop => {
                info!("stop requested over socket");
                let stopping = DaemonResponse::ok(json!({ "stopping": true }));
                let written = write_or_cancel(&mut writer, &stopping, &cancel).await;
                ctx.shutdown.cancel();
                written?;
                break;
            }
            DaemonRequest::Get { key, include_pii } => {
                let found = ctx.pipeline.get_record(&key, include_pii, &cancel).await;
                lookup_response(found, &key)
            }
            DaemonRequest::Resolve { id, include_pii } => {
                let found = ctx.pipeline.resolve(&id, include_pii, &cancel).await;
                lookup_response(found, &id)
            }
            DaemonRequest::Sync { dry_run } => sync_response(enqueue_sync(&ctx.sync_tx, dry_run).await),
            DaemonRequest::Status => data_response(&build_status_payload(&ctx).await),
        };

        if !write_or_cancel(&mut writer, &response, &cancel).await? {
            break;
        }
    }

    Ok(())
}

enum ListEnd {
    /// The terminal line was written.
    Finished,
    /// The client left or the daemon is stopping; the listing was cancelled.
    Abandoned,
}

/// Forward one listing to the client, one line per record, then the terminal
/// line.
///
/// Between records the reader stays polled, so EOF cancels the listing.
/// Lines that arrive meanwhile are queued in `pending`, up to
/// [`PENDING_REQUEST_LIMIT`]; past that the reader is left alone and a dead
/// client surfaces as a failed write. A write blocked on a client that
/// stopped reading gives way to `cancel`.
async fn stream_list(
    ctx: &ApiContext,
    include_pii: bool,
    cancel: &CancellationToken,
    lines: &mut Lines<BufReader<OwnedReadHalf>>,
    writer: &mut OwnedWriteHalf,
    pending: &mut VecDeque<String>,
) -> Result<ListEnd, DaemonError> {
    let mut records = ctx.pipeline.list_records(include_pii, cancel.clone());
    let mut sent = 0usize;

    loop {
        let watch_reader = pending.len() < PENDING_REQUEST_LIMIT;
        let item = tokio::select! {
            item = records.next() => item,
            line = lines.next_line(), if watch_reader => {
                match line {
                    Ok(Some(line)) => pending.push_back(line),
                    Ok(None) | Err(_) => {
                        cancel.cancel();
                        debug!(sent, "client went away mid-listing");
                        return Ok(ListEnd::Abandoned);
                    }
                }
                continue;
            }
        };

        let (response, terminal) = match item {
            Some(Ok(record)) => (data_response(&record), false),
            Some(Err(err)) => {
                log_query_error(&err);
                (DaemonResponse::query_error(&err), true)
            }
            None => (DaemonResponse::done(), true),
        };

        if !write_or_cancel(writer, &response, cancel).await? {
            debug!(sent, "listing cancelled before the client took the next line");
            return Ok(ListEnd::Abandoned);
        }
        if terminal || !response.is_ok() {
            debug!(sent, "listing finished");
            return Ok(ListEnd::Finished);
        }
        sent += 1;
    }
}

fn lookup_response(found: Result<Option<Record>, QueryError>, what: &str) -> DaemonResponse {
    match found {
        Ok(Some(record)) => data_response(&record),
        Ok(None) => DaemonResponse::error(StatusCode::NotFound, format!("no record for '{what}'")),
        Err(err) => {
            log_query_error(&err);
            DaemonResponse::query_error(&err)
        }
    }
}

fn sync_response(outcome: Result<SyncReport, DaemonError>) -> DaemonResponse {
    match outcome {
        Ok(report) => data_response(&report),
        Err(DaemonError::Sync(err)) if err.is_cancelled() => {
            DaemonResponse::error(StatusCode::Cancelled, err.to_string())
        }
        Err(err) => DaemonResponse::error(StatusCode::Internal, err.to_string()),
    }
}

fn data_response<T: Serialize>(value: &T) -> DaemonResponse {
    match serde_json::to_value(value) {
        Ok(data) => DaemonResponse::ok(data),
        Err(err) => DaemonResponse::error(StatusCode::Internal, format!("encode response: {err}")),
    }
}

fn log_query_error(err: &QueryError) {
    match err {
        QueryError::Cancelled => debug!("query cancelled"),
        QueryError::InvalidArgument(reason) => debug!(reason = %reason, "query rejected"),
        other => warn!(error = %other, "query failed"),
    }
}

async fn build_status_payload(ctx: &ApiContext) -> DaemonStatus {
    let engine = ctx.status_rx.borrow().clone();
    let stored_records = match ctx.store.count().await {
        Ok(count) => Some(count),
        Err(err) => {
            warn!(error = %err, "counting stored records failed");
            None
        }
    };
    DaemonStatus {
        running: true,
        pid: std::process::id(),
        started_at: ctx.started_at,
        socket: ctx.socket.clone(),
        source_kind: ctx.config.source.kind,
        query_mode: ctx.config.query.mode,
        interval_secs: ctx.config.sync.interval_secs,
        stored_records,
        engine,
    }
}

async fn enqueue_sync(
    sync_tx: &mpsc::Sender<SyncRequest>,
    dry_run: bool,
) -> Result<SyncReport, DaemonError> {
    let (tx, rx) = oneshot::channel();
    sync_tx
        .send(SyncRequest {
            dry_run,
            respond_to: tx,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("sync queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("sync response"))?;
    Ok(outcome?)
}

// ---------------------------------------------------------------------------
// Socket plumbing
// ---------------------------------------------------------------------------

fn bind_socket(socket: &Path) -> Result<UnixListener, DaemonError> {
    if let Some(dir) = socket.parent() {
        fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    prepare_socket_for_bind(socket)?;
    let listener = UnixListener::bind(socket).map_err(|e| io_err(socket, e))?;
    set_socket_permissions(socket)?;
    Ok(listener)
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

/// [`write_response`] that gives up when `cancel` fires. Returns `false`
/// when cancelled; the connection may then hold a partial line and must be
/// dropped.
async fn write_or_cancel(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
    cancel: &CancellationToken,
) -> Result<bool, DaemonError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Ok(false),
        written = write_response(writer, response) => written.map(|()| true),
    }
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the `info` default.
pub fn init_tracing(format: LogFormat) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_target(false);
    let _ = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
