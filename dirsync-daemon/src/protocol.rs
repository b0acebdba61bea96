//! Newline-delimited JSON protocol spoken over the daemon socket, plus the
//! blocking client helpers the CLI uses.
//!
//! Every request is one JSON object tagged by `cmd`. Every response line
//! carries a `status`. `list` answers with one line per record followed by a
//! terminal line that is either `{"status":"ok","done":true}` or an error.

use std::fmt;
use std::io::{BufRead, BufReader, Lines, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use dirsync_core::config::QueryMode;
use dirsync_core::{Record, SourceKind};
use dirsync_sync::{EngineStatus, QueryError, SyncReport};

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

/// JSON newline-delimited request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum DaemonRequest {
    Get {
        key: String,
        #[serde(default)]
        include_pii: bool,
    },
    List {
        #[serde(default)]
        include_pii: bool,
    },
    Resolve {
        id: String,
        #[serde(default)]
        include_pii: bool,
    },
    Sync {
        #[serde(default)]
        dry_run: bool,
    },
    Status,
    Stop,
}

/// Outcome class of one response line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Ok,
    InvalidArgument,
    NotFound,
    Internal,
    Cancelled,
}

impl StatusCode {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusCode::Ok => "ok",
            StatusCode::InvalidArgument => "invalid_argument",
            StatusCode::NotFound => "not_found",
            StatusCode::Internal => "internal",
            StatusCode::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&QueryError> for StatusCode {
    fn from(err: &QueryError) -> Self {
        match err {
            QueryError::InvalidArgument(_) => StatusCode::InvalidArgument,
            QueryError::Store(_) | QueryError::Source(_) => StatusCode::Internal,
            QueryError::Cancelled => StatusCode::Cancelled,
        }
    }
}

/// JSON newline-delimited response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub status: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set on the terminal line of a `list` stream.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub done: bool,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            status: StatusCode::Ok,
            data: Some(data),
            error: None,
            done: false,
        }
    }

    pub fn done() -> Self {
        Self {
            status: StatusCode::Ok,
            data: None,
            error: None,
            done: true,
        }
    }

    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            data: None,
            error: Some(message.into()),
            done: false,
        }
    }

    pub fn query_error(err: &QueryError) -> Self {
        Self::error(StatusCode::from(err), err.to_string())
    }

    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::Ok
    }
}

/// Payload of a `status` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub running: bool,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub socket: PathBuf,
    pub source_kind: SourceKind,
    pub query_mode: QueryMode,
    pub interval_secs: u64,
    /// `None` when the store could not be counted.
    pub stored_records: Option<u64>,
    pub engine: EngineStatus,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

fn connect(socket: &Path) -> Result<UnixStream, DaemonError> {
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning {
            socket: socket.to_path_buf(),
        });
    }
    UnixStream::connect(socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning {
                socket: socket.to_path_buf(),
            }
        } else {
            io_err(socket, err)
        }
    })
}

fn write_request(
    stream: &mut UnixStream,
    socket: &Path,
    request: &DaemonRequest,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(request)?;
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(socket, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(socket, e))?;
    stream.flush().map_err(|e| io_err(socket, e))
}

/// Send one JSON request to the daemon socket and return one response.
pub fn send_request(home: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    let socket = socket_path(home);
    let mut stream = connect(&socket)?;
    write_request(&mut stream, &socket, request)?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .map_err(|e| io_err(&socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "daemon closed connection before responding".to_string(),
        ));
    }

    let response: DaemonResponse = serde_json::from_str(line.trim_end())?;
    Ok(response)
}

/// Query the daemon's status, retrying briefly while the socket comes up.
pub fn request_status(home: &Path) -> Result<DaemonStatus, DaemonError> {
    let mut last_not_running: Option<DaemonError> = None;
    for attempt in 0..5 {
        match send_request(home, &DaemonRequest::Status) {
            Ok(response) => {
                let data = response_into_data(response)?;
                return Ok(serde_json::from_value(data)?);
            }
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                last_not_running = Some(err);
                if attempt < 4 {
                    sleep(Duration::from_millis(100));
                    continue;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_not_running.unwrap_or_else(|| {
        DaemonError::Protocol("daemon status retry loop exited unexpectedly".to_string())
    }))
}

pub fn request_stop(home: &Path) -> Result<(), DaemonError> {
    let response = send_request(home, &DaemonRequest::Stop)?;
    response_into_data(response).map(|_| ())
}

/// Queue a reconciliation on the daemon and wait for its report.
pub fn request_sync(home: &Path, dry_run: bool) -> Result<SyncReport, DaemonError> {
    let response = send_request(home, &DaemonRequest::Sync { dry_run })?;
    let data = response_into_data(response)?;
    Ok(serde_json::from_value(data)?)
}

/// `Ok(None)` when the daemon answers `not_found`.
pub fn request_get(
    home: &Path,
    key: &str,
    include_pii: bool,
) -> Result<Option<Record>, DaemonError> {
    let response = send_request(
        home,
        &DaemonRequest::Get {
            key: key.to_string(),
            include_pii,
        },
    )?;
    optional_record(response)
}

/// `Ok(None)` when the directory has no such user.
pub fn request_resolve(
    home: &Path,
    id: &str,
    include_pii: bool,
) -> Result<Option<Record>, DaemonError> {
    let response = send_request(
        home,
        &DaemonRequest::Resolve {
            id: id.to_string(),
            include_pii,
        },
    )?;
    optional_record(response)
}

/// Start a streamed listing. Dropping the returned iterator closes the
/// connection, which cancels the listing on the daemon side.
pub fn request_list(home: &Path, include_pii: bool) -> Result<ListStream, DaemonError> {
    let socket = socket_path(home);
    let mut stream = connect(&socket)?;
    write_request(&mut stream, &socket, &DaemonRequest::List { include_pii })?;
    Ok(ListStream {
        lines: BufReader::new(stream).lines(),
        socket,
        finished: false,
    })
}

/// Records of one `list` response, in order.
pub struct ListStream {
    lines: Lines<BufReader<UnixStream>>,
    socket: PathBuf,
    finished: bool,
}

impl Iterator for ListStream {
    type Item = Result<Record, DaemonError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let item = self.read_one();
        if !matches!(item, Some(Ok(_))) {
            self.finished = true;
        }
        item
    }
}

impl ListStream {
    fn read_one(&mut self) -> Option<Result<Record, DaemonError>> {
        let line = match self.lines.next() {
            None => {
                return Some(Err(DaemonError::Protocol(
                    "daemon closed the listing without a terminal line".to_string(),
                )))
            }
            Some(Err(err)) => return Some(Err(io_err(&self.socket, err))),
            Some(Ok(line)) => line,
        };
        let response: DaemonResponse = match serde_json::from_str(line.trim_end()) {
            Ok(response) => response,
            Err(err) => return Some(Err(err.into())),
        };
        if response.done && response.is_ok() {
            return None;
        }
        Some(response_into_data(response).and_then(decode_record))
    }
}

fn optional_record(response: DaemonResponse) -> Result<Option<Record>, DaemonError> {
    if response.status == StatusCode::NotFound {
        return Ok(None);
    }
    response_into_data(response).and_then(decode_record).map(Some)
}

fn decode_record(data: Value) -> Result<Record, DaemonError> {
    Ok(serde_json::from_value(data)?)
}

fn response_into_data(response: DaemonResponse) -> Result<Value, DaemonError> {
    if response.is_ok() {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(DaemonError::Remote {
            status: response.status,
            message: response
                .error
                .unwrap_or_else(|| "unknown daemon error".to_string()),
        })
    }
}
