//! dirsync daemon runtime: sync engine loop + local socket API.

mod error;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{
    request_get, request_list, request_resolve, request_status, request_stop, request_sync,
    send_request, DaemonRequest, DaemonResponse, DaemonStatus, ListStream, StatusCode,
};
pub use runtime::{init_tracing, run, serve, start_blocking};
