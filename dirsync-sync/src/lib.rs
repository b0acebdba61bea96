//! # dirsync-sync
//!
//! Reconciliation engine and query pipeline.
//!
//! - [`engine::SyncEngine`] pulls full snapshots from the directory and the
//!   store, writes the delta as one batch, and runs on a timer via
//!   [`engine::SyncEngine::run`].
//! - [`query::QueryPipeline`] serves lookups and streamed listings from the
//!   store or the directory, with per-request PII redaction.
//! - [`diff::plan_diff`] renders what a cycle would write without writing.
//! - [`pipeline`] wraps both for one-shot CLI use.

pub mod diff;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod plan;
pub mod query;

pub use engine::{EngineState, EngineStatus, SyncEngine, SyncReport, SyncRequest};
pub use error::{QueryError, SyncError};
pub use plan::Plan;
pub use query::{Backing, QueryPipeline};
