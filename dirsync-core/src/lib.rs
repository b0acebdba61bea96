//! dirsync core library: record types, identity hashing, record streams,
//! configuration.
//!
//! - [`types`]: [`Record`], [`PersonalInfo`] and their enums
//! - [`identity`]: [`surrogate_key`]
//! - [`stream`]: the record/error channel pair used by every enumeration
//! - [`config`]: load / validate
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod identity;
pub mod stream;
pub mod types;

pub use error::ConfigError;
pub use identity::surrogate_key;
pub use stream::{record_channel, Delivery, RecordSender, RecordStream};
pub use types::{Attribute, PersonalInfo, Record, SourceKind, SurrogateKey, UserStatus};
