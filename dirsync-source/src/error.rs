//! Error types for dirsync-source.

use dirsync_core::SourceKind;
use ldap3::LdapError;
use thiserror::Error;

/// All errors a directory adapter can report.
///
/// "No such user" is not an error; lookups return `Option::None`.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The directory server could not be reached.
    #[error("cannot connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: LdapError,
    },

    /// The server refused the configured credentials.
    #[error("bind as '{bind_dn}' rejected: {reason}")]
    Bind { bind_dn: String, reason: String },

    /// A search request failed or returned a non-success result code.
    #[error("search under '{base}' failed: {source}")]
    Search {
        base: String,
        #[source]
        source: LdapError,
    },

    /// Backend failure with no protocol error attached.
    #[error("directory unavailable: {0}")]
    Unavailable(String),

    /// `close()` was called; the adapter accepts no further requests.
    #[error("source is closed")]
    Closed,

    /// The caller's cancellation token fired.
    #[error("enumeration cancelled")]
    Cancelled,

    /// No adapter exists for the configured kind.
    #[error("unsupported source kind '{0}'; expected: ldap, active_directory")]
    UnsupportedKind(SourceKind),
}

impl SourceError {
    /// True for caller-initiated termination, which is not a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SourceError::Cancelled)
    }
}
