//! Adapter selection by configured kind.

use std::sync::Arc;

use dirsync_core::config::SourceConfig;
use dirsync_core::SourceKind;

use crate::ad::ActiveDirectorySource;
use crate::error::SourceError;
use crate::ldap::LdapSource;
use crate::traits::DirectorySource;

/// Build the adapter for `config.kind`. No connection is made here.
pub fn new_source(config: &SourceConfig) -> Result<Arc<dyn DirectorySource>, SourceError> {
    match config.kind {
        SourceKind::Ldap => Ok(Arc::new(LdapSource::new(config.clone()))),
        SourceKind::ActiveDirectory => Ok(Arc::new(ActiveDirectorySource::new(config.clone()))),
        SourceKind::Unspecified => Err(SourceError::UnsupportedKind(config.kind)),
    }
}
