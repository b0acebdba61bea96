//! Lazily established, self-healing LDAP session shared by both adapters.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use dirsync_core::config::SourceConfig;

use crate::error::SourceError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// LDAP result code for invalidCredentials.
const RC_INVALID_CREDENTIALS: u32 = 49;

pub(crate) struct Session {
    config: SourceConfig,
    ldap: Mutex<Option<Ldap>>,
    closed: AtomicBool,
}

impl Session {
    pub(crate) fn new(config: SourceConfig) -> Self {
        Self {
            config,
            ldap: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// A live handle, connecting (or reconnecting) first when needed.
    pub(crate) async fn handle(&self) -> Result<Ldap, SourceError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SourceError::Closed);
        }
        let mut guard = self.ldap.lock().await;
        if let Some(ldap) = guard.as_mut() {
            if !ldap.is_closed() {
                return Ok(ldap.clone());
            }
            debug!(host = %self.config.host, "cached session closed; reconnecting");
        }
        let ldap = connect(&self.config).await?;
        *guard = Some(ldap.clone());
        Ok(ldap)
    }

    /// Subtree search returning every matching entry.
    pub(crate) async fn search(
        &self,
        base: &str,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<SearchEntry>, SourceError> {
        let mut ldap = self.handle().await?;
        let search_err = |source| SourceError::Search {
            base: base.to_string(),
            source,
        };
        let (entries, _) = ldap
            .search(base, Scope::Subtree, filter, attrs.to_vec())
            .await
            .map_err(search_err)?
            .success()
            .map_err(search_err)?;
        Ok(entries.into_iter().map(SearchEntry::construct).collect())
    }

    pub(crate) async fn close(&self) -> Result<(), SourceError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(SourceError::Closed);
        }
        if let Some(mut ldap) = self.ldap.lock().await.take() {
            if let Err(e) = ldap.unbind().await {
                warn!(error = %e, "error during LDAP unbind");
            }
        }
        info!(host = %self.config.host, "directory session closed");
        Ok(())
    }
}

async fn connect(config: &SourceConfig) -> Result<Ldap, SourceError> {
    let url = config.url();
    debug!(url = %url, "connecting to directory");

    let settings = LdapConnSettings::new().set_conn_timeout(CONNECT_TIMEOUT);
    let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &url)
        .await
        .map_err(|source| SourceError::Connect {
            url: url.clone(),
            source,
        })?;

    tokio::spawn(async move {
        if let Err(e) = conn.drive().await {
            warn!(error = %e, "LDAP connection driver error");
        }
    });

    if !config.bind_dn.is_empty() {
        let result = ldap
            .simple_bind(&config.bind_dn, &config.bind_password)
            .await
            .map_err(|e| SourceError::Bind {
                bind_dn: config.bind_dn.clone(),
                reason: e.to_string(),
            })?;
        if result.rc == RC_INVALID_CREDENTIALS {
            return Err(SourceError::Bind {
                bind_dn: config.bind_dn.clone(),
                reason: "invalid credentials".to_string(),
            });
        }
        if result.rc != 0 {
            return Err(SourceError::Bind {
                bind_dn: config.bind_dn.clone(),
                reason: format!("result code {}: {}", result.rc, result.text),
            });
        }
    }

    info!(host = %config.host, port = config.port, "directory session established");
    Ok(ldap)
}

/// First value of `name` on `entry`, matching the attribute name
/// case-insensitively. Empty when absent.
pub(crate) fn first_value(entry: &SearchEntry, name: &str) -> String {
    entry
        .attrs
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .and_then(|(_, values)| values.first())
        .cloned()
        .unwrap_or_default()
}
