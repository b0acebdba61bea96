//! Runtime configuration.
//!
//! # Sources, in increasing precedence
//!
//! 1. Built-in defaults
//! 2. YAML file: `<home>/.dirsync/config.yaml`, or an explicit path
//! 3. Environment variables (`IDP_*`, `STORAGE_*`, `SYNC_INTERVAL_SECS`,
//!    `QUERY_MODE`, `DIRSYNC_LOG_FORMAT`)
//!
//! # API pattern
//!
//! Every function touching the filesystem has two forms:
//! - `fn_at(home: &Path, …)`: explicit home, used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()` and delegates to `_at`

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::SourceKind;

pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_LDAP_PORT: u16 = 389;

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.dirsync/`
pub fn dirsync_root(home: &Path) -> PathBuf {
    home.join(".dirsync")
}

/// `<home>/.dirsync/config.yaml`. Pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    dirsync_root(home).join("config.yaml")
}

/// `<home>/.dirsync/data/directory.db`. Pure, no I/O.
pub fn default_store_path_at(home: &Path) -> PathBuf {
    dirsync_root(home).join("data").join("directory.db")
}

/// Home directory of the current user.
pub fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

// ---------------------------------------------------------------------------
// 2. Model
// ---------------------------------------------------------------------------

/// Whether queries are answered from the local store or the directory itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    #[default]
    Cache,
    Passthrough,
}

impl std::str::FromStr for QueryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cache" => Ok(QueryMode::Cache),
            "passthrough" => Ok(QueryMode::Passthrough),
            other => Err(format!(
                "unknown query mode '{other}'; expected: cache, passthrough"
            )),
        }
    }
}

/// Log line format for the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}'; expected: text, json")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file. Empty means `<home>/.dirsync/data/directory.db`.
    pub path: PathBuf,
    pub in_memory: bool,
}

/// Connection settings for the directory source.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub host: String,
    pub port: u16,
    pub base_dn: String,
    /// Subtree holding user entries; falls back to `base_dn` when empty.
    pub users_dn: String,
    pub bind_dn: String,
    pub bind_password: String,
    pub use_tls: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Ldap,
            host: "localhost".to_string(),
            port: DEFAULT_LDAP_PORT,
            base_dn: String::new(),
            users_dn: String::new(),
            bind_dn: String::new(),
            bind_password: String::new(),
            use_tls: false,
        }
    }
}

impl SourceConfig {
    /// `ldap://host:port` or `ldaps://host:port`.
    pub fn url(&self) -> String {
        let scheme = if self.use_tls { "ldaps" } else { "ldap" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    pub fn users_dn(&self) -> &str {
        if self.users_dn.is_empty() {
            &self.base_dn
        } else {
            &self.users_dn
        }
    }
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("base_dn", &self.base_dn)
            .field("users_dn", &self.users_dn)
            .field("bind_dn", &self.bind_dn)
            .field("bind_password", &"<redacted>")
            .field("use_tls", &self.use_tls)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct QueryConfig {
    pub mode: QueryMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LogConfig {
    pub format: LogFormat,
}

/// Root configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub storage: StorageConfig,
    pub source: SourceConfig,
    pub query: QueryConfig,
    pub log: LogConfig,
}

// ---------------------------------------------------------------------------
// 3. Load
// ---------------------------------------------------------------------------

/// Load configuration rooted at `home`, apply process environment overrides
/// and validate.
///
/// With `explicit = Some(path)` the file must exist; otherwise a missing
/// `<home>/.dirsync/config.yaml` just means defaults.
pub fn load_at(home: &Path, explicit: Option<&Path>) -> Result<Config, ConfigError> {
    load_with_env_at(home, explicit, |name| std::env::var(name).ok())
}

/// `load_at` convenience wrapper.
pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    load_at(&home()?, explicit)
}

/// `load_at` with an injectable environment lookup.
pub fn load_with_env_at<F>(
    home: &Path,
    explicit: Option<&Path>,
    env: F,
) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(ConfigError::ConfigNotFound {
                    path: path.to_path_buf(),
                });
            }
            read_file(path)?
        }
        None => {
            let path = config_path_at(home);
            if path.exists() {
                read_file(&path)?
            } else {
                Config::default()
            }
        }
    };

    config.apply_env(env)?;
    if config.storage.path.as_os_str().is_empty() {
        config.storage.path = default_store_path_at(home);
    }
    config.validate()?;
    Ok(config)
}

fn read_file(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

impl Config {
    /// Override fields from environment variables. Blank values are ignored.
    pub fn apply_env<F>(&mut self, env: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| env(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("IDP_TYPE") {
            self.source.kind = parse_env("IDP_TYPE", &v)?;
        }
        if let Some(v) = get("IDP_HOST") {
            self.source.host = v;
        }
        if let Some(v) = get("IDP_PORT") {
            self.source.port = parse_env("IDP_PORT", &v)?;
        }
        if let Some(v) = get("IDP_BASE_DN") {
            self.source.base_dn = v;
        }
        if let Some(v) = get("IDP_USERS_DN") {
            self.source.users_dn = v;
        }
        if let Some(v) = get("IDP_BIND_DN") {
            self.source.bind_dn = v;
        }
        if let Some(v) = get("IDP_BIND_PASS") {
            self.source.bind_password = v;
        }
        if let Some(v) = get("IDP_USE_TLS") {
            self.source.use_tls = parse_env("IDP_USE_TLS", &v)?;
        }
        if let Some(v) = get("STORAGE_PATH") {
            self.storage.path = PathBuf::from(v);
        }
        if let Some(v) = get("STORAGE_IN_MEMORY") {
            self.storage.in_memory = parse_env("STORAGE_IN_MEMORY", &v)?;
        }
        if let Some(v) = get("SYNC_INTERVAL_SECS") {
            self.sync.interval_secs = parse_env("SYNC_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = get("QUERY_MODE") {
            self.query.mode = parse_env("QUERY_MODE", &v)?;
        }
        if let Some(v) = get("DIRSYNC_LOG_FORMAT") {
            self.log.format = parse_env("DIRSYNC_LOG_FORMAT", &v)?;
        }
        Ok(())
    }

    /// Reject configurations the daemon cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.kind == SourceKind::Unspecified {
            return Err(ConfigError::Invalid(
                "source.kind must be one of: ldap, active_directory".to_string(),
            ));
        }
        if self.source.host.trim().is_empty() {
            return Err(ConfigError::Invalid("source.host is required".to_string()));
        }
        if self.source.port == 0 {
            return Err(ConfigError::Invalid("source.port must be non-zero".to_string()));
        }
        if self.sync.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sync.interval_secs must be at least 1".to_string(),
            ));
        }
        if !self.storage.in_memory && self.storage.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "storage.path is required unless storage.in_memory is set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse an environment value; booleans accept `1/0`, `true/false`, `yes/no`.
fn parse_env<T: EnvValue>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    T::parse_env(value.trim()).map_err(|reason| ConfigError::InvalidEnv {
        var,
        value: value.to_string(),
        reason,
    })
}

trait EnvValue: Sized {
    fn parse_env(value: &str) -> Result<Self, String>;
}

impl EnvValue for bool {
    fn parse_env(value: &str) -> Result<Self, String> {
        match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "t" | "yes" | "on" => Ok(true),
            "0" | "false" | "f" | "no" | "off" => Ok(false),
            other => Err(format!("expected a boolean, got '{other}'")),
        }
    }
}

impl EnvValue for u16 {
    fn parse_env(value: &str) -> Result<Self, String> {
        value.parse().map_err(|e| format!("{e}"))
    }
}

impl EnvValue for u64 {
    fn parse_env(value: &str) -> Result<Self, String> {
        value.parse().map_err(|e| format!("{e}"))
    }
}

impl EnvValue for SourceKind {
    fn parse_env(value: &str) -> Result<Self, String> {
        value.parse()
    }
}

impl EnvValue for QueryMode {
    fn parse_env(value: &str) -> Result<Self, String> {
        value.parse()
    }
}

impl EnvValue for LogFormat {
    fn parse_env(value: &str) -> Result<Self, String> {
        value.parse()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
