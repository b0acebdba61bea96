//! Domain types for reconciled directory records.
//!
//! All types are serializable via serde + serde_json. Optional data is
//! omitted on the wire when absent so that stored values stay
//! forward-compatible with schema additions.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Stable surrogate key addressing one record in the store.
///
/// Always produced by [`crate::identity::surrogate_key`]; never parsed back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurrogateKey(pub String);

impl SurrogateKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SurrogateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for SurrogateKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SurrogateKey {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Account status as reported by the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    #[default]
    Unspecified,
    Active,
    Disabled,
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserStatus::Unspecified => write!(f, "unspecified"),
            UserStatus::Active => write!(f, "active"),
            UserStatus::Disabled => write!(f, "disabled"),
        }
    }
}

/// Which directory adapter produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    Unspecified,
    ActiveDirectory,
    Ldap,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Unspecified => write!(f, "unspecified"),
            SourceKind::ActiveDirectory => write!(f, "active_directory"),
            SourceKind::Ldap => write!(f, "ldap"),
        }
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ldap" => Ok(SourceKind::Ldap),
            "active_directory" | "ad" => Ok(SourceKind::ActiveDirectory),
            other => Err(format!(
                "unknown source kind '{other}'; expected: ldap, active_directory"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// Adapter-specific field not otherwise modeled by [`PersonalInfo`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attribute {
    pub key: String,
    pub value: String,
}

impl Attribute {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Personally identifying data for one identity. Empty strings mean absent.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonalInfo {
    /// Adapter-native location of the entry (e.g. the LDAP distinguished name).
    #[serde(skip_serializing_if = "String::is_empty")]
    pub source_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub email: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub first_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub last_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub phone: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub department: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub manager_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub employee_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub location: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<Attribute>,
}

/// The reconciled representation of one directory identity.
///
/// Equality is full structural equality, including the nested
/// [`PersonalInfo`] and the order of its attributes. The sync engine relies
/// on this for change detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub surrogate_key: SurrogateKey,
    #[serde(default)]
    pub status: UserStatus,
    #[serde(default)]
    pub source_kind: SourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pii: Option<PersonalInfo>,
}

impl Record {
    /// Build a record whose surrogate key is derived from `pii.source_id`.
    pub fn from_source(status: UserStatus, source_kind: SourceKind, pii: PersonalInfo) -> Self {
        Self {
            surrogate_key: crate::identity::surrogate_key(&pii.source_id),
            status,
            source_kind,
            pii: Some(pii),
        }
    }

    /// Drop the whole PII substructure.
    pub fn redacted(mut self) -> Self {
        self.pii = None;
        self
    }

    /// Apply a caller's PII preference: unchanged when `include_pii`,
    /// otherwise redacted.
    pub fn with_pii_policy(self, include_pii: bool) -> Self {
        if include_pii {
            self
        } else {
            self.redacted()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
