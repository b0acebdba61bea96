//! Generic LDAP (inetOrgPerson) adapter. Enumeration is batch-shaped.

use async_trait::async_trait;
use ldap3::SearchEntry;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use dirsync_core::config::SourceConfig;
use dirsync_core::{PersonalInfo, Record, SourceKind, UserStatus};

use crate::dn::{escape_filter_value, first_rdn_value};
use crate::error::SourceError;
use crate::session::{first_value, Session};
use crate::traits::{DirectorySource, UserListing};

const USER_FILTER: &str = "(objectClass=inetOrgPerson)";

const USER_ATTRS: &[&str] = &[
    "uid",
    "cn",
    "sn",
    "givenName",
    "mail",
    "telephoneNumber",
    "title",
    "departmentNumber",
    "manager",
    "employeeNumber",
    "l",
];

pub struct LdapSource {
    session: Session,
}

impl LdapSource {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            session: Session::new(config),
        }
    }
}

#[async_trait]
impl DirectorySource for LdapSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Ldap
    }

    async fn get_user(&self, id: &str) -> Result<Option<Record>, SourceError> {
        if id.is_empty() {
            return Ok(None);
        }
        let filter = format!("(uid={})", escape_filter_value(id));
        let entries = self
            .session
            .search(&self.session.config().base_dn, &filter, USER_ATTRS)
            .await?;
        Ok(entries.into_iter().next().map(entry_to_record))
    }

    async fn list_users(&self, _cancel: CancellationToken) -> Result<UserListing, SourceError> {
        let base = self.session.config().users_dn();
        let entries = self.session.search(base, USER_FILTER, USER_ATTRS).await?;
        debug!(count = entries.len(), base = %base, "ldap enumeration complete");
        Ok(UserListing::Batch(
            entries.into_iter().map(entry_to_record).collect(),
        ))
    }

    async fn close(&self) -> Result<(), SourceError> {
        self.session.close().await
    }
}

pub(crate) fn entry_to_record(entry: SearchEntry) -> Record {
    let pii = PersonalInfo {
        username: first_value(&entry, "uid"),
        email: first_value(&entry, "mail"),
        display_name: first_value(&entry, "cn"),
        first_name: first_value(&entry, "givenName"),
        last_name: first_value(&entry, "sn"),
        phone: first_value(&entry, "telephoneNumber"),
        department: first_value(&entry, "departmentNumber"),
        title: first_value(&entry, "title"),
        manager_id: first_rdn_value(&first_value(&entry, "manager"), "uid"),
        employee_id: first_value(&entry, "employeeNumber"),
        location: first_value(&entry, "l"),
        attributes: Vec::new(),
        source_id: entry.dn,
    };
    Record::from_source(UserStatus::Active, SourceKind::Ldap, pii)
}
