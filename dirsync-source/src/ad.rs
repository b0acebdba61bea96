//! Active Directory adapter.
//!
//! Enumeration is stream-shaped: a paged search whose entries are pushed to
//! the consumer as each page arrives, so memory use is bounded by the page
//! size rather than the directory size.

use async_trait::async_trait;
use ldap3::adapters::{Adapter, EntriesOnly, PagedResults};
use ldap3::{Scope, SearchEntry, SearchStream};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use dirsync_core::config::SourceConfig;
use dirsync_core::{
    record_channel, Attribute, Delivery, PersonalInfo, Record, RecordSender, SourceKind,
    UserStatus,
};

use crate::dn::{escape_filter_value, first_rdn_value};
use crate::error::SourceError;
use crate::session::{first_value, Session};
use crate::traits::{DirectorySource, UserListing};

const USER_FILTER: &str = "(&(objectCategory=person)(objectClass=user))";
const PAGE_SIZE: i32 = 500;
/// userAccountControl ACCOUNTDISABLE flag.
const ACCOUNT_DISABLE: u32 = 0x2;

const USER_ATTRS: &[&str] = &[
    "sAMAccountName",
    "mail",
    "displayName",
    "cn",
    "givenName",
    "sn",
    "telephoneNumber",
    "department",
    "title",
    "manager",
    "employeeID",
    "physicalDeliveryOfficeName",
    "userPrincipalName",
    "userAccountControl",
];

type UserSearch = SearchStream<'static, &'static str, Vec<&'static str>>;

pub struct ActiveDirectorySource {
    session: Session,
}

impl ActiveDirectorySource {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            session: Session::new(config),
        }
    }
}

#[async_trait]
impl DirectorySource for ActiveDirectorySource {
    fn kind(&self) -> SourceKind {
        SourceKind::ActiveDirectory
    }

    async fn get_user(&self, id: &str) -> Result<Option<Record>, SourceError> {
        if id.is_empty() {
            return Ok(None);
        }
        let filter = format!(
            "(&(objectCategory=person)(objectClass=user)(sAMAccountName={}))",
            escape_filter_value(id)
        );
        let entries = self
            .session
            .search(&self.session.config().base_dn, &filter, USER_ATTRS)
            .await?;
        Ok(entries.into_iter().next().map(entry_to_record))
    }

    async fn list_users(&self, cancel: CancellationToken) -> Result<UserListing, SourceError> {
        let mut ldap = self.session.handle().await?;
        let base = self.session.config().users_dn().to_string();
        let adapters: Vec<Box<dyn Adapter<'static, &'static str, Vec<&'static str>>>> = vec![
            Box::new(EntriesOnly::new()),
            Box::new(PagedResults::new(PAGE_SIZE)),
        ];
        let search = ldap
            .streaming_search_with(
                adapters,
                &base,
                Scope::Subtree,
                USER_FILTER,
                USER_ATTRS.to_vec(),
            )
            .await
            .map_err(|source| SourceError::Search {
                base: base.clone(),
                source,
            })?;

        let (tx, rx) = record_channel();
        tokio::spawn(pump(search, tx, cancel, base));
        Ok(UserListing::Stream(rx))
    }

    async fn close(&self) -> Result<(), SourceError> {
        self.session.close().await
    }
}

/// Forward search entries to the consumer until the search, the consumer,
/// or the token ends it. Dropping `search` stops paging.
async fn pump(
    mut search: UserSearch,
    tx: RecordSender<SourceError>,
    cancel: CancellationToken,
    base: String,
) {
    let mut sent = 0usize;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tx.fail(SourceError::Cancelled);
                return;
            }
            next = search.next() => next,
        };
        let entry = match next {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(source) => {
                tx.fail(SourceError::Search { base, source });
                return;
            }
        };
        match tx.send(entry_to_record(SearchEntry::construct(entry)), &cancel).await {
            Delivery::Delivered => sent += 1,
            Delivery::Closed => {
                debug!(sent, "consumer dropped AD enumeration");
                return;
            }
            Delivery::Cancelled => {
                tx.fail(SourceError::Cancelled);
                return;
            }
        }
    }

    if let Err(source) = search.finish().await.success() {
        tx.fail(SourceError::Search { base, source });
        return;
    }
    debug!(sent, base = %base, "AD enumeration complete");
}

fn status_from_uac(raw: &str) -> UserStatus {
    match raw.trim().parse::<u32>() {
        Ok(uac) if uac & ACCOUNT_DISABLE != 0 => UserStatus::Disabled,
        _ => UserStatus::Active,
    }
}

pub(crate) fn entry_to_record(entry: SearchEntry) -> Record {
    let display_name = match first_value(&entry, "displayName") {
        name if name.is_empty() => first_value(&entry, "cn"),
        name => name,
    };
    let status = status_from_uac(&first_value(&entry, "userAccountControl"));
    let upn = first_value(&entry, "userPrincipalName");
    let attributes = if upn.is_empty() {
        Vec::new()
    } else {
        vec![Attribute::new("userPrincipalName", upn)]
    };

    let pii = PersonalInfo {
        username: first_value(&entry, "sAMAccountName"),
        email: first_value(&entry, "mail"),
        display_name,
        first_name: first_value(&entry, "givenName"),
        last_name: first_value(&entry, "sn"),
        phone: first_value(&entry, "telephoneNumber"),
        department: first_value(&entry, "department"),
        title: first_value(&entry, "title"),
        manager_id: first_rdn_value(&first_value(&entry, "manager"), "cn"),
        employee_id: first_value(&entry, "employeeID"),
        location: first_value(&entry, "physicalDeliveryOfficeName"),
        attributes,
        source_id: entry.dn,
    };
    Record::from_source(status, SourceKind::ActiveDirectory, pii)
}
