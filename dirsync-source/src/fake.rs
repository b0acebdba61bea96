//! Scriptable in-process directory for tests.
//!
//! Enabled for this crate's tests and, through the `test-support` feature,
//! for downstream crates.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use dirsync_core::{record_channel, Delivery, PersonalInfo, Record, SourceKind, UserStatus};

use crate::error::SourceError;
use crate::traits::{DirectorySource, UserListing};

/// Which listing shape the fake hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeShape {
    Batch,
    Stream,
}

#[derive(Debug, Default)]
struct FakeState {
    users: Vec<Record>,
    fail_next_list: Option<String>,
    fail_stream_after: Option<(usize, String)>,
    list_calls: usize,
    closed: bool,
}

#[derive(Debug)]
pub struct FakeSource {
    shape: FakeShape,
    kind: SourceKind,
    state: Mutex<FakeState>,
}

/// An LDAP-style record for `name` with a couple of PII fields populated.
pub fn ldap_user(name: &str) -> Record {
    Record::from_source(
        UserStatus::Active,
        SourceKind::Ldap,
        PersonalInfo {
            source_id: format!("uid={name},ou=People,dc=example,dc=com"),
            username: name.to_string(),
            email: format!("{name}@example.com"),
            ..PersonalInfo::default()
        },
    )
}

impl FakeSource {
    pub fn batch(users: Vec<Record>) -> Self {
        Self::with_shape(FakeShape::Batch, users)
    }

    pub fn streaming(users: Vec<Record>) -> Self {
        Self::with_shape(FakeShape::Stream, users)
    }

    pub fn with_shape(shape: FakeShape, users: Vec<Record>) -> Self {
        Self {
            shape,
            kind: SourceKind::Ldap,
            state: Mutex::new(FakeState {
                users,
                ..FakeState::default()
            }),
        }
    }

    /// Replace the directory contents.
    pub fn set_users(&self, users: Vec<Record>) {
        self.state().users = users;
    }

    /// Make the next `list_users` call fail before producing anything.
    pub fn fail_next_list(&self, reason: &str) {
        self.state().fail_next_list = Some(reason.to_string());
    }

    /// Stream shape only: end every enumeration with an error after `n`
    /// records.
    pub fn fail_stream_after(&self, n: usize, reason: &str) {
        self.state().fail_stream_after = Some((n, reason.to_string()));
    }

    pub fn list_calls(&self) -> usize {
        self.state().list_calls
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl DirectorySource for FakeSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn get_user(&self, id: &str) -> Result<Option<Record>, SourceError> {
        let state = self.state();
        if state.closed {
            return Err(SourceError::Closed);
        }
        Ok(state
            .users
            .iter()
            .find(|r| r.pii.as_ref().is_some_and(|p| p.username == id))
            .cloned())
    }

    async fn list_users(&self, cancel: CancellationToken) -> Result<UserListing, SourceError> {
        let (users, fail_after) = {
            let mut state = self.state();
            if state.closed {
                return Err(SourceError::Closed);
            }
            state.list_calls += 1;
            if let Some(reason) = state.fail_next_list.take() {
                return Err(SourceError::Unavailable(reason));
            }
            (state.users.clone(), state.fail_stream_after.clone())
        };

        if self.shape == FakeShape::Batch {
            return Ok(UserListing::Batch(users));
        }

        let (tx, rx) = record_channel();
        tokio::spawn(async move {
            for (i, record) in users.into_iter().enumerate() {
                if let Some((n, reason)) = &fail_after {
                    if i == *n {
                        tx.fail(SourceError::Unavailable(reason.clone()));
                        return;
                    }
                }
                match tx.send(record, &cancel).await {
                    Delivery::Delivered => {}
                    Delivery::Closed => return,
                    Delivery::Cancelled => {
                        tx.fail(SourceError::Cancelled);
                        return;
                    }
                }
            }
            if let Some((_, reason)) = fail_after {
                tx.fail(SourceError::Unavailable(reason));
            }
        });
        Ok(UserListing::Stream(rx))
    }

    async fn close(&self) -> Result<(), SourceError> {
        let mut state = self.state();
        if state.closed {
            return Err(SourceError::Closed);
        }
        state.closed = true;
        Ok(())
    }
}
