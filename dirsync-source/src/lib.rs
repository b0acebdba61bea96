//! # dirsync-source
//!
//! Directory adapters. Both backends implement [`DirectorySource`]; the LDAP
//! adapter enumerates in one batch while the Active Directory adapter streams
//! a paged search. Callers that do not care which shape they got use
//! [`enumerate`].

pub mod ad;
pub mod dn;
pub mod error;
pub mod factory;
pub mod ldap;
mod session;
pub mod traits;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use ad::ActiveDirectorySource;
pub use error::SourceError;
pub use factory::new_source;
pub use ldap::LdapSource;
pub use traits::{enumerate, DirectorySource, UserListing};
