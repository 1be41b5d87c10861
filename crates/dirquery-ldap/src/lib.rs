//! # dirquery-ldap
//!
//! Paginated LDAP search execution using `ldap3`.
//!
//! A [`Query`] runs one or more search rounds against a bound [`Session`],
//! driving the Simple Paged Results control (RFC 2696) when a page size is
//! configured. The pages it collects are exposed as a [`ResultSet`] and are
//! released back to the session when the query is closed or dropped.
//!
//! ## Security
//!
//! Connections are LDAPS only. STARTTLS is NOT supported.
//!
//! ## Example
//!
//! ```no_run
//! use dirquery_ldap::{LdapConfig, LdapSession, QueryOptions, Session};
//!
//! # async fn run() -> dirquery_ldap::LdapResult<()> {
//! let config = LdapConfig::from_env()?;
//! let mut session = LdapSession::connect_and_bind(&config).await?;
//!
//! let options = QueryOptions::new().page_size(100).max_items(1000);
//! let mut query = session.query("ou=people,dc=example,dc=com", "(objectClass=person)", options);
//! for entry in query.execute().await? {
//!     println!("{}", entry.dn);
//! }
//! query.close()?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod config;
pub mod connection;
pub mod error;
pub mod handle;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod pagination;
pub mod query;
pub mod result_set;
pub mod search;
pub mod session;

pub use config::{DerefPolicy, LdapConfig, LdapConfigBuilder, QueryOptions, SearchScope};
pub use connection::LdapSession;
pub use error::{LdapError, LdapResult};
pub use handle::{HandleId, SearchHandle};
pub use pagination::PAGED_RESULTS_OID;
pub use query::Query;
pub use result_set::{Entries, ResultSet};
pub use search::LdapEntry;
pub use session::{Credentials, ProtocolError, SearchRequest, Session};
