//! Directory session abstraction.
//!
//! A [`Session`] is one stateful connection to a directory server. Besides
//! the bind state it carries a list of server controls that is attached to
//! every search issued on the session, which is how the paged-results
//! control travels between rounds. Only one query may own that control at
//! a time; `Query` borrows the session mutably to enforce it.

use std::time::Duration;

use async_trait::async_trait;
use ldap3::controls::RawControl;
use thiserror::Error;

use crate::config::{DerefPolicy, QueryOptions, SearchScope};
use crate::error::LdapResult;
use crate::handle::SearchHandle;
use crate::query::Query;

/// Simple bind credentials.
#[derive(Clone)]
pub struct Credentials {
    /// Bind DN.
    pub dn: String,
    /// Bind password.
    pub password: String,
}

impl Credentials {
    /// Creates simple bind credentials.
    #[must_use]
    pub fn new(dn: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("dn", &self.dn)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Failure reported by a session primitive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ProtocolError {
    /// LDAP result code; `None` when no response was received.
    pub code: Option<u32>,
    /// Diagnostic message.
    pub message: String,
}

impl ProtocolError {
    /// Creates an error for an LDAP result code.
    #[must_use]
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    /// Creates an error that has no result code.
    #[must_use]
    pub fn local(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }
}

impl From<ldap3::LdapError> for ProtocolError {
    fn from(err: ldap3::LdapError) -> Self {
        match err {
            ldap3::LdapError::LdapResult { result } => Self::new(result.rc, result.text),
            other => Self::local(other.to_string()),
        }
    }
}

/// One round of a search, as handed to [`Session::search`].
#[derive(Debug, Clone, Copy)]
pub struct SearchRequest<'a> {
    /// Search scope.
    pub scope: SearchScope,
    /// Base DN.
    pub base: &'a str,
    /// Filter expression.
    pub filter: &'a str,
    /// Requested attributes; empty means all.
    pub attributes: &'a [String],
    /// Return attribute names only.
    pub attrs_only: bool,
    /// Entry cap for this round; 0 means no explicit cap.
    pub size_limit: i32,
    /// Round time limit.
    pub timeout: Option<Duration>,
    /// Alias dereference policy.
    pub deref: Option<DerefPolicy>,
}

/// A connection to a directory server.
#[async_trait]
pub trait Session: Send {
    /// Returns whether the session has authenticated.
    fn is_bound(&self) -> bool;

    /// Performs a simple bind.
    ///
    /// Returns `Ok(false)` when the server rejects the credentials.
    async fn bind(&mut self, credentials: &Credentials) -> LdapResult<bool>;

    /// Returns the server controls attached to every search on this session.
    fn server_controls(&self) -> &[RawControl];

    /// Replaces the session's server controls.
    fn set_server_controls(&mut self, controls: Vec<RawControl>) -> Result<(), ProtocolError>;

    /// Runs one search primitive with the current server controls.
    async fn search(&mut self, request: &SearchRequest<'_>) -> Result<SearchHandle, ProtocolError>;

    /// Releases a handle returned by [`Session::search`].
    fn release(&mut self, handle: SearchHandle) -> Result<(), ProtocolError>;

    /// Builds a query bound to this session.
    fn query(
        &mut self,
        dn: impl Into<String>,
        filter: impl Into<String>,
        options: QueryOptions,
    ) -> Query<'_, Self>
    where
        Self: Sized,
    {
        Query::new(self, dn, filter, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_debug_redacts_password() {
        let creds = Credentials::new("cn=admin,dc=example,dc=com", "hunter2");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("cn=admin"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn protocol_error_from_transport_failure() {
        let err = ProtocolError::from(ldap3::LdapError::EndOfStream);
        assert_eq!(err.code, None);
        assert!(!err.message.is_empty());
    }
}
