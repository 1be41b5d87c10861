//! LDAP query error types.
//!
//! ## Security Note
//!
//! Error messages must not leak sensitive information like
//! passwords or bind credentials. Search failures carry the DN and filter
//! so they can be diagnosed without re-running the query.

use thiserror::Error;

use crate::handle::HandleId;

/// Errors raised while configuring sessions and executing queries.
#[derive(Debug, Error)]
pub enum LdapError {
    /// Invalid configuration.
    #[error("LDAP configuration error: {0}")]
    Configuration(String),

    /// Connection URL must use LDAPS.
    #[error("Security error: Only LDAPS is supported. URL must start with 'ldaps://'. STARTTLS and plain LDAP are not allowed.")]
    InsecureProtocol,

    /// Connection failed.
    #[error("LDAP connection failed: {0}")]
    Connection(String),

    /// Bind (authentication) failed.
    #[error("LDAP bind failed: {0}")]
    Bind(String),

    /// A query was executed on a session that is not bound.
    #[error("Query execution is not possible without being bound")]
    NotBound,

    /// Scope name outside of base, one and sub.
    #[error("Unsupported search scope: {0:?}")]
    UnsupportedScope(String),

    /// The search primitive failed for one round.
    #[error(
        "Could not complete search with dn {dn:?}, filter {filter:?} and attributes [{}]{}",
        .attributes.join(", "),
        protocol_detail(.code, .message)
    )]
    SearchFailed {
        /// Target DN of the query.
        dn: String,
        /// Filter expression of the query.
        filter: String,
        /// Requested attributes.
        attributes: Vec<String>,
        /// LDAP result code, when the server answered.
        code: Option<u32>,
        /// Diagnostic message from the server or transport.
        message: Option<String>,
    },

    /// Releasing a search handle failed at teardown.
    #[error("Failed to release search handle {handle}: {message}")]
    ResourceReleaseFailed {
        /// Handle that could not be released.
        handle: HandleId,
        /// Reason reported by the session.
        message: String,
    },

    /// Updating the session's paged-results control failed.
    #[error("Failed to update paged-results control: {0}")]
    PaginationControl(String),

    /// Underlying ldap3 error.
    #[error("LDAP error: {0}")]
    Ldap3(#[from] ldap3::LdapError),
}

fn protocol_detail(code: &Option<u32>, message: &Option<String>) -> String {
    match (code, message.as_deref()) {
        (Some(code), Some(message)) => format!(": [{code}] {message}"),
        (Some(code), None) => format!(": [{code}]"),
        (None, Some(message)) => format!(": {message}"),
        (None, None) => String::new(),
    }
}

impl LdapError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates a connection error.
    #[must_use]
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Checks if this is a connection-related error.
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Ldap3(_))
    }

    /// Checks if this is a security-related error.
    #[must_use]
    pub const fn is_security_error(&self) -> bool {
        matches!(self, Self::InsecureProtocol | Self::Bind(_) | Self::NotBound)
    }

    /// Checks if this error was raised by a search round.
    #[must_use]
    pub const fn is_search_error(&self) -> bool {
        matches!(self, Self::SearchFailed { .. } | Self::UnsupportedScope(_))
    }

    /// Returns the LDAP result code carried by a search failure.
    #[must_use]
    pub const fn result_code(&self) -> Option<u32> {
        match self {
            Self::SearchFailed { code, .. } => *code,
            _ => None,
        }
    }
}

/// Result type for LDAP operations.
pub type LdapResult<T> = Result<T, LdapError>;
