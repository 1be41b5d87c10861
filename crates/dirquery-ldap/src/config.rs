//! Session and query configuration.
//!
//! ## Security Requirements
//!
//! **CRITICAL**: Only LDAPS (LDAP over TLS) is supported.
//!
//! - Connection URLs MUST start with `ldaps://`
//! - STARTTLS is NOT supported (vulnerable to downgrade attacks)
//! - Plain `ldap://` is NOT supported (credentials transmitted in cleartext)

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LdapError, LdapResult};

// ============================================================================
// Search Scope
// ============================================================================

/// LDAP search scope.
///
/// Configuration documents go through [`FromStr`], so they accept the same
/// names as `str::parse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SearchScope {
    /// Read exactly the named entry.
    Base,
    /// List the immediate children of the named entry.
    OneLevel,
    /// Search the entire subtree.
    #[default]
    Subtree,
}

impl SearchScope {
    /// Converts to ldap3 scope.
    #[must_use]
    pub const fn to_ldap3(self) -> ldap3::Scope {
        match self {
            Self::Base => ldap3::Scope::Base,
            Self::OneLevel => ldap3::Scope::OneLevel,
            Self::Subtree => ldap3::Scope::Subtree,
        }
    }

    /// Returns the short scope name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::OneLevel => "one",
            Self::Subtree => "sub",
        }
    }
}

impl fmt::Display for SearchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchScope {
    type Err = LdapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "base" => Ok(Self::Base),
            "one" | "onelevel" => Ok(Self::OneLevel),
            "sub" | "subtree" => Ok(Self::Subtree),
            _ => Err(LdapError::UnsupportedScope(s.to_string())),
        }
    }
}

impl TryFrom<String> for SearchScope {
    type Error = LdapError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SearchScope> for String {
    fn from(scope: SearchScope) -> Self {
        scope.as_str().to_string()
    }
}

// ============================================================================
// Alias Dereferencing
// ============================================================================

/// Alias dereference policy for searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DerefPolicy {
    /// Never dereference aliases.
    Never,
    /// Dereference while searching below the base.
    Searching,
    /// Dereference when locating the base.
    Finding,
    /// Always dereference.
    Always,
}

impl DerefPolicy {
    /// Converts to ldap3 deref policy.
    #[must_use]
    pub const fn to_ldap3(self) -> ldap3::DerefAliases {
        match self {
            Self::Never => ldap3::DerefAliases::Never,
            Self::Searching => ldap3::DerefAliases::Searching,
            Self::Finding => ldap3::DerefAliases::Finding,
            Self::Always => ldap3::DerefAliases::Always,
        }
    }

    /// Returns the policy name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Never => "never",
            Self::Searching => "searching",
            Self::Finding => "finding",
            Self::Always => "always",
        }
    }
}

impl FromStr for DerefPolicy {
    type Err = LdapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "never" => Ok(Self::Never),
            "searching" => Ok(Self::Searching),
            "finding" => Ok(Self::Finding),
            "always" => Ok(Self::Always),
            _ => Err(LdapError::config(format!("unknown deref policy: {s}"))),
        }
    }
}

impl TryFrom<String> for DerefPolicy {
    type Error = LdapError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DerefPolicy> for String {
    fn from(policy: DerefPolicy) -> Self {
        policy.as_str().to_string()
    }
}

// ============================================================================
// Query Options
// ============================================================================

/// Options of a single query.
///
/// `page_size` and `max_items` use 0 for "disabled" and "unbounded".
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    /// Search scope.
    pub scope: SearchScope,

    /// Attributes to return; empty returns all user attributes.
    pub attributes: Vec<String>,

    /// Return attribute names without values.
    pub attrs_only: bool,

    /// Requested page size; 0 disables paging.
    pub page_size: u32,

    /// Cap on the total number of entries; 0 is unbounded.
    pub max_items: u32,

    /// Per-round time limit; `None` is no limit.
    ///
    /// Written as `timeout_ms` in configuration documents, where 0 is no
    /// limit.
    #[serde(
        rename = "timeout_ms",
        with = "millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,

    /// Alias dereference policy; `None` leaves the library default.
    pub deref: Option<DerefPolicy>,
}

impl QueryOptions {
    /// Creates options with all defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the search scope.
    #[must_use]
    pub const fn scope(mut self, scope: SearchScope) -> Self {
        self.scope = scope;
        self
    }

    /// Sets the returned attributes.
    #[must_use]
    pub fn attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    /// Requests attribute names only.
    #[must_use]
    pub const fn attrs_only(mut self, attrs_only: bool) -> Self {
        self.attrs_only = attrs_only;
        self
    }

    /// Sets the page size.
    #[must_use]
    pub const fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Sets the maximum number of entries.
    #[must_use]
    pub const fn max_items(mut self, max_items: u32) -> Self {
        self.max_items = max_items;
        self
    }

    /// Sets the per-round timeout; a zero duration removes the limit.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = if timeout.is_zero() { None } else { Some(timeout) };
        self
    }

    /// Sets the alias dereference policy.
    #[must_use]
    pub const fn deref(mut self, deref: DerefPolicy) -> Self {
        self.deref = Some(deref);
        self
    }

    /// Returns the per-round timeout, `None` when unlimited.
    #[must_use]
    pub const fn round_timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Serde adapter storing an optional duration as whole milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    // Rounds up so that a sub-millisecond limit never reads back as "none".
    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(duration) => {
                let ms = duration.as_nanos().div_ceil(1_000_000);
                serializer.serialize_u64(u64::try_from(ms).unwrap_or(u64::MAX))
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok((ms > 0).then(|| Duration::from_millis(ms)))
    }
}

// ============================================================================
// LDAP Configuration
// ============================================================================

/// Directory session configuration.
///
/// ## Security Requirements
///
/// The `connection_url` MUST use the `ldaps://` scheme.
/// Any attempt to use `ldap://` or STARTTLS will be rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LdapConfig {
    /// LDAP server URL (MUST be ldaps://).
    pub connection_url: String,

    /// Bind DN for service account.
    pub bind_dn: String,

    /// Bind credential (password).
    #[serde(skip_serializing, default)]
    pub bind_credential: String,

    /// Whether to validate server certificates.
    /// Should always be true in production.
    #[serde(default = "default_true")]
    pub validate_certificates: bool,

    /// Connection timeout.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: Duration,

    /// Default options applied to queries built from this configuration.
    #[serde(default)]
    pub query: QueryOptions,
}

const fn default_true() -> bool {
    true
}

const fn default_connection_timeout() -> Duration {
    Duration::from_secs(5)
}

impl LdapConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> LdapConfigBuilder {
        LdapConfigBuilder::new()
    }

    /// Loads configuration from environment variables.
    ///
    /// A `.env` file in the working directory is read first when present.
    pub fn from_env() -> LdapResult<Self> {
        let _ = dotenvy::dotenv();

        let url = std::env::var("DIRQUERY_URL")
            .map_err(|_| LdapError::config("DIRQUERY_URL environment variable is required"))?;
        let bind_dn = std::env::var("DIRQUERY_BIND_DN")
            .map_err(|_| LdapError::config("DIRQUERY_BIND_DN environment variable is required"))?;
        let bind_credential = std::env::var("DIRQUERY_BIND_PASSWORD").unwrap_or_default();

        let mut query = QueryOptions::new();
        if let Ok(scope) = std::env::var("DIRQUERY_SCOPE") {
            query.scope = scope.parse()?;
        }
        query.page_size = env_number("DIRQUERY_PAGE_SIZE")?.unwrap_or(0);
        query.max_items = env_number("DIRQUERY_MAX_ITEMS")?.unwrap_or(0);
        if let Some(secs) = env_number("DIRQUERY_TIMEOUT")? {
            query = query.timeout(Duration::from_secs(secs));
        }
        if let Some(ms) = env_number("DIRQUERY_TIMEOUT_MS")? {
            query = query.timeout(Duration::from_millis(ms));
        }

        let mut builder = Self::builder()
            .connection_url(url)
            .bind_dn(bind_dn)
            .bind_credential(bind_credential)
            .query_options(query);
        if let Some(secs) = env_number("DIRQUERY_CONNECT_TIMEOUT")? {
            builder = builder.connection_timeout(Duration::from_secs(secs));
        }

        builder.build()
    }

    /// Parses and validates a TOML configuration document.
    ///
    /// ## Errors
    ///
    /// An unknown `query.scope` is reported as
    /// [`LdapError::UnsupportedScope`]; other malformed documents as
    /// [`LdapError::Configuration`].
    pub fn from_toml_str(content: &str) -> LdapResult<Self> {
        let document: toml::Table = content
            .parse()
            .map_err(|e| LdapError::config(format!("failed to parse config: {e}")))?;

        if let Some(scope) = document
            .get("query")
            .and_then(|query| query.get("scope"))
            .and_then(toml::Value::as_str)
        {
            scope.parse::<SearchScope>()?;
        }

        let config: Self = toml::Value::Table(document)
            .try_into()
            .map_err(|e| LdapError::config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> LdapResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            LdapError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Validates the configuration.
    ///
    /// ## Security
    ///
    /// This method enforces LDAPS-only connections.
    pub fn validate(&self) -> LdapResult<()> {
        validate_ldaps_url(&self.connection_url)?;

        if self.bind_dn.is_empty() {
            return Err(LdapError::config("bind_dn cannot be empty"));
        }

        if i32::try_from(self.query.page_size).is_err() {
            return Err(LdapError::config("page_size exceeds the protocol maximum"));
        }

        Ok(())
    }
}

/// Validates that a URL uses LDAPS.
///
/// ## Security
///
/// **CRITICAL**: Only `ldaps://` URLs are accepted.
/// - `ldap://` is rejected (cleartext credentials)
/// - STARTTLS is not supported (vulnerable to downgrade attacks)
fn validate_ldaps_url(url: &str) -> LdapResult<()> {
    let url_lower = url.to_lowercase();

    if !url_lower.starts_with("ldaps://") {
        return Err(LdapError::InsecureProtocol);
    }

    // "ldaps://" is 8 chars
    if url.len() <= 8 {
        return Err(LdapError::config("Invalid LDAPS URL: missing host"));
    }

    Ok(())
}

fn env_number<T: FromStr>(key: &str) -> LdapResult<Option<T>> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| LdapError::config(format!("{key} must be a non-negative integer"))),
        Err(_) => Ok(None),
    }
}

// ============================================================================
// Configuration Builder
// ============================================================================

/// Builder for LDAP configuration.
#[derive(Debug, Default)]
pub struct LdapConfigBuilder {
    connection_url: Option<String>,
    bind_dn: Option<String>,
    bind_credential: Option<String>,
    validate_certificates: bool,
    connection_timeout: Duration,
    query: QueryOptions,
}

impl LdapConfigBuilder {
    /// Creates a new builder with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            validate_certificates: true,
            connection_timeout: default_connection_timeout(),
            ..Default::default()
        }
    }

    /// Sets the connection URL (must be ldaps://).
    #[must_use]
    pub fn connection_url(mut self, url: impl Into<String>) -> Self {
        self.connection_url = Some(url.into());
        self
    }

    /// Sets the bind DN.
    #[must_use]
    pub fn bind_dn(mut self, dn: impl Into<String>) -> Self {
        self.bind_dn = Some(dn.into());
        self
    }

    /// Sets the bind credential (password).
    #[must_use]
    pub fn bind_credential(mut self, credential: impl Into<String>) -> Self {
        self.bind_credential = Some(credential.into());
        self
    }

    /// Sets whether to validate certificates.
    #[must_use]
    pub const fn validate_certificates(mut self, validate: bool) -> Self {
        self.validate_certificates = validate;
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub const fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Sets the default query options.
    #[must_use]
    pub fn query_options(mut self, options: QueryOptions) -> Self {
        self.query = options;
        self
    }

    /// Builds and validates the configuration.
    ///
    /// ## Errors
    ///
    /// Returns an error if:
    /// - Required fields are missing
    /// - Connection URL does not use LDAPS
    pub fn build(self) -> LdapResult<LdapConfig> {
        let config = LdapConfig {
            connection_url: self
                .connection_url
                .ok_or_else(|| LdapError::config("connection_url is required"))?,
            bind_dn: self
                .bind_dn
                .ok_or_else(|| LdapError::config("bind_dn is required"))?,
            bind_credential: self.bind_credential.unwrap_or_default(),
            validate_certificates: self.validate_certificates,
            connection_timeout: self.connection_timeout,
            query: self.query,
        };

        config.validate()?;

        Ok(config)
    }
}
