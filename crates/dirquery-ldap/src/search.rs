//! LDAP search operations.
//!
//! Issues one search primitive per round and maps protocol failures to
//! [`LdapError::SearchFailed`].

use std::collections::HashMap;

use ldap3::SearchEntry;

use crate::config::QueryOptions;
use crate::error::{LdapError, LdapResult};
use crate::handle::SearchHandle;
use crate::session::{SearchRequest, Session};

/// Represents an LDAP entry with parsed attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapEntry {
    /// Distinguished Name.
    pub dn: String,

    /// Attributes (all values are multi-valued).
    pub attributes: HashMap<String, Vec<String>>,

    /// Binary attributes.
    pub binary_attributes: HashMap<String, Vec<Vec<u8>>>,
}

impl LdapEntry {
    /// Creates a new LDAP entry from search result.
    #[must_use]
    pub fn from_search_entry(entry: SearchEntry) -> Self {
        Self {
            dn: entry.dn,
            attributes: entry.attrs,
            binary_attributes: entry.bin_attrs,
        }
    }

    /// Gets a single-valued attribute.
    #[must_use]
    pub fn get_attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    /// Gets a multi-valued attribute.
    #[must_use]
    pub fn get_attrs(&self, name: &str) -> Option<&Vec<String>> {
        self.attributes.get(name)
    }

    /// Gets a binary attribute.
    #[must_use]
    pub fn get_binary_attr(&self, name: &str) -> Option<&Vec<u8>> {
        self.binary_attributes.get(name).and_then(|v| v.first())
    }

    /// Checks if the entry has an attribute.
    #[must_use]
    pub fn has_attr(&self, name: &str) -> bool {
        self.attributes.contains_key(name) || self.binary_attributes.contains_key(name)
    }
}

impl From<&SearchEntry> for LdapEntry {
    fn from(entry: &SearchEntry) -> Self {
        Self::from_search_entry(entry.clone())
    }
}

/// What a query searches for: base DN, filter and options.
#[derive(Debug, Clone, Copy)]
pub struct SearchTarget<'a> {
    /// Base DN.
    pub dn: &'a str,
    /// Filter expression.
    pub filter: &'a str,
    /// Query options.
    pub options: &'a QueryOptions,
}

impl SearchTarget<'_> {
    fn failure(&self, code: Option<u32>, message: Option<String>) -> LdapError {
        LdapError::SearchFailed {
            dn: self.dn.to_string(),
            filter: self.filter.to_string(),
            attributes: self.options.attributes.clone(),
            code,
            message,
        }
    }
}

/// Runs one search round against `session`.
///
/// The scope selects the primitive: a base read, a one-level listing or a
/// subtree search. `size_limit` of 0 leaves the round uncapped; otherwise
/// the returned page never holds more than `size_limit` entries.
pub async fn search_round<S>(
    session: &mut S,
    target: &SearchTarget<'_>,
    size_limit: i32,
) -> LdapResult<SearchHandle>
where
    S: Session + ?Sized,
{
    let request = SearchRequest {
        scope: target.options.scope,
        base: target.dn,
        filter: target.filter,
        attributes: &target.options.attributes,
        attrs_only: target.options.attrs_only,
        size_limit,
        timeout: target.options.round_timeout(),
        deref: target.options.deref,
    };

    let mut handle = session
        .search(&request)
        .await
        .map_err(|e| target.failure(e.code, Some(e.message)))?;

    if let Ok(cap) = usize::try_from(size_limit) {
        if cap > 0 && handle.len() > cap {
            tracing::debug!(
                returned = handle.len(),
                cap,
                "Server exceeded round size limit, truncating page"
            );
            handle.truncate(cap);
        }
    }

    Ok(handle)
}
