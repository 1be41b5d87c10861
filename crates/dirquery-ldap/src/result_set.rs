//! Lazily materialized view over the pages of an executed query.

use std::iter::FusedIterator;
use std::slice;

use ldap3::SearchEntry;

use crate::handle::{HandleRegistry, SearchHandle};
use crate::search::LdapEntry;

/// Entries of an executed query, in round order then in-page order.
///
/// Entries are converted to [`LdapEntry`] only as they are iterated.
#[derive(Debug, Clone, Copy)]
pub struct ResultSet<'q> {
    registry: &'q HandleRegistry,
}

impl<'q> ResultSet<'q> {
    pub(crate) const fn new(registry: &'q HandleRegistry) -> Self {
        Self { registry }
    }

    /// Returns the total number of entries across all pages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.iter().map(SearchHandle::len).sum()
    }

    /// Returns true if no page holds an entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registry.iter().all(SearchHandle::is_empty)
    }

    /// Returns the number of pages (search rounds).
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.registry.len()
    }

    /// Iterates over the entries.
    #[must_use]
    pub fn iter(&self) -> Entries<'q> {
        Entries {
            pages: Box::new(self.registry.iter()),
            current: [].iter(),
        }
    }

    /// Collects every entry.
    #[must_use]
    pub fn entries(&self) -> Vec<LdapEntry> {
        self.iter().collect()
    }

    /// Returns the DNs of all entries in order.
    #[must_use]
    pub fn dns(&self) -> Vec<&'q str> {
        self.registry
            .iter()
            .flat_map(SearchHandle::entries)
            .map(|entry| entry.dn.as_str())
            .collect()
    }
}

impl<'q> IntoIterator for &ResultSet<'q> {
    type Item = LdapEntry;
    type IntoIter = Entries<'q>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'q> IntoIterator for ResultSet<'q> {
    type Item = LdapEntry;
    type IntoIter = Entries<'q>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the entries of a [`ResultSet`].
pub struct Entries<'q> {
    pages: Box<dyn Iterator<Item = &'q SearchHandle> + 'q>,
    current: slice::Iter<'q, SearchEntry>,
}

impl Iterator for Entries<'_> {
    type Item = LdapEntry;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.current.next() {
                return Some(LdapEntry::from(entry));
            }
            self.current = self.pages.next()?.entries().iter();
        }
    }
}

impl FusedIterator for Entries<'_> {}

impl std::fmt::Debug for Entries<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entries")
            .field("remaining_in_page", &self.current.len())
            .finish_non_exhaustive()
    }
}
