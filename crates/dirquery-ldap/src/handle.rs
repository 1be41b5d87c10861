//! Raw search handles and the per-query handle registry.

use std::fmt;

use ldap3::controls::{Control, ControlType, PagedResults};
use ldap3::SearchEntry;

use crate::error::{LdapError, LdapResult};
use crate::session::Session;

/// Session-issued identifier of a search handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One page of search results returned by a single search call.
///
/// A handle must go back to the session that issued it through
/// [`Session::release`] exactly once.
#[derive(Debug)]
pub struct SearchHandle {
    id: HandleId,
    entries: Vec<SearchEntry>,
    controls: Vec<Control>,
    result_code: u32,
}

impl SearchHandle {
    /// Creates a handle for a completed search response.
    #[must_use]
    pub const fn new(
        id: HandleId,
        entries: Vec<SearchEntry>,
        controls: Vec<Control>,
        result_code: u32,
    ) -> Self {
        Self {
            id,
            entries,
            controls,
            result_code,
        }
    }

    /// Returns the handle id.
    #[must_use]
    pub const fn id(&self) -> HandleId {
        self.id
    }

    /// Returns the entries of this page.
    #[must_use]
    pub fn entries(&self) -> &[SearchEntry] {
        &self.entries
    }

    /// Returns the number of entries in this page.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the page holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the response controls.
    #[must_use]
    pub fn controls(&self) -> &[Control] {
        &self.controls
    }

    /// Returns the LDAP result code of the response.
    #[must_use]
    pub const fn result_code(&self) -> u32 {
        self.result_code
    }

    /// Returns the continuation cookie of a paged response.
    ///
    /// `None` when the response carries no paged-results control.
    #[must_use]
    pub fn paged_cookie(&self) -> Option<Vec<u8>> {
        self.controls.iter().find_map(|Control(ctype, raw)| match ctype {
            Some(ControlType::PagedResults) => Some(raw.parse::<PagedResults>().cookie),
            _ => None,
        })
    }

    /// Drops entries beyond `cap`.
    pub(crate) fn truncate(&mut self, cap: usize) {
        self.entries.truncate(cap);
    }
}

/// Ordered collection of the handles produced by one query.
///
/// Slots are emptied as handles are released, so a handle is never handed
/// back to the session twice.
#[derive(Debug, Default)]
pub struct HandleRegistry {
    slots: Vec<Option<SearchHandle>>,
}

impl HandleRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Appends the handle of the next round.
    pub fn push(&mut self, handle: SearchHandle) {
        self.slots.push(Some(handle));
    }

    /// Returns the handle of round `index`, if still held.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&SearchHandle> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Iterates over the held handles in round order.
    pub fn iter(&self) -> impl Iterator<Item = &SearchHandle> + '_ {
        self.slots.iter().filter_map(Option::as_ref)
    }

    /// Returns the number of held handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Returns true if no handle is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Releases every held handle through `session`.
    ///
    /// All handles are attempted; the first failure is returned.
    pub fn release_all<S: Session + ?Sized>(&mut self, session: &mut S) -> LdapResult<()> {
        let mut first_failure = None;

        for slot in &mut self.slots {
            let Some(handle) = slot.take() else {
                continue;
            };
            let id = handle.id();
            if let Err(e) = session.release(handle) {
                tracing::error!(handle = %id, error = %e, "Failed to release search handle");
                first_failure.get_or_insert(LdapError::ResourceReleaseFailed {
                    handle: id,
                    message: e.message,
                });
            }
        }
        self.slots.clear();

        first_failure.map_or(Ok(()), Err)
    }
}
