//! Query execution.
//!
//! A [`Query`] runs its search rounds once and keeps the resulting pages
//! until it is closed or dropped, at which point every page is released
//! back to the session.

use crate::config::QueryOptions;
use crate::error::{LdapError, LdapResult};
use crate::handle::{HandleRegistry, SearchHandle};
use crate::pagination::run_rounds;
use crate::result_set::ResultSet;
use crate::search::SearchTarget;
use crate::session::Session;

/// A search against one session.
///
/// The query borrows the session mutably for its whole lifetime, so no
/// other query can interleave rounds or paged-results state on it.
pub struct Query<'s, S: Session + ?Sized> {
    session: &'s mut S,
    dn: String,
    filter: String,
    options: QueryOptions,
    registry: HandleRegistry,
    executed: bool,
}

impl<'s, S: Session + ?Sized> Query<'s, S> {
    /// Creates a query; nothing is sent until [`Query::execute`].
    pub fn new(
        session: &'s mut S,
        dn: impl Into<String>,
        filter: impl Into<String>,
        options: QueryOptions,
    ) -> Self {
        Self {
            session,
            dn: dn.into(),
            filter: filter.into(),
            options,
            registry: HandleRegistry::new(),
            executed: false,
        }
    }

    /// Returns the base DN.
    #[must_use]
    pub fn dn(&self) -> &str {
        &self.dn
    }

    /// Returns the filter expression.
    #[must_use]
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Returns the query options.
    #[must_use]
    pub const fn options(&self) -> &QueryOptions {
        &self.options
    }

    /// Returns true once the query has executed successfully.
    #[must_use]
    pub const fn is_executed(&self) -> bool {
        self.executed
    }

    /// Executes the query and returns a view over its entries.
    ///
    /// The first successful call runs every search round; later calls return
    /// a fresh view over the same pages without contacting the server. A
    /// failed run releases the pages it collected and returns no partial
    /// result.
    ///
    /// ## Errors
    ///
    /// - [`LdapError::NotBound`] if the session has not authenticated
    /// - [`LdapError::SearchFailed`] if any round fails
    pub async fn execute(&mut self) -> LdapResult<ResultSet<'_>> {
        if self.executed {
            return Ok(ResultSet::new(&self.registry));
        }

        if !self.session.is_bound() {
            return Err(LdapError::NotBound);
        }

        let target = SearchTarget {
            dn: &self.dn,
            filter: &self.filter,
            options: &self.options,
        };

        match run_rounds(&mut *self.session, &target, &mut self.registry).await {
            Ok(rounds) => {
                self.executed = true;
                let results = ResultSet::new(&self.registry);
                tracing::info!(
                    dn = %self.dn,
                    rounds,
                    entries = results.len(),
                    "Query executed"
                );
                Ok(results)
            }
            Err(e) => {
                if let Err(release) = self.registry.release_all(&mut *self.session) {
                    tracing::error!(error = %release, "Failed to release pages of a failed query");
                }
                Err(e)
            }
        }
    }

    /// Returns the view over the entries if the query has executed.
    #[must_use]
    pub fn results(&self) -> Option<ResultSet<'_>> {
        self.executed.then(|| ResultSet::new(&self.registry))
    }

    /// Returns the page produced by round `index`.
    #[must_use]
    pub fn handle(&self, index: usize) -> Option<&SearchHandle> {
        self.registry.get(index)
    }

    /// Iterates over all pages in round order.
    pub fn handles(&self) -> impl Iterator<Item = &SearchHandle> + '_ {
        self.registry.iter()
    }

    /// Releases every page back to the session.
    ///
    /// ## Errors
    ///
    /// Returns [`LdapError::ResourceReleaseFailed`] for the first page the
    /// session refused to release; the remaining pages are still released.
    pub fn close(mut self) -> LdapResult<()> {
        self.registry.release_all(&mut *self.session)
    }
}

impl<S: Session + ?Sized> Drop for Query<'_, S> {
    fn drop(&mut self) {
        if self.registry.is_empty() {
            return;
        }
        if let Err(e) = self.registry.release_all(&mut *self.session) {
            tracing::error!(dn = %self.dn, error = %e, "Search handles leaked on query drop");
        }
    }
}

impl<S: Session + ?Sized> std::fmt::Debug for Query<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("dn", &self.dn)
            .field("filter", &self.filter)
            .field("options", &self.options)
            .field("pages", &self.registry.len())
            .field("executed", &self.executed)
            .finish()
    }
}
