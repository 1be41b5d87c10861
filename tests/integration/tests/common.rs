//! Common test utilities and fixtures.

use dirquery_ldap::memory::{MemoryDirectory, RecordedSearch};
use dirquery_ldap::{QueryOptions, SearchScope, Session};

/// Filter matching every generated person.
pub const PEOPLE_FILTER: &str = "(uid=*)";

/// Initializes tracing for tests.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("dirquery_ldap=debug")
        .with_test_writer()
        .try_init();
}

/// Creates a bound directory holding `people` person entries.
pub fn directory(people: usize) -> MemoryDirectory {
    init_tracing();
    MemoryDirectory::with_people(people).bound()
}

/// Subtree options with the given paging parameters.
pub fn paged(page_size: u32, max_items: u32) -> QueryOptions {
    QueryOptions::new()
        .scope(SearchScope::Subtree)
        .page_size(page_size)
        .max_items(max_items)
}

/// Runs a query to completion and returns the DNs it produced.
pub async fn run(
    directory: &mut MemoryDirectory,
    options: QueryOptions,
) -> anyhow::Result<Vec<String>> {
    let mut query = directory.query(MemoryDirectory::PEOPLE_DN, PEOPLE_FILTER, options);
    let dns = query
        .execute()
        .await?
        .dns()
        .into_iter()
        .map(str::to_string)
        .collect();
    query.close()?;
    Ok(dns)
}

/// Returns true if the session currently carries a paged-results control.
pub fn carries_paged_control(directory: &MemoryDirectory) -> bool {
    dirquery_ldap::pagination::has_paged_control(directory)
}

/// Returns the recorded size limits in call order.
pub fn size_limits(calls: &[RecordedSearch]) -> Vec<i32> {
    calls.iter().map(|call| call.size_limit).collect()
}
