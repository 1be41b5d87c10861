//! Search handle release integration tests.

use dirquery_ldap::memory::MemoryDirectory;
use dirquery_ldap::{LdapError, Query, Session};

use crate::common::{directory, paged, PEOPLE_FILTER};

/// Tests that dropping an executed query releases every page.
#[tokio::test]
async fn test_drop_releases_every_page() -> anyhow::Result<()> {
    let mut directory = directory(12);

    {
        let mut query = directory.query(MemoryDirectory::PEOPLE_DN, PEOPLE_FILTER, paged(4, 0));
        let results = query.execute().await?;
        assert_eq!(results.page_count(), 3);
        assert_eq!(results.len(), 12);
    }

    assert_eq!(directory.outstanding_handles(), 0);
    Ok(())
}

/// Tests that a result view can be iterated repeatedly while the query lives.
#[tokio::test]
async fn test_result_view_is_repeatable() -> anyhow::Result<()> {
    let mut directory = directory(6);

    let mut query = Query::new(
        &mut directory,
        MemoryDirectory::PEOPLE_DN,
        PEOPLE_FILTER,
        paged(4, 0),
    );
    query.execute().await?;

    let results = query.results().expect("executed");
    let first: Vec<String> = results.iter().map(|entry| entry.dn).collect();
    let second: Vec<String> = results.into_iter().map(|entry| entry.dn).collect();
    assert_eq!(first, second);
    assert_eq!(query.handle(0).map(|page| page.len()), Some(4));
    assert_eq!(query.handle(1).map(|page| page.len()), Some(2));

    query.close()?;
    assert_eq!(directory.outstanding_handles(), 0);
    Ok(())
}

/// Tests that a refused release is reported by an explicit close.
#[tokio::test]
async fn test_close_reports_refused_release() -> anyhow::Result<()> {
    let mut directory = directory(6);
    directory.fail_release(true);

    let mut query = directory.query(MemoryDirectory::PEOPLE_DN, PEOPLE_FILTER, paged(2, 0));
    query.execute().await?;

    match query.close() {
        Err(LdapError::ResourceReleaseFailed { .. }) => {}
        other => panic!("expected a release failure, got {other:?}"),
    }

    Ok(())
}

/// Tests that a refused release on drop is logged rather than raised.
#[tokio::test]
async fn test_drop_tolerates_refused_release() -> anyhow::Result<()> {
    let mut directory = directory(3);
    directory.fail_release(true);

    {
        let mut query = directory.query(MemoryDirectory::PEOPLE_DN, PEOPLE_FILTER, paged(0, 0));
        query.execute().await?;
    }

    assert_eq!(directory.outstanding_handles(), 1);

    directory.fail_release(false);
    let mut query = directory.query(MemoryDirectory::PEOPLE_DN, PEOPLE_FILTER, paged(0, 0));
    assert_eq!(query.execute().await?.len(), 3);
    query.close()?;

    Ok(())
}
