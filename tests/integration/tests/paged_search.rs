//! Paged search integration tests.

use std::time::Duration;

use dirquery_ldap::memory::MemoryDirectory;
use dirquery_ldap::{DerefPolicy, LdapError, QueryOptions, SearchScope, Session};

use crate::common::{carries_paged_control, directory, paged, run, size_limits, PEOPLE_FILTER};

/// Tests that a paged query walks every page and leaves no control behind.
#[tokio::test]
async fn test_paged_query_collects_all_pages() -> anyhow::Result<()> {
    let mut directory = directory(25);

    let dns = run(&mut directory, paged(5, 0)).await?;
    assert_eq!(dns.len(), 25);
    assert_eq!(dns.first().map(String::as_str), Some("uid=user000,ou=people,dc=example,dc=com"));
    assert_eq!(dns.last().map(String::as_str), Some("uid=user024,ou=people,dc=example,dc=com"));

    let calls = directory.search_calls();
    assert_eq!(calls.len(), 5, "one round per page");
    assert!(calls.iter().all(|call| call.page_size == Some(5)));
    assert_eq!(calls[0].cookie.as_deref(), Some(&[][..]), "first round starts without cookie");
    assert!(calls[1..].iter().all(|call| call.cookie.as_ref().is_some_and(|c| !c.is_empty())));
    assert_eq!(size_limits(calls), vec![0; 5]);
    assert!(!carries_paged_control(&directory));

    Ok(())
}

/// Tests that a plain query after a paged one is not paged.
#[tokio::test]
async fn test_unpaged_query_after_paged_query() -> anyhow::Result<()> {
    let mut directory = directory(25);

    run(&mut directory, paged(5, 0)).await?;
    directory.clear_search_calls();

    let dns = run(&mut directory, QueryOptions::new()).await?;
    assert_eq!(dns.len(), 25, "full result in a single round");

    let calls = directory.search_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].page_size, None, "no paged-results control leaked");

    Ok(())
}

/// Tests that a page larger than the item cap collapses to one bounded round.
#[tokio::test]
async fn test_max_items_below_page_size() -> anyhow::Result<()> {
    let mut directory = directory(25);

    let dns = run(&mut directory, paged(10, 5)).await?;
    assert_eq!(dns.len(), 5);

    let calls = directory.search_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].page_size, None);
    assert_eq!(calls[0].size_limit, 5);

    Ok(())
}

/// Tests that the last round is capped to the remaining quota.
#[tokio::test]
async fn test_max_items_spanning_pages() -> anyhow::Result<()> {
    let mut directory = directory(25);

    let dns = run(&mut directory, paged(10, 13)).await?;
    assert_eq!(dns.len(), 13);

    let calls = directory.search_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(size_limits(calls), vec![0, 3]);
    assert!(!carries_paged_control(&directory));

    Ok(())
}

/// Tests that a bounded paged query stops after ceil(max / page) rounds.
#[tokio::test]
async fn test_round_count_follows_item_cap() -> anyhow::Result<()> {
    for (page_size, max_items, rounds) in [(5, 12, 3), (5, 10, 2), (4, 25, 7), (3, 1, 1)] {
        let mut directory = directory(40);

        let dns = run(&mut directory, paged(page_size, max_items)).await?;
        assert_eq!(dns.len(), max_items as usize, "page={page_size} max={max_items}");
        assert_eq!(
            directory.search_calls().len(),
            rounds,
            "page={page_size} max={max_items}"
        );
    }

    Ok(())
}

/// Tests that an unbounded, unpaged query runs once with no control.
#[tokio::test]
async fn test_unpaged_unbounded_query() -> anyhow::Result<()> {
    let mut directory = directory(7);

    let dns = run(&mut directory, paged(0, 0)).await?;
    assert_eq!(dns.len(), 7);

    let calls = directory.search_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].page_size, None);
    assert_eq!(calls[0].size_limit, 0);
    assert_eq!(directory.control_updates(), 0, "unpaged query never touches controls");

    Ok(())
}

/// Tests that base-scope queries never page.
#[tokio::test]
async fn test_base_scope_is_never_paged() -> anyhow::Result<()> {
    let mut directory = directory(10);
    let options = paged(2, 0).scope(SearchScope::Base);

    let mut query = directory.query(MemoryDirectory::PEOPLE_DN, "(objectClass=*)", options);
    let results = query.execute().await?;
    assert_eq!(results.dns(), vec![MemoryDirectory::PEOPLE_DN]);
    query.close()?;

    let calls = directory.search_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].scope, SearchScope::Base);
    assert_eq!(calls[0].page_size, None);
    assert_eq!(directory.control_updates(), 0);

    Ok(())
}

/// Tests that one-level scope excludes the base entry.
#[tokio::test]
async fn test_one_level_scope() -> anyhow::Result<()> {
    let mut directory = directory(4);
    let options = paged(3, 0).scope(SearchScope::OneLevel);

    let mut query = directory.query(MemoryDirectory::BASE_DN, "(objectClass=*)", options);
    let dns = query.execute().await?.dns();
    assert_eq!(dns, vec![MemoryDirectory::PEOPLE_DN]);
    query.close()?;

    Ok(())
}

/// Tests that a failure mid-loop still resets pagination.
#[tokio::test]
async fn test_failure_mid_loop_resets_pagination() -> anyhow::Result<()> {
    let mut directory = directory(20);
    directory.fail_search_call(2, 51, "Server is busy");

    let mut query = directory.query(MemoryDirectory::PEOPLE_DN, PEOPLE_FILTER, paged(5, 0));
    let err = query.execute().await.unwrap_err();
    match &err {
        LdapError::SearchFailed {
            dn,
            filter,
            code,
            message,
            ..
        } => {
            assert_eq!(dn, MemoryDirectory::PEOPLE_DN);
            assert_eq!(filter, PEOPLE_FILTER);
            assert_eq!(*code, Some(51));
            assert_eq!(message.as_deref(), Some("Server is busy"));
        }
        other => panic!("unexpected error: {other}"),
    }
    drop(query);

    assert_eq!(directory.search_calls().len(), 3);
    assert_eq!(directory.outstanding_handles(), 0, "partial pages released");
    assert!(!carries_paged_control(&directory));

    // The session stays usable.
    directory.clear_search_calls();
    let dns = run(&mut directory, QueryOptions::new()).await?;
    assert_eq!(dns.len(), 20);
    assert_eq!(directory.search_calls()[0].page_size, None);

    Ok(())
}

/// Tests that a missing base DN surfaces as a search failure.
#[tokio::test]
async fn test_missing_base_dn() -> anyhow::Result<()> {
    let mut directory = directory(3);

    let mut query = directory.query("ou=groups,dc=example,dc=com", PEOPLE_FILTER, paged(5, 0));
    let err = query.execute().await.unwrap_err();
    assert!(err.is_search_error());
    assert_eq!(err.result_code(), Some(32));
    drop(query);

    assert!(!carries_paged_control(&directory));

    Ok(())
}

/// Tests that an unbound session is refused before any protocol traffic.
#[tokio::test]
async fn test_unbound_session_makes_no_calls() -> anyhow::Result<()> {
    crate::common::init_tracing();
    let mut directory = MemoryDirectory::with_people(5);

    let mut query = directory.query(MemoryDirectory::PEOPLE_DN, PEOPLE_FILTER, paged(2, 0));
    assert!(matches!(query.execute().await, Err(LdapError::NotBound)));
    drop(query);

    assert!(directory.search_calls().is_empty());
    assert_eq!(directory.control_updates(), 0);

    Ok(())
}

/// Tests that binding with the service account enables queries.
#[tokio::test]
async fn test_bind_then_query() -> anyhow::Result<()> {
    crate::common::init_tracing();
    let mut directory = MemoryDirectory::with_people(3);

    let wrong = dirquery_ldap::Credentials::new(MemoryDirectory::ADMIN_DN, "wrong");
    assert!(!directory.bind(&wrong).await?);

    let credentials =
        dirquery_ldap::Credentials::new(MemoryDirectory::ADMIN_DN, MemoryDirectory::ADMIN_PASSWORD);
    assert!(directory.bind(&credentials).await?);

    let dns = run(&mut directory, paged(2, 0)).await?;
    assert_eq!(dns.len(), 3);

    Ok(())
}

/// Tests attribute selection and attributes-only searches.
#[tokio::test]
async fn test_attribute_selection() -> anyhow::Result<()> {
    let mut directory = directory(2);
    let options = paged(0, 0).attributes(["mail"]);

    let mut query = directory.query(MemoryDirectory::PEOPLE_DN, "(uid=user001)", options);
    let entries = query.execute().await?.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].get_attr("mail"), Some("user001@example.com"));
    assert!(!entries[0].has_attr("cn"));
    query.close()?;

    let options = paged(0, 0).attributes(["cn"]).attrs_only(true);
    let mut query = directory.query(MemoryDirectory::PEOPLE_DN, "(uid=user001)", options);
    let entries = query.execute().await?.entries();
    assert_eq!(entries[0].get_attrs("cn").map(Vec::len), Some(0));
    query.close()?;

    Ok(())
}

/// Tests that timeout, deref and attrs_only travel with every paged round.
#[tokio::test]
async fn test_round_options_reach_every_round() -> anyhow::Result<()> {
    let mut directory = directory(9);
    let options = paged(4, 0)
        .timeout(Duration::from_millis(1500))
        .deref(DerefPolicy::Finding)
        .attrs_only(true);

    let dns = run(&mut directory, options).await?;
    assert_eq!(dns.len(), 9);

    let calls = directory.search_calls();
    assert_eq!(calls.len(), 3);
    for (round, call) in calls.iter().enumerate() {
        assert_eq!(call.timeout, Some(Duration::from_millis(1500)), "round {round}");
        assert_eq!(call.deref, Some(DerefPolicy::Finding), "round {round}");
        assert!(call.attrs_only, "round {round}");
    }

    Ok(())
}

/// Tests that rounds carry no limit or policy unless asked.
#[tokio::test]
async fn test_round_options_default_to_library_behaviour() -> anyhow::Result<()> {
    let mut directory = directory(5);

    run(&mut directory, paged(2, 0)).await?;

    let calls = directory.search_calls();
    assert_eq!(calls.len(), 3);
    assert!(calls
        .iter()
        .all(|call| call.timeout.is_none() && call.deref.is_none() && !call.attrs_only));

    Ok(())
}
