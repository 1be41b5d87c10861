//! Tests against a live LDAPS server.
//!
//! Run with `cargo test -- --ignored` after exporting `DIRQUERY_URL`,
//! `DIRQUERY_BIND_DN`, `DIRQUERY_BIND_PASSWORD` and `DIRQUERY_TEST_BASE_DN`.

use dirquery_ldap::{LdapConfig, LdapSession, QueryOptions, SearchScope, Session};

/// Tests a paged subtree search against a real directory.
#[tokio::test]
#[ignore = "requires a live LDAPS server"]
async fn test_live_paged_search() -> anyhow::Result<()> {
    crate::common::init_tracing();

    let config = LdapConfig::from_env()?;
    let base_dn = std::env::var("DIRQUERY_TEST_BASE_DN")?;
    let mut session = LdapSession::connect_and_bind(&config).await?;

    let options = QueryOptions::new()
        .scope(SearchScope::Subtree)
        .page_size(2)
        .max_items(10);
    let mut query = session.query(&base_dn, "(objectClass=*)", options);
    let count = query.execute().await?.len();
    assert!(count <= 10);
    query.close()?;

    tracing::info!(count, "Live paged search completed");
    assert_eq!(session.outstanding_handles(), 0);
    session.unbind().await?;

    Ok(())
}
