//! Paged-results control handling (RFC 2696).
//!
//! A logical query is split into rounds. Each round attaches the
//! paged-results control to the session, runs one search and reads the
//! continuation cookie back from the response. When the rounds are over the
//! control is stripped from the session again, whether they succeeded or
//! not: some client stacks keep a zero-size page control attached, which
//! empties every later unpaged search on the same session.

use ldap3::controls::{MakeCritical, PagedResults, RawControl};

use crate::config::SearchScope;
use crate::error::{LdapError, LdapResult};
use crate::handle::HandleRegistry;
use crate::search::{search_round, SearchTarget};
use crate::session::Session;

/// OID of the simple paged-results control.
pub const PAGED_RESULTS_OID: &str = "1.2.840.113556.1.4.319";

/// Page sizing derived from the query options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagePlan {
    page_size: u32,
    max_items: u32,
    paged: bool,
}

impl PagePlan {
    /// Computes the effective page size for `scope`.
    ///
    /// When `max_items` is set and smaller than the requested page, paging is
    /// switched off and the whole bounded result is fetched in one round.
    #[must_use]
    pub fn new(scope: SearchScope, page_size: u32, max_items: u32) -> Self {
        let page_size = if max_items != 0 && page_size > max_items {
            0
        } else if max_items != 0 {
            page_size.min(max_items)
        } else {
            page_size
        };

        Self {
            page_size,
            max_items,
            paged: scope != SearchScope::Base && page_size > 0,
        }
    }

    /// Returns the effective page size; 0 when unpaged.
    #[must_use]
    pub const fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Returns the total entry cap; 0 when unbounded.
    #[must_use]
    pub const fn max_items(&self) -> u32 {
        self.max_items
    }

    /// Returns true if rounds carry the paged-results control.
    #[must_use]
    pub const fn is_paged(&self) -> bool {
        self.paged
    }

    /// Size limit of a round given the remaining quota.
    ///
    /// A full page's worth of quota leaves the round to the page control.
    #[must_use]
    pub fn size_limit(&self, items_left: u32) -> i32 {
        if self.page_size > 0 && items_left >= self.page_size {
            0
        } else {
            protocol_size(items_left)
        }
    }

    /// Quota remaining after one more round.
    #[must_use]
    pub fn consume(&self, items_left: u32) -> u32 {
        items_left - items_left.min(self.page_size)
    }
}

/// Saturating conversion to the protocol's `INTEGER (0..maxInt)`.
fn protocol_size(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// Attaches a paged-results control asking for `size` entries.
///
/// Any paged-results control already on the session is replaced; other
/// controls are kept.
pub fn request_page<S>(session: &mut S, size: u32, cookie: Vec<u8>) -> LdapResult<()>
where
    S: Session + ?Sized,
{
    let control: RawControl = PagedResults {
        size: protocol_size(size),
        cookie,
    }
    .critical()
    .into();

    let mut controls = without_paged_control(session.server_controls());
    controls.push(control);

    session
        .set_server_controls(controls)
        .map_err(|e| LdapError::PaginationControl(e.message))
}

/// Ends pagination on the session.
///
/// Requests a zero-sized page, then removes every paged-results control
/// from the session's control list.
pub fn reset_pagination<S>(session: &mut S) -> LdapResult<()>
where
    S: Session + ?Sized,
{
    request_page(session, 0, Vec::new())?;

    let controls = without_paged_control(session.server_controls());
    session
        .set_server_controls(controls)
        .map_err(|e| LdapError::PaginationControl(e.message))?;

    tracing::debug!("Pagination state reset");
    Ok(())
}

fn without_paged_control(controls: &[RawControl]) -> Vec<RawControl> {
    controls
        .iter()
        .filter(|control| control.ctype != PAGED_RESULTS_OID)
        .cloned()
        .collect()
}

/// Returns true if the session still carries a paged-results control.
#[must_use]
pub fn has_paged_control<S>(session: &S) -> bool
where
    S: Session + ?Sized,
{
    session
        .server_controls()
        .iter()
        .any(|control| control.ctype == PAGED_RESULTS_OID)
}

/// Runs every round of `target`, pushing each page into `registry`.
///
/// The paged-results control is reset exactly once after a paged run, on
/// success and on failure. On failure the reset is best effort and the
/// search error is returned.
pub async fn run_rounds<S>(
    session: &mut S,
    target: &SearchTarget<'_>,
    registry: &mut HandleRegistry,
) -> LdapResult<usize>
where
    S: Session + ?Sized,
{
    let plan = PagePlan::new(
        target.options.scope,
        target.options.page_size,
        target.options.max_items,
    );

    let outcome = drive(session, target, &plan, registry).await;

    if !plan.is_paged() {
        return outcome;
    }

    match outcome {
        Ok(rounds) => {
            reset_pagination(session)?;
            Ok(rounds)
        }
        Err(e) => {
            if let Err(reset) = reset_pagination(session) {
                tracing::warn!(error = %reset, "Failed to reset pagination after search failure");
            }
            Err(e)
        }
    }
}

async fn drive<S>(
    session: &mut S,
    target: &SearchTarget<'_>,
    plan: &PagePlan,
    registry: &mut HandleRegistry,
) -> LdapResult<usize>
where
    S: Session + ?Sized,
{
    let mut items_left = plan.max_items();
    let mut cookie = Vec::new();
    let mut rounds = 0;

    loop {
        if plan.is_paged() {
            request_page(session, plan.page_size(), std::mem::take(&mut cookie))?;
        }

        let size_limit = plan.size_limit(items_left);
        let handle = search_round(session, target, size_limit).await?;
        rounds += 1;

        tracing::debug!(
            round = rounds,
            page_size = plan.page_size(),
            size_limit,
            entries = handle.len(),
            "Search round completed"
        );

        let next_cookie = plan.is_paged().then(|| handle.paged_cookie()).flatten();
        registry.push(handle);

        items_left = plan.consume(items_left);
        if plan.max_items() != 0 && items_left == 0 {
            break;
        }

        match next_cookie {
            Some(next) if !next.is_empty() => cookie = next,
            _ => break,
        }
    }

    Ok(rounds)
}
