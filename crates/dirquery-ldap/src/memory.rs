//! In-memory directory session for tests.
//!
//! [`MemoryDirectory`] evaluates simple filters over a flat list of entries
//! and honours the paged-results control with an offset cookie. Server
//! controls stay attached to the session between searches, like the
//! session-wide controls of C client libraries: a leftover zero-size page
//! control makes every later search come back empty.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use ldap3::controls::{Control, ControlType, PagedResults, RawControl};
use ldap3::SearchEntry;

use crate::config::{DerefPolicy, SearchScope};
use crate::error::LdapResult;
use crate::handle::{HandleId, SearchHandle};
use crate::pagination::PAGED_RESULTS_OID;
use crate::session::{Credentials, ProtocolError, SearchRequest, Session};

const SUCCESS: u32 = 0;
const SIZE_LIMIT_EXCEEDED: u32 = 4;
const NO_SUCH_OBJECT: u32 = 32;

/// One search call as seen by the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedSearch {
    /// Scope of the call.
    pub scope: SearchScope,
    /// Base DN of the call.
    pub base: String,
    /// Filter of the call.
    pub filter: String,
    /// Size limit of the call.
    pub size_limit: i32,
    /// Page size of the attached paged-results control, if any.
    pub page_size: Option<i32>,
    /// Cookie of the attached paged-results control, if any.
    pub cookie: Option<Vec<u8>>,
    /// Whether only attribute names were requested.
    pub attrs_only: bool,
    /// Round time limit of the call.
    pub timeout: Option<Duration>,
    /// Alias dereference policy of the call.
    pub deref: Option<DerefPolicy>,
}

/// In-memory [`Session`] implementation.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    entries: Vec<SearchEntry>,
    bind_dn: String,
    bind_password: String,
    bound: bool,
    controls: Vec<RawControl>,
    control_updates: usize,
    calls: Vec<RecordedSearch>,
    failures: HashMap<usize, ProtocolError>,
    fail_release: bool,
    next_handle: u64,
    outstanding: HashSet<HandleId>,
}

impl MemoryDirectory {
    /// Suffix of the directory tree.
    pub const BASE_DN: &'static str = "dc=example,dc=com";
    /// Container of the generated people.
    pub const PEOPLE_DN: &'static str = "ou=people,dc=example,dc=com";
    /// DN accepted by [`Session::bind`].
    pub const ADMIN_DN: &'static str = "cn=admin,dc=example,dc=com";
    /// Password accepted by [`Session::bind`].
    pub const ADMIN_PASSWORD: &'static str = "secret";

    /// Creates a directory holding only the suffix entry.
    #[must_use]
    pub fn new() -> Self {
        let mut directory = Self {
            bind_dn: Self::ADMIN_DN.to_string(),
            bind_password: Self::ADMIN_PASSWORD.to_string(),
            ..Self::default()
        };
        directory.add_entry(
            Self::BASE_DN,
            [("objectClass", vec!["top", "domain"]), ("dc", vec!["example"])],
        );
        directory
    }

    /// Creates a directory with `count` people below [`Self::PEOPLE_DN`].
    #[must_use]
    pub fn with_people(count: usize) -> Self {
        let mut directory = Self::new();
        directory.add_entry(
            Self::PEOPLE_DN,
            [
                ("objectClass", vec!["top", "organizationalUnit"]),
                ("ou", vec!["people"]),
            ],
        );
        for i in 0..count {
            let uid = format!("user{i:03}");
            let cn = format!("User {i}");
            let mail = format!("{uid}@example.com");
            directory.add_entry(
                &format!("uid={uid},{}", Self::PEOPLE_DN),
                [
                    ("objectClass", vec!["top", "person", "inetOrgPerson"]),
                    ("uid", vec![uid.as_str()]),
                    ("cn", vec![cn.as_str()]),
                    ("mail", vec![mail.as_str()]),
                ],
            );
        }
        directory
    }

    /// Marks the session as bound.
    #[must_use]
    pub fn bound(mut self) -> Self {
        self.bound = true;
        self
    }

    /// Adds an entry.
    pub fn add_entry<'a, I>(&mut self, dn: &str, attrs: I)
    where
        I: IntoIterator<Item = (&'a str, Vec<&'a str>)>,
    {
        let attrs = attrs
            .into_iter()
            .map(|(name, values)| {
                (
                    name.to_string(),
                    values.into_iter().map(str::to_string).collect(),
                )
            })
            .collect();
        self.entries.push(SearchEntry {
            dn: dn.to_string(),
            attrs,
            bin_attrs: HashMap::new(),
        });
    }

    /// Makes search call number `index` (0-based) fail.
    pub fn fail_search_call(&mut self, index: usize, code: u32, message: &str) {
        self.failures.insert(index, ProtocolError::new(code, message));
    }

    /// Makes every release fail.
    pub fn fail_release(&mut self, fail: bool) {
        self.fail_release = fail;
    }

    /// Returns every search call so far.
    #[must_use]
    pub fn search_calls(&self) -> &[RecordedSearch] {
        &self.calls
    }

    /// Forgets the recorded search calls.
    pub fn clear_search_calls(&mut self) {
        self.calls.clear();
    }

    /// Returns how often the control list was replaced.
    #[must_use]
    pub const fn control_updates(&self) -> usize {
        self.control_updates
    }

    /// Returns the number of issued but unreleased handles.
    #[must_use]
    pub fn outstanding_handles(&self) -> usize {
        self.outstanding.len()
    }

    /// Issues a handle for `entries` without running a search.
    pub fn issue_handle(&mut self, entries: Vec<SearchEntry>) -> SearchHandle {
        self.issue(entries, Vec::new(), SUCCESS)
    }

    fn issue(&mut self, entries: Vec<SearchEntry>, controls: Vec<Control>, code: u32) -> SearchHandle {
        self.next_handle += 1;
        let id = HandleId(self.next_handle);
        self.outstanding.insert(id);
        SearchHandle::new(id, entries, controls, code)
    }

    fn paged_control(&self) -> Option<PagedResults> {
        self.controls
            .iter()
            .find(|control| control.ctype == PAGED_RESULTS_OID)
            .map(RawControl::parse::<PagedResults>)
    }

    fn in_scope(&self, scope: SearchScope, base: &str) -> Vec<&SearchEntry> {
        let base = base.to_ascii_lowercase();
        let suffix = format!(",{base}");
        self.entries
            .iter()
            .filter(|entry| {
                let dn = entry.dn.to_ascii_lowercase();
                match scope {
                    SearchScope::Base => dn == base,
                    SearchScope::OneLevel => dn
                        .split_once(',')
                        .is_some_and(|(_, parent)| parent == base),
                    SearchScope::Subtree => dn == base || dn.ends_with(&suffix),
                }
            })
            .collect()
    }
}

#[async_trait]
impl Session for MemoryDirectory {
    fn is_bound(&self) -> bool {
        self.bound
    }

    async fn bind(&mut self, credentials: &Credentials) -> LdapResult<bool> {
        self.bound = credentials.dn.eq_ignore_ascii_case(&self.bind_dn)
            && !credentials.password.is_empty()
            && credentials.password == self.bind_password;
        Ok(self.bound)
    }

    fn server_controls(&self) -> &[RawControl] {
        &self.controls
    }

    fn set_server_controls(&mut self, controls: Vec<RawControl>) -> Result<(), ProtocolError> {
        self.controls = controls;
        self.control_updates += 1;
        Ok(())
    }

    async fn search(&mut self, request: &SearchRequest<'_>) -> Result<SearchHandle, ProtocolError> {
        let paged = self.paged_control();
        let index = self.calls.len();
        self.calls.push(RecordedSearch {
            scope: request.scope,
            base: request.base.to_string(),
            filter: request.filter.to_string(),
            size_limit: request.size_limit,
            page_size: paged.as_ref().map(|p| p.size),
            cookie: paged.as_ref().map(|p| p.cookie.clone()),
            attrs_only: request.attrs_only,
            timeout: request.timeout,
            deref: request.deref,
        });

        if let Some(failure) = self.failures.remove(&index) {
            return Err(failure);
        }

        let filter = Filter::parse(request.filter)
            .ok_or_else(|| ProtocolError::local(format!("Bad search filter: {}", request.filter)))?;

        if self.in_scope(SearchScope::Base, request.base).is_empty() {
            return Err(ProtocolError::new(NO_SUCH_OBJECT, "No such object"));
        }

        let matches: Vec<SearchEntry> = self
            .in_scope(request.scope, request.base)
            .into_iter()
            .filter(|entry| filter.matches(entry))
            .map(|entry| select_attributes(entry, request.attributes, request.attrs_only))
            .collect();

        let size_limit = usize::try_from(request.size_limit).unwrap_or(0);
        let mut code = SUCCESS;
        let mut controls = Vec::new();

        let mut page = match paged {
            Some(PagedResults { size, cookie }) => {
                let size = usize::try_from(size).unwrap_or(0);
                let offset = std::str::from_utf8(&cookie)
                    .ok()
                    .and_then(|c| c.parse::<usize>().ok())
                    .unwrap_or(0)
                    .min(matches.len());
                let end = (offset + size).min(matches.len());

                let next = if size > 0 && end < matches.len() {
                    end.to_string().into_bytes()
                } else {
                    Vec::new()
                };
                let response: RawControl = PagedResults {
                    size: i32::try_from(matches.len()).unwrap_or(i32::MAX),
                    cookie: next,
                }
                .into();
                controls.push(Control(Some(ControlType::PagedResults), response));

                matches[offset..end].to_vec()
            }
            None => matches,
        };

        if size_limit > 0 && page.len() > size_limit {
            page.truncate(size_limit);
            code = SIZE_LIMIT_EXCEEDED;
        }

        Ok(self.issue(page, controls, code))
    }

    fn release(&mut self, handle: SearchHandle) -> Result<(), ProtocolError> {
        if self.fail_release {
            return Err(ProtocolError::local("release refused"));
        }
        if self.outstanding.remove(&handle.id()) {
            Ok(())
        } else {
            Err(ProtocolError::local(format!(
                "handle {} is unknown or already released",
                handle.id()
            )))
        }
    }
}

fn select_attributes(entry: &SearchEntry, requested: &[String], attrs_only: bool) -> SearchEntry {
    let all = requested.is_empty() || requested.iter().any(|a| a == "*");
    let attrs = entry
        .attrs
        .iter()
        .filter(|(name, _)| all || requested.iter().any(|r| r.eq_ignore_ascii_case(name)))
        .map(|(name, values)| {
            let values = if attrs_only { Vec::new() } else { values.clone() };
            (name.clone(), values)
        })
        .collect();

    SearchEntry {
        dn: entry.dn.clone(),
        attrs,
        bin_attrs: HashMap::new(),
    }
}

/// Minimal RFC 4515 filter: presence, equality with `*` wildcards, and the
/// `&`, `|`, `!` combinators.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Present(String),
    Equal(String, String),
}

impl Filter {
    fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let wrapped;
        let input = if input.starts_with('(') {
            input
        } else {
            wrapped = format!("({input})");
            wrapped.as_str()
        };

        let mut parser = FilterParser { input, pos: 0 };
        let filter = parser.filter()?;
        (parser.pos == input.len()).then_some(filter)
    }

    fn matches(&self, entry: &SearchEntry) -> bool {
        match self {
            Self::And(items) => items.iter().all(|f| f.matches(entry)),
            Self::Or(items) => items.iter().any(|f| f.matches(entry)),
            Self::Not(inner) => !inner.matches(entry),
            Self::Present(attr) => values(entry, attr).is_some(),
            Self::Equal(attr, pattern) => values(entry, attr)
                .is_some_and(|vals| vals.iter().any(|v| wildcard_match(pattern, v))),
        }
    }
}

fn values<'e>(entry: &'e SearchEntry, attr: &str) -> Option<&'e Vec<String>> {
    entry
        .attrs
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(attr))
        .map(|(_, vals)| vals)
}

fn wildcard_match(pattern: &str, value: &str) -> bool {
    let pattern = pattern.to_lowercase();
    let value = value.to_lowercase();
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == value;
    }

    let (first, rest) = (parts[0], &parts[1..]);
    let Some(mut remaining) = value.strip_prefix(first) else {
        return false;
    };
    let (last, middle) = rest.split_last().map_or(("", &[][..]), |(l, m)| (*l, m));
    for part in middle {
        match remaining.find(part) {
            Some(at) => remaining = &remaining[at + part.len()..],
            None => return false,
        }
    }
    remaining.ends_with(last)
}

struct FilterParser<'a> {
    input: &'a str,
    pos: usize,
}

impl FilterParser<'_> {
    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn expect(&mut self, c: char) -> Option<()> {
        (self.peek()? == c).then(|| self.pos += c.len_utf8())
    }

    fn filter(&mut self) -> Option<Filter> {
        self.expect('(')?;
        let filter = match self.peek()? {
            '&' => {
                self.pos += 1;
                Filter::And(self.list()?)
            }
            '|' => {
                self.pos += 1;
                Filter::Or(self.list()?)
            }
            '!' => {
                self.pos += 1;
                Filter::Not(Box::new(self.filter()?))
            }
            _ => {
                let end = self.pos + self.input[self.pos..].find(')')?;
                let (attr, value) = self.input[self.pos..end].split_once('=')?;
                self.pos = end;
                if attr.is_empty() {
                    return None;
                }
                if value == "*" {
                    Filter::Present(attr.to_string())
                } else {
                    Filter::Equal(attr.to_string(), value.to_string())
                }
            }
        };
        self.expect(')')?;
        Some(filter)
    }

    fn list(&mut self) -> Option<Vec<Filter>> {
        let mut items = Vec::new();
        while self.peek()? == '(' {
            items.push(self.filter()?);
        }
        Some(items)
    }
}
