//! LDAP connection management.
//!
//! ## Security Requirements
//!
//! All connections use LDAPS (TLS from connection start).
//! STARTTLS is NOT supported to prevent downgrade attacks.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use ldap3::controls::RawControl;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, SearchEntry, SearchOptions, SearchResult};

use crate::config::LdapConfig;
use crate::error::{LdapError, LdapResult};
use crate::handle::{HandleId, SearchHandle};
use crate::session::{Credentials, ProtocolError, SearchRequest, Session};

const SUCCESS: u32 = 0;
const SIZE_LIMIT_EXCEEDED: u32 = 4;
const INVALID_CREDENTIALS: u32 = 49;

/// Whole seconds for the protocol `timeLimit`, rounded up.
///
/// The server treats 0 as unlimited, so any non-zero timeout asks for at
/// least one second.
fn server_time_limit(timeout: Duration) -> i32 {
    let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
    i32::try_from(secs).unwrap_or(i32::MAX)
}

/// A directory session over one LDAPS connection.
///
/// Server controls set on the session are attached to every search until
/// they are replaced.
pub struct LdapSession {
    ldap: Ldap,
    bound: bool,
    controls: Vec<RawControl>,
    next_handle: u64,
    outstanding: HashSet<HandleId>,
}

impl LdapSession {
    /// Opens an LDAPS connection without binding.
    ///
    /// ## Security
    ///
    /// The configuration must use LDAPS. This is validated here as well as
    /// at config build time.
    pub async fn connect(config: &LdapConfig) -> LdapResult<Self> {
        config.validate()?;

        let settings = LdapConnSettings::new()
            .set_conn_timeout(config.connection_timeout)
            .set_no_tls_verify(!config.validate_certificates);

        let (conn, ldap) = LdapConnAsync::with_settings(settings, &config.connection_url)
            .await
            .map_err(|e| LdapError::Connection(e.to_string()))?;

        // Spawn connection driver
        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                tracing::warn!("LDAP connection driver error: {}", e);
            }
        });

        Ok(Self::from_ldap(ldap))
    }

    /// Opens an LDAPS connection and binds with the service account.
    pub async fn connect_and_bind(config: &LdapConfig) -> LdapResult<Self> {
        let mut session = Self::connect(config).await?;
        let credentials = Credentials::new(&config.bind_dn, &config.bind_credential);
        if !session.bind(&credentials).await? {
            return Err(LdapError::Bind("invalid service account credentials".to_string()));
        }
        Ok(session)
    }

    /// Wraps an already established ldap3 handle.
    ///
    /// The session starts unbound.
    #[must_use]
    pub fn from_ldap(ldap: Ldap) -> Self {
        Self {
            ldap,
            bound: false,
            controls: Vec::new(),
            next_handle: 0,
            outstanding: HashSet::new(),
        }
    }

    /// Returns the number of issued but unreleased handles.
    #[must_use]
    pub fn outstanding_handles(&self) -> usize {
        self.outstanding.len()
    }

    /// Unbinds and closes the connection.
    pub async fn unbind(mut self) -> LdapResult<()> {
        if !self.outstanding.is_empty() {
            tracing::warn!(
                outstanding = self.outstanding.len(),
                "Closing LDAP session with unreleased search handles"
            );
        }
        self.ldap.unbind().await?;
        Ok(())
    }
}

#[async_trait]
impl Session for LdapSession {
    fn is_bound(&self) -> bool {
        self.bound
    }

    /// Performs a simple bind.
    ///
    /// ## Security
    ///
    /// The password is never logged or stored.
    async fn bind(&mut self, credentials: &Credentials) -> LdapResult<bool> {
        let result = self
            .ldap
            .simple_bind(&credentials.dn, &credentials.password)
            .await
            .map_err(|e| LdapError::Bind(e.to_string()))?;

        match result.rc {
            SUCCESS => {
                self.bound = true;
                Ok(true)
            }
            INVALID_CREDENTIALS => {
                self.bound = false;
                Ok(false)
            }
            rc => {
                self.bound = false;
                Err(LdapError::Bind(format!("Bind error: [{rc}] {}", result.text)))
            }
        }
    }

    fn server_controls(&self) -> &[RawControl] {
        &self.controls
    }

    fn set_server_controls(&mut self, controls: Vec<RawControl>) -> Result<(), ProtocolError> {
        self.controls = controls;
        Ok(())
    }

    async fn search(&mut self, request: &SearchRequest<'_>) -> Result<SearchHandle, ProtocolError> {
        let mut options = SearchOptions::new()
            .sizelimit(request.size_limit)
            .typesonly(request.attrs_only);
        if let Some(deref) = request.deref {
            options = options.deref(deref.to_ldap3());
        }
        if let Some(timeout) = request.timeout {
            options = options.timelimit(server_time_limit(timeout));
            self.ldap.with_timeout(timeout);
        }

        self.ldap.with_search_options(options);
        if !self.controls.is_empty() {
            self.ldap.with_controls(self.controls.clone());
        }

        let SearchResult(entries, result) = self
            .ldap
            .search(
                request.base,
                request.scope.to_ldap3(),
                request.filter,
                request.attributes.to_vec(),
            )
            .await?;

        // A size limit hit still delivers the entries sent so far.
        if result.rc != SUCCESS && result.rc != SIZE_LIMIT_EXCEEDED {
            return Err(ProtocolError::new(result.rc, result.text));
        }

        let entries = entries.into_iter().map(SearchEntry::construct).collect();

        self.next_handle += 1;
        let id = HandleId(self.next_handle);
        self.outstanding.insert(id);

        Ok(SearchHandle::new(id, entries, result.ctrls, result.rc))
    }

    fn release(&mut self, handle: SearchHandle) -> Result<(), ProtocolError> {
        if self.outstanding.remove(&handle.id()) {
            Ok(())
        } else {
            Err(ProtocolError::local(format!(
                "handle {} was not issued by this session or is already released",
                handle.id()
            )))
        }
    }
}
