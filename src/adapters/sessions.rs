//! Credential/session collaborator
//!
//! Read-only view of live user sessions. Sessions are fetched per call and
//! handed to the credential selection as an explicit argument.

use crate::adapters::http::build_client;
use crate::config::{SecretString, SessionsConfig};
use crate::domain::{CredentialKind, Result, Session, SyncError, TenantId};
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use secrecy::ExposeSecret;

/// Live session lookup
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Sessions of `kind` currently registered for the tenant
    async fn get_active_sessions(
        &self,
        tenant_id: &TenantId,
        kind: CredentialKind,
    ) -> Result<Vec<Session>>;
}

/// Store with no sessions, used when `[sessions]` is not configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSessions;

#[async_trait]
impl SessionStore for NoSessions {
    async fn get_active_sessions(
        &self,
        _tenant_id: &TenantId,
        _kind: CredentialKind,
    ) -> Result<Vec<Session>> {
        Ok(Vec::new())
    }
}

/// HTTP session service client
///
/// `GET {base_url}/tenants/{tenant}/sessions?kind={kind}` returning a JSON
/// array of sessions.
pub struct HttpSessionStore {
    client: Client,
    base_url: String,
    token: Option<SecretString>,
}

impl HttpSessionStore {
    /// Creates a client from the `[sessions]` configuration section
    pub fn new(config: &SessionsConfig) -> Result<Self> {
        let client = build_client(config.timeout_seconds, true).map_err(SyncError::Configuration)?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }
}

#[async_trait]
impl SessionStore for HttpSessionStore {
    async fn get_active_sessions(
        &self,
        tenant_id: &TenantId,
        kind: CredentialKind,
    ) -> Result<Vec<Session>> {
        let url = format!("{}/tenants/{}/sessions", self.base_url, tenant_id);
        let mut request = self.client.get(&url).query(&[("kind", kind.to_string())]);
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token.expose_secret()));
        }

        let resp = request
            .send()
            .await
            .map_err(|e| SyncError::Authentication(format!("Session lookup failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SyncError::Authentication(format!(
                "Session lookup for tenant {tenant_id} returned {status}"
            )));
        }

        let sessions: Vec<Session> = resp
            .json()
            .await
            .map_err(|e| SyncError::Authentication(format!("Invalid session response: {e}")))?;

        // Never hand out another tenant's session
        Ok(sessions
            .into_iter()
            .filter(|s| &s.tenant_id == tenant_id && s.kind == kind)
            .collect())
    }
}
