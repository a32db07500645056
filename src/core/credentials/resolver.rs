//! Credential resolution and per-tenant leases

use super::select::{select_credential, CredentialChoice};
use crate::adapters::{SessionStore, TokenIssuer};
use crate::domain::{AuthContext, CredentialKind, Result, Tenant};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Produces an [`AuthContext`] for a tenant
///
/// Session state is fetched on every call and passed to
/// [`select_credential`]; nothing is cached here.
pub struct CredentialResolver {
    sessions: Arc<dyn SessionStore>,
    issuer: Arc<dyn TokenIssuer>,
}

impl CredentialResolver {
    pub fn new(sessions: Arc<dyn SessionStore>, issuer: Arc<dyn TokenIssuer>) -> Self {
        Self { sessions, issuer }
    }

    /// Resolves the credential for `tenant` at `now`
    ///
    /// A failing session lookup is treated as "no active sessions" so the
    /// system credential can still be used.
    ///
    /// # Errors
    ///
    /// [`SyncError::NoCredential`](crate::domain::SyncError::NoCredential) when the
    /// tenant has neither an active session nor a system credential, or an
    /// authentication error if the system token cannot be issued.
    pub async fn resolve(&self, tenant: &Tenant, now: DateTime<Utc>) -> Result<AuthContext> {
        let sessions = match self
            .sessions
            .get_active_sessions(&tenant.id, CredentialKind::Provider)
            .await
        {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::warn!(
                    tenant_id = %tenant.id,
                    error = %e,
                    "Session lookup failed, continuing without provider sessions"
                );
                Vec::new()
            }
        };

        match select_credential(tenant, &sessions, now)? {
            CredentialChoice::Provider(session) => {
                tracing::debug!(
                    tenant_id = %tenant.id,
                    user_id = %session.user_id,
                    "Using provider session"
                );
                Ok(AuthContext::provider(session))
            }
            CredentialChoice::System(credential) => {
                let token = self.issuer.issue_token(&tenant.id, credential).await?;
                tracing::debug!(tenant_id = %tenant.id, "Using system credential");
                Ok(AuthContext::system(token.access_token, token.expires_at))
            }
        }
    }
}

/// Keeps a tenant's [`AuthContext`] fresh across units
///
/// [`CredentialLease::current`] returns the held context while it is valid
/// beyond the refresh skew and re-resolves otherwise, so no unit starts with a
/// context about to expire.
pub struct CredentialLease {
    tenant: Tenant,
    resolver: Arc<CredentialResolver>,
    skew: Duration,
    held: Mutex<Option<AuthContext>>,
}

impl CredentialLease {
    /// Creates a lease seeded with an already-resolved context
    pub fn new(
        tenant: Tenant,
        resolver: Arc<CredentialResolver>,
        skew: Duration,
        initial: AuthContext,
    ) -> Self {
        Self {
            tenant,
            resolver,
            skew,
            held: Mutex::new(Some(initial)),
        }
    }

    /// A context valid for at least `skew` from now
    pub async fn current(&self) -> Result<AuthContext> {
        let mut held = self.held.lock().await;
        let now = Utc::now();
        if let Some(ctx) = held.as_ref() {
            if ctx.is_valid_at(now, self.skew) {
                return Ok(ctx.clone());
            }
            tracing::debug!(
                tenant_id = %self.tenant.id,
                kind = %ctx.kind,
                "Credential near expiry, re-resolving"
            );
        }
        *held = None;
        let fresh = self.resolver.resolve(&self.tenant, now).await?;
        *held = Some(fresh.clone());
        Ok(fresh)
    }
}
