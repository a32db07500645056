//! Pure credential selection policy

use crate::domain::{CredentialKind, Result, Session, SyncError, SystemCredential, Tenant};
use chrono::{DateTime, Utc};

/// Which credential a tenant's units should run under
#[derive(Debug, Clone, Copy)]
pub enum CredentialChoice<'a> {
    /// A live provider session, preferred when available
    Provider(&'a Session),
    /// The tenant's unattended system credential
    System(&'a SystemCredential),
}

impl CredentialChoice<'_> {
    pub fn kind(&self) -> CredentialKind {
        match self {
            CredentialChoice::Provider(_) => CredentialKind::Provider,
            CredentialChoice::System(_) => CredentialKind::System,
        }
    }
}

/// Picks the credential for `tenant` at `now`
///
/// The first provider session that belongs to the tenant and is still active
/// wins; otherwise the tenant's system credential is used. Sessions of other
/// tenants are ignored even if the caller passes them in.
///
/// # Errors
///
/// Returns [`SyncError::NoCredential`] when neither exists.
pub fn select_credential<'a>(
    tenant: &'a Tenant,
    sessions: &'a [Session],
    now: DateTime<Utc>,
) -> Result<CredentialChoice<'a>> {
    if let Some(session) = sessions.iter().find(|s| {
        s.tenant_id == tenant.id && s.kind == CredentialKind::Provider && s.is_active_at(now)
    }) {
        return Ok(CredentialChoice::Provider(session));
    }

    tenant
        .system_credential
        .as_ref()
        .map(CredentialChoice::System)
        .ok_or_else(|| SyncError::NoCredential {
            tenant_id: tenant.id.to_string(),
        })
}
