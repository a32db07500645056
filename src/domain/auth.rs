//! Authentication contexts and provider sessions

use super::ids::TenantId;
use crate::config::SecretString;
use chrono::{DateTime, Duration, Utc};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

/// Kind of credential backing a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
    /// Unattended tenant-level credential
    System,
    /// Session of a logged-in clinical user
    Provider,
}

impl std::fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialKind::System => write!(f, "system"),
            CredentialKind::Provider => write!(f, "provider"),
        }
    }
}

/// A live session reported by the session collaborator
#[derive(Debug, Clone, Deserialize)]
pub struct Session {
    /// Tenant the session belongs to
    pub tenant_id: TenantId,

    /// Session kind
    pub kind: CredentialKind,

    /// Identity of the logged-in user
    pub user_id: String,

    /// Bearer token of the session
    pub access_token: SecretString,

    /// Expiry of the session token
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Whether the session can still be used at `now`
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now && !self.access_token.expose_secret().is_empty()
    }
}

/// Resolved credential for a unit of work
///
/// Contexts are short-lived; callers check [`AuthContext::is_valid_at`] before
/// each unit and re-resolve when it fails.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Credential kind
    pub kind: CredentialKind,

    /// Bearer token
    token: SecretString,

    /// User identity for provider-sourced contexts
    pub user_id: Option<String>,

    /// End of validity
    pub expires_at: DateTime<Utc>,
}

impl AuthContext {
    /// Context backed by the tenant's system credential
    pub fn system(token: SecretString, expires_at: DateTime<Utc>) -> Self {
        Self {
            kind: CredentialKind::System,
            token,
            user_id: None,
            expires_at,
        }
    }

    /// Context borrowing the identity of a live provider session
    pub fn provider(session: &Session) -> Self {
        Self {
            kind: CredentialKind::Provider,
            token: session.access_token.clone(),
            user_id: Some(session.user_id.clone()),
            expires_at: session.expires_at,
        }
    }

    /// Whether the context is still usable at `now`, keeping `skew` in reserve
    pub fn is_valid_at(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        self.expires_at - skew > now
    }

    /// `Authorization` header value
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token.expose_secret())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::secret_string;

    fn session(expires_in_minutes: i64, token: &str) -> Session {
        Session {
            tenant_id: TenantId::new("acme").unwrap(),
            kind: CredentialKind::Provider,
            user_id: "dr-who".to_string(),
            access_token: secret_string(token.to_string()),
            expires_at: Utc::now() + Duration::minutes(expires_in_minutes),
        }
    }

    #[test]
    fn test_session_activity() {
        let now = Utc::now();
        assert!(session(10, "tok").is_active_at(now));
        assert!(!session(-1, "tok").is_active_at(now));
        assert!(!session(10, "").is_active_at(now));
    }

    #[test]
    fn test_provider_context_carries_identity() {
        let ctx = AuthContext::provider(&session(10, "tok"));
        assert_eq!(ctx.kind, CredentialKind::Provider);
        assert_eq!(ctx.user_id.as_deref(), Some("dr-who"));
        assert_eq!(ctx.bearer(), "Bearer tok");
    }

    #[test]
    fn test_context_validity_with_skew() {
        let now = Utc::now();
        let ctx = AuthContext::system(secret_string("t".to_string()), now + Duration::seconds(90));
        assert!(ctx.is_valid_at(now, Duration::seconds(60)));
        assert!(!ctx.is_valid_at(now, Duration::seconds(120)));
    }

    #[test]
    fn test_context_debug_does_not_leak_token() {
        let ctx = AuthContext::system(secret_string("super-secret".to_string()), Utc::now());
        assert!(!format!("{ctx:?}").contains("super-secret"));
    }
}
