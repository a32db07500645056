//! System credential token issuance (OAuth2 client-credentials grant)

use crate::adapters::http::build_client;
use crate::config::{secret_string, SecretString};
use crate::domain::{Result, SyncError, SystemCredential, TenantId};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Duration, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;

/// Lifetime assumed when the token endpoint omits `expires_in`
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 300;

/// A bearer token with its expiry
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub access_token: SecretString,
    pub expires_at: DateTime<Utc>,
}

/// Exchanges a tenant's system credential for a bearer token
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue_token(
        &self,
        tenant_id: &TenantId,
        credential: &SystemCredential,
    ) -> Result<IssuedToken>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// OAuth2 client-credentials issuer using HTTP Basic client authentication
pub struct ClientCredentialsIssuer {
    client: Client,
}

impl ClientCredentialsIssuer {
    pub fn new(timeout_seconds: u64, tls_verify: bool) -> Result<Self> {
        let client = build_client(timeout_seconds, tls_verify).map_err(SyncError::Configuration)?;
        Ok(Self { client })
    }
}

fn basic_auth(client_id: &str, client_secret: &str) -> String {
    let encoded = general_purpose::STANDARD.encode(format!("{client_id}:{client_secret}"));
    format!("Basic {encoded}")
}

#[async_trait]
impl TokenIssuer for ClientCredentialsIssuer {
    async fn issue_token(
        &self,
        tenant_id: &TenantId,
        credential: &SystemCredential,
    ) -> Result<IssuedToken> {
        let mut form = vec![("grant_type", "client_credentials".to_string())];
        if let Some(scope) = &credential.scope {
            form.push(("scope", scope.clone()));
        }

        let resp = self
            .client
            .post(&credential.token_url)
            .header(
                AUTHORIZATION,
                basic_auth(&credential.client_id, credential.client_secret.expose_secret().as_ref()),
            )
            .header(ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| SyncError::Authentication(format!("Token request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SyncError::Authentication(format!(
                "Token endpoint for tenant {tenant_id} returned {status}"
            )));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| SyncError::Authentication(format!("Invalid token response: {e}")))?;
        if token.access_token.is_empty() {
            return Err(SyncError::Authentication(format!(
                "Token endpoint for tenant {tenant_id} returned an empty token"
            )));
        }

        let lifetime = token.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        tracing::debug!(tenant_id = %tenant_id, expires_in = lifetime, "Issued system token");

        Ok(IssuedToken {
            access_token: secret_string(token.access_token),
            expires_at: Utc::now() + Duration::seconds(lifetime),
        })
    }
}
