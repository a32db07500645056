//! FHIR REST implementation of [`TargetStore`]

use super::TargetStore;
use crate::adapters::http::{build_client, bundle_resources, next_link, RetryPolicy, FHIR_JSON};
use crate::config::{SecretString, TargetConfig};
use crate::domain::{Result, SyncError, TargetError, TenantId};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, LOCATION};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::ExposeSecret;
use serde_json::Value;

/// Maximum pages followed on a target search
const MAX_SEARCH_PAGES: usize = 10;

/// HTTP client for the target FHIR store
pub struct FhirTargetClient {
    client: Client,
    base_url: String,
    token: Option<SecretString>,
    retry: RetryPolicy,
}

impl FhirTargetClient {
    /// Creates a client from the `[target]` configuration section
    pub fn new(config: &TargetConfig) -> Result<Self> {
        let client =
            build_client(config.timeout_seconds, config.tls_verify).map_err(SyncError::Configuration)?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            retry: RetryPolicy::from(&config.retry),
        })
    }

    /// Base URL for a tenant, substituting `{tenant}`
    pub fn tenant_base_url(&self, tenant: &TenantId) -> String {
        self.base_url.replace("{tenant}", tenant.as_str())
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header(ACCEPT, FHIR_JSON);
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {}", token.expose_secret())),
            None => request,
        }
    }

    async fn search_page(
        &self,
        url: &str,
        query: &[(String, String)],
    ) -> std::result::Result<Value, TargetError> {
        self.retry
            .run("target.search", TargetError::is_transient, || async {
                let resp = self
                    .authorize(self.client.get(url).query(query))
                    .send()
                    .await
                    .map_err(|e| TargetError::ConnectionFailed(e.to_string()))?;
                let resp = check_status(resp, |status, body| {
                    TargetError::SearchFailed(format!("{status}: {body}"))
                })
                .await?;
                resp.json::<Value>()
                    .await
                    .map_err(|e| TargetError::InvalidResponse(e.to_string()))
            })
            .await
    }
}

/// Maps a non-success status onto a [`TargetError`]
///
/// `fallback` builds the error for 4xx statuses other than 401/403/404/429.
async fn check_status<F>(resp: Response, fallback: F) -> std::result::Result<Response, TargetError>
where
    F: FnOnce(StatusCode, String) -> TargetError,
{
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let retry_after = resp
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unspecified")
        .to_string();
    let body = resp.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            TargetError::Unauthorized(status.to_string())
        }
        StatusCode::NOT_FOUND => TargetError::NotFound(body),
        StatusCode::TOO_MANY_REQUESTS => TargetError::Throttled(retry_after),
        s if s.is_server_error() => TargetError::ServerError {
            status: s.as_u16(),
            message: body,
        },
        s => fallback(s, body),
    })
}

/// Reads the response body, filling `id` from the `Location` header when the
/// server answered without a representation
async fn resource_from_response(
    resp: Response,
    sent: &Value,
) -> std::result::Result<Value, TargetError> {
    let location_id = resp
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .and_then(id_from_location);
    let text = resp
        .text()
        .await
        .map_err(|e| TargetError::InvalidResponse(e.to_string()))?;

    if !text.trim().is_empty() {
        return serde_json::from_str(&text).map_err(|e| TargetError::InvalidResponse(e.to_string()));
    }

    let id = location_id
        .ok_or_else(|| TargetError::InvalidResponse("Response has neither body nor Location".to_string()))?;
    let mut resource = sent.clone();
    resource["id"] = Value::String(id);
    Ok(resource)
}

/// Extracts the logical id from `.../{type}/{id}[/_history/{vid}]`
fn id_from_location(location: &str) -> Option<String> {
    let path = location.split("/_history").next()?;
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Creates are not idempotent; retry only when the request was not applied
fn create_is_retryable(err: &TargetError) -> bool {
    matches!(err, TargetError::Throttled(_) | TargetError::ConnectionFailed(_))
}

#[async_trait]
impl TargetStore for FhirTargetClient {
    async fn create_resource(
        &self,
        tenant: &TenantId,
        resource_type: &str,
        body: &Value,
    ) -> std::result::Result<Value, TargetError> {
        let url = format!("{}/{}", self.tenant_base_url(tenant), resource_type);
        tracing::debug!(tenant_id = %tenant, resource_type, "Creating target resource");

        self.retry
            .run("target.create", create_is_retryable, || async {
                let resp = self
                    .authorize(self.client.post(&url))
                    .header(CONTENT_TYPE, FHIR_JSON)
                    .header("Prefer", "return=representation")
                    .json(body)
                    .send()
                    .await
                    .map_err(|e| TargetError::ConnectionFailed(e.to_string()))?;
                let resp = check_status(resp, |status, text| TargetError::CreateFailed {
                    resource_type: resource_type.to_string(),
                    message: format!("{status}: {text}"),
                })
                .await?;
                resource_from_response(resp, body).await
            })
            .await
    }

    async fn read_resource(
        &self,
        tenant: &TenantId,
        resource_type: &str,
        id: &str,
    ) -> std::result::Result<Value, TargetError> {
        let url = format!("{}/{}/{}", self.tenant_base_url(tenant), resource_type, id);
        self.retry
            .run("target.read", TargetError::is_transient, || async {
                let resp = self
                    .authorize(self.client.get(&url))
                    .send()
                    .await
                    .map_err(|e| TargetError::ConnectionFailed(e.to_string()))?;
                let resp = check_status(resp, |status, text| {
                    TargetError::InvalidResponse(format!("{status}: {text}"))
                })
                .await?;
                resp.json::<Value>()
                    .await
                    .map_err(|e| TargetError::InvalidResponse(e.to_string()))
            })
            .await
    }

    async fn update_resource(
        &self,
        tenant: &TenantId,
        resource_type: &str,
        id: &str,
        body: &Value,
    ) -> std::result::Result<Value, TargetError> {
        let url = format!("{}/{}/{}", self.tenant_base_url(tenant), resource_type, id);
        tracing::debug!(tenant_id = %tenant, resource_type, id, "Updating target resource");

        self.retry
            .run("target.update", TargetError::is_transient, || async {
                let resp = self
                    .authorize(self.client.put(&url))
                    .header(CONTENT_TYPE, FHIR_JSON)
                    .header("Prefer", "return=representation")
                    .json(body)
                    .send()
                    .await
                    .map_err(|e| TargetError::ConnectionFailed(e.to_string()))?;
                let resp = check_status(resp, |status, text| TargetError::UpdateFailed {
                    resource_type: resource_type.to_string(),
                    id: id.to_string(),
                    message: format!("{status}: {text}"),
                })
                .await?;
                resource_from_response(resp, body).await
            })
            .await
    }

    async fn search_resources(
        &self,
        tenant: &TenantId,
        resource_type: &str,
        query: &[(String, String)],
    ) -> std::result::Result<Vec<Value>, TargetError> {
        let url = format!("{}/{}", self.tenant_base_url(tenant), resource_type);
        let mut page = self.search_page(&url, query).await?;
        let mut resources = Vec::new();
        let mut pages = 1;

        loop {
            resources.extend(
                bundle_resources(&page)
                    .into_iter()
                    .filter(|r| r["resourceType"].as_str() == Some(resource_type)),
            );
            match next_link(&page) {
                Some(next) if pages < MAX_SEARCH_PAGES => {
                    page = self.search_page(&next, &[]).await?;
                    pages += 1;
                }
                _ => break,
            }
        }
        Ok(resources)
    }

    async fn execute_bundle(
        &self,
        tenant: &TenantId,
        bundle: &Value,
    ) -> std::result::Result<Value, TargetError> {
        let url = self.tenant_base_url(tenant);
        let entries = bundle["entry"].as_array().map(Vec::len).unwrap_or(0);
        tracing::debug!(tenant_id = %tenant, entries, "Executing target bundle");

        self.retry
            .run("target.bundle", create_is_retryable, || async {
                let resp = self
                    .authorize(self.client.post(&url))
                    .header(CONTENT_TYPE, FHIR_JSON)
                    .json(bundle)
                    .send()
                    .await
                    .map_err(|e| TargetError::ConnectionFailed(e.to_string()))?;
                let resp = check_status(resp, |status, text| {
                    TargetError::BundleFailed(format!("{status}: {text}"))
                })
                .await?;
                resp.json::<Value>()
                    .await
                    .map_err(|e| TargetError::InvalidResponse(e.to_string()))
            })
            .await
    }
}
