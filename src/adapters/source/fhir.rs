//! FHIR R4 REST implementation of [`SourceEhr`]

use super::SourceEhr;
use crate::adapters::http::{build_client, bundle_resources, next_link, RetryPolicy, FHIR_JSON};
use crate::config::SourceConfig;
use crate::domain::{AuthContext, BinaryContent, Result, SourceError, SourceId, SyncError, Tenant};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;

/// HTTP client for tenant FHIR endpoints
///
/// One instance serves every tenant; the base URL comes from the [`Tenant`]
/// and the bearer token from the [`AuthContext`] of each call.
pub struct FhirSourceClient {
    client: Client,
    retry: RetryPolicy,
    page_size: usize,
    max_pages: usize,
}

impl FhirSourceClient {
    /// Creates a client from the `[source]` configuration section
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let client =
            build_client(config.timeout_seconds, config.tls_verify).map_err(SyncError::Configuration)?;
        Ok(Self {
            client,
            retry: RetryPolicy::from(&config.retry),
            page_size: config.page_size,
            max_pages: config.max_pages,
        })
    }

    async fn get_json(&self, url: &str, auth: &AuthContext, query: &[(String, String)]) -> std::result::Result<Value, SourceError> {
        self.retry
            .run("source.get", SourceError::is_transient, || async {
                let resp = self
                    .client
                    .get(url)
                    .query(query)
                    .header(AUTHORIZATION, auth.bearer())
                    .header(ACCEPT, FHIR_JSON)
                    .send()
                    .await
                    .map_err(|e| SourceError::ConnectionFailed(e.to_string()))?;

                let resp = check_status(resp, url).await?;
                resp.json::<Value>()
                    .await
                    .map_err(|e| SourceError::InvalidResponse(e.to_string()))
            })
            .await
    }
}

async fn check_status(resp: Response, url: &str) -> std::result::Result<Response, SourceError> {
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
            SourceError::Unauthorized(format!("{status} for {url}"))
        }
        StatusCode::NOT_FOUND => SourceError::NotFound(url.to_string()),
        StatusCode::TOO_MANY_REQUESTS => SourceError::RateLimited(retry_after),
        s if s.is_server_error() => SourceError::ServerError {
            status: s.as_u16(),
            message: body,
        },
        s => SourceError::ClientError {
            status: s.as_u16(),
            message: body,
        },
    })
}

#[async_trait]
impl SourceEhr for FhirSourceClient {
    async fn read_resource(
        &self,
        tenant: &Tenant,
        auth: &AuthContext,
        resource_type: &str,
        id: &str,
    ) -> std::result::Result<Value, SourceError> {
        let url = format!("{}/{}/{}", tenant.source_base_url, resource_type, id);
        tracing::debug!(tenant_id = %tenant.id, resource_type, id, "Reading source resource");
        self.get_json(&url, auth, &[]).await
    }

    async fn search_resources(
        &self,
        tenant: &Tenant,
        auth: &AuthContext,
        resource_type: &str,
        query: &[(String, String)],
    ) -> std::result::Result<Vec<Value>, SourceError> {
        let first_url = format!("{}/{}", tenant.source_base_url, resource_type);
        let mut params = query.to_vec();
        params.push(("_count".to_string(), self.page_size.to_string()));

        let mut resources = Vec::new();
        let mut page = self.get_json(&first_url, auth, &params).await?;
        let mut pages = 1;

        loop {
            resources.extend(
                bundle_resources(&page)
                    .into_iter()
                    .filter(|r| r["resourceType"].as_str() == Some(resource_type)),
            );

            let Some(next) = next_link(&page) else { break };
            if pages >= self.max_pages {
                tracing::warn!(
                    tenant_id = %tenant.id,
                    resource_type,
                    max_pages = self.max_pages,
                    "Search result truncated at page limit"
                );
                break;
            }
            page = self.get_json(&next, auth, &[]).await?;
            pages += 1;
        }

        tracing::debug!(
            tenant_id = %tenant.id,
            resource_type,
            count = resources.len(),
            pages,
            "Source search completed"
        );
        Ok(resources)
    }

    async fn fetch_binary(
        &self,
        tenant: &Tenant,
        auth: &AuthContext,
        id: &SourceId,
        content_type: Option<&str>,
    ) -> std::result::Result<BinaryContent, SourceError> {
        let url = format!("{}/Binary/{}", tenant.source_base_url, id);
        let accept = content_type.unwrap_or(FHIR_JSON);

        self.retry
            .run("source.binary", SourceError::is_transient, || async {
                let resp = self
                    .client
                    .get(&url)
                    .header(AUTHORIZATION, auth.bearer())
                    .header(ACCEPT, accept)
                    .send()
                    .await
                    .map_err(|e| SourceError::ConnectionFailed(e.to_string()))?;
                let resp = check_status(resp, &url).await?;

                let returned_type = resp
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
                    .unwrap_or_else(|| accept.to_string());
                let bytes = resp
                    .bytes()
                    .await
                    .map_err(|e| SourceError::InvalidResponse(e.to_string()))?;

                if returned_type.contains("json") {
                    decode_binary_resource(id, &bytes)
                } else {
                    Ok(BinaryContent {
                        source_id: id.clone(),
                        content_type: returned_type,
                        data: bytes.to_vec(),
                    })
                }
            })
            .await
    }
}

/// Decodes a FHIR `Binary` resource (`contentType` + base64 `data`)
fn decode_binary_resource(id: &SourceId, bytes: &[u8]) -> std::result::Result<BinaryContent, SourceError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| SourceError::InvalidResponse(e.to_string()))?;
    if value["resourceType"].as_str() != Some("Binary") {
        return Err(SourceError::InvalidResponse(format!(
            "Expected Binary resource for {id}"
        )));
    }
    let data = match value["data"].as_str() {
        Some(encoded) => general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| SourceError::InvalidResponse(format!("Invalid base64 in Binary/{id}: {e}")))?,
        None => Vec::new(),
    };
    Ok(BinaryContent {
        source_id: id.clone(),
        content_type: value["contentType"]
            .as_str()
            .unwrap_or("application/octet-stream")
            .to_string(),
        data,
    })
}
