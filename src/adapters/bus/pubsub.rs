//! Pub/Sub-style REST implementation of [`MessageBus`]
//!
//! Topics live at `{base_url}/topics/{name}`; publishing posts base64 `data`
//! with string `attributes` to `{topic}:publish`.

use super::{BusMessage, MessageBus};
use crate::adapters::http::build_client;
use crate::config::{EventsConfig, SecretString};
use crate::domain::{Result, SyncError};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;

/// HTTP message bus client
pub struct PubSubBus {
    client: Client,
    base_url: String,
    token: Option<SecretString>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

impl PubSubBus {
    /// Creates a client from the `[events]` configuration section
    pub fn new(config: &EventsConfig) -> Result<Self> {
        let client = build_client(config.timeout_seconds, true).map_err(SyncError::Configuration)?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    fn topic_url(&self, topic: &str) -> String {
        format!("{}/topics/{}", self.base_url, topic)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {}", token.expose_secret())),
            None => request,
        }
    }
}

fn publish_error(context: &str, err: impl std::fmt::Display) -> SyncError {
    SyncError::Publish(format!("{context}: {err}"))
}

#[async_trait]
impl MessageBus for PubSubBus {
    async fn topic_exists(&self, topic: &str) -> Result<bool> {
        let resp = self
            .authorize(self.client.get(self.topic_url(topic)))
            .send()
            .await
            .map_err(|e| publish_error("topic lookup failed", e))?;

        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(publish_error(
                &format!("topic lookup for {topic} returned {s}"),
                resp.text().await.unwrap_or_default(),
            )),
        }
    }

    async fn create_topic(&self, topic: &str) -> Result<()> {
        let resp = self
            .authorize(self.client.put(self.topic_url(topic)))
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| publish_error("topic creation failed", e))?;

        match resp.status() {
            s if s.is_success() => {
                tracing::info!(topic, "Created message bus topic");
                Ok(())
            }
            StatusCode::CONFLICT => Ok(()),
            s => Err(publish_error(
                &format!("topic creation for {topic} returned {s}"),
                resp.text().await.unwrap_or_default(),
            )),
        }
    }

    async fn publish(&self, topic: &str, message: &BusMessage) -> Result<String> {
        let body = json!({
            "messages": [{
                "data": general_purpose::STANDARD.encode(&message.data),
                "attributes": message.attributes,
            }]
        });

        let resp = self
            .authorize(self.client.post(format!("{}:publish", self.topic_url(topic))))
            .json(&body)
            .send()
            .await
            .map_err(|e| publish_error("publish failed", e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(publish_error(
                &format!("publish to {topic} returned {status}"),
                resp.text().await.unwrap_or_default(),
            ));
        }

        let parsed: PublishResponse = resp
            .json()
            .await
            .map_err(|e| publish_error("invalid publish response", e))?;
        parsed
            .message_ids
            .into_iter()
            .next()
            .ok_or_else(|| SyncError::Publish(format!("publish to {topic} returned no message id")))
    }
}
