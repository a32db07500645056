//! Shared HTTP plumbing for the REST adapters
//!
//! Every adapter builds its `reqwest` client here and retries transient
//! failures through [`RetryPolicy`], an exponential backoff with jitter.

use crate::config::RetryConfig;
use rand::Rng;
use reqwest::{Client, ClientBuilder};
use std::future::Future;
use std::time::Duration;

/// FHIR JSON media type
pub const FHIR_JSON: &str = "application/fhir+json";

/// Builds an HTTP client with the given timeout and TLS policy
pub fn build_client(timeout_seconds: u64, tls_verify: bool) -> Result<Client, String> {
    let mut builder = ClientBuilder::new()
        .timeout(Duration::from_secs(timeout_seconds))
        .connect_timeout(Duration::from_secs(timeout_seconds.min(30)));

    if !tls_verify {
        tracing::warn!("TLS certificate verification is disabled");
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder
        .build()
        .map_err(|e| format!("Failed to build HTTP client: {e}"))
}

/// Exponential backoff with jitter
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: usize,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            multiplier: 1.0,
        }
    }

    /// Delay before retry number `attempt` (1-based), jitter up to half the base delay
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let exp = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let base = ((self.initial_delay_ms as f64) * exp) as u64;
        let base = base.min(self.max_delay_ms);
        let jitter = if base > 1 {
            rand::thread_rng().gen_range(0..=base / 2)
        } else {
            0
        };
        Duration::from_millis(base.saturating_add(jitter).min(self.max_delay_ms.max(base)))
    }

    /// Runs `operation` until it succeeds, fails permanently, or attempts run out
    ///
    /// Only errors for which `is_transient` returns `true` are retried.
    pub async fn run<T, E, F, Fut, P>(&self, label: &str, is_transient: P, operation: F) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_attempts || !is_transient(&e) {
                        return Err(e);
                    }

                    let delay = self.delay_for(attempt);
                    crate::log_retry_attempt!(label, attempt, max_attempts, delay, e);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_retries,
            initial_delay_ms: config.initial_delay_ms,
            max_delay_ms: config.max_delay_ms,
            multiplier: config.backoff_multiplier,
        }
    }
}

/// Extracts the `next` link of a FHIR searchset Bundle
pub fn next_link(bundle: &serde_json::Value) -> Option<String> {
    bundle["link"]
        .as_array()?
        .iter()
        .find(|l| l["relation"].as_str() == Some("next"))
        .and_then(|l| l["url"].as_str())
        .map(str::to_string)
}

/// Resources of a searchset Bundle, excluding `OperationOutcome` entries
pub fn bundle_resources(bundle: &serde_json::Value) -> Vec<serde_json::Value> {
    bundle["entry"]
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter(|e| e["search"]["mode"].as_str() != Some("outcome"))
                .filter_map(|e| e.get("resource").cloned())
                .filter(|r| r["resourceType"].as_str() != Some("OperationOutcome"))
                .collect()
        })
        .unwrap_or_default()
}
