//! Trigger command implementation
//!
//! Runs a single cycle, for every tenant or only `--tenant`, prints the
//! trigger response as JSON and exits.
//!
//! This builds its own pipeline and does not coordinate with a running
//! `chartsync run`; send that process SIGUSR1 to trigger a cycle inside it.

use crate::config::load_config;
use crate::core::pipeline::Pipeline;
use crate::domain::TenantId;
use clap::Args;
use std::str::FromStr;
use std::time::Duration;

/// Arguments for the trigger command
#[derive(Args, Debug)]
pub struct TriggerArgs {
    /// Limit the cycle to one tenant
    #[arg(short, long)]
    pub tenant: Option<String>,
}

impl TriggerArgs {
    /// Execute the trigger command
    ///
    /// Exit code 0 when the cycle had no failures, 1 otherwise.
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                crate::log_error_with_context!(e, "Failed to load configuration");
                eprintln!("Configuration error: {e}");
                return Ok(2);
            }
        };

        let tenant = match self.tenant.as_deref().map(TenantId::from_str).transpose() {
            Ok(t) => t,
            Err(e) => {
                eprintln!("Invalid tenant id: {e}");
                return Ok(2);
            }
        };

        let pipeline = match Pipeline::from_config(&config) {
            Ok(p) => p,
            Err(e) => {
                crate::log_error_with_context!(e, "Failed to build sync pipeline");
                eprintln!("Failed to initialize: {e}");
                return Ok(5);
            }
        };

        let response = pipeline.scheduler().trigger(tenant).await;

        let shutdown_timeout = Duration::from_secs(config.scheduler.shutdown_timeout_secs);
        if tokio::time::timeout(shutdown_timeout, pipeline.shutdown())
            .await
            .is_err()
        {
            tracing::warn!(
                timeout_secs = shutdown_timeout.as_secs(),
                "Timed out draining queued events"
            );
        }

        println!("{}", serde_json::to_string_pretty(&response)?);
        Ok(if response.success { 0 } else { 1 })
    }
}
