//! Run command implementation
//!
//! Starts the periodic scheduler and keeps cycling until SIGINT or SIGTERM.
//! SIGUSR1 runs a manual cycle inside the running process. A cycle in
//! progress finishes before the process exits; queued events are then
//! drained within `scheduler.shutdown_timeout_secs`.

use crate::config::load_config;
use crate::core::pipeline::Pipeline;
use crate::domain::TenantId;
use clap::Args;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Arguments for the run command
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Run one cycle immediately instead of waiting for the first interval
    #[arg(long)]
    pub now: bool,
}

impl RunArgs {
    /// Execute the run command
    pub async fn execute(
        &self,
        config_path: &str,
        shutdown_signal: watch::Receiver<bool>,
    ) -> anyhow::Result<i32> {
        tracing::info!("Starting run command");

        let mut config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                crate::log_error_with_context!(e, "Failed to load configuration");
                eprintln!("Configuration error: {e}");
                return Ok(2);
            }
        };
        if self.now {
            config.scheduler.run_on_start = true;
        }
        let shutdown_timeout = Duration::from_secs(config.scheduler.shutdown_timeout_secs);

        let pipeline = match Pipeline::from_config(&config) {
            Ok(p) => p,
            Err(e) => {
                crate::log_error_with_context!(e, "Failed to build sync pipeline");
                eprintln!("Failed to initialize: {e}");
                return Ok(5);
            }
        };

        println!(
            "🚀 Scheduler running every {}s over {} tenant(s). Press Ctrl+C to stop.",
            config.scheduler.interval_seconds,
            config.tenants.len()
        );

        let (requests, inbox) = mpsc::channel(1);
        forward_trigger_signals(requests);

        let scheduler = pipeline.scheduler();
        let (cycles, manual) = tokio::join!(
            scheduler.run_periodic(shutdown_signal.clone()),
            scheduler.serve_triggers(inbox, shutdown_signal),
        );

        if tokio::time::timeout(shutdown_timeout, pipeline.shutdown())
            .await
            .is_err()
        {
            tracing::warn!(
                timeout_secs = shutdown_timeout.as_secs(),
                "Timed out draining queued events"
            );
        }

        let stats = pipeline.publisher().stats();
        println!();
        println!("📊 Scheduler stopped after {cycles} cycle(s), {manual} manual");
        println!("  Events published: {}", stats.published);
        println!("  Events failed: {}", stats.failed);
        println!();

        Ok(0)
    }
}

/// Queues a manual cycle over every tenant on each SIGUSR1
///
/// At most one request waits behind a running manual cycle; further signals
/// are dropped until it starts.
fn forward_trigger_signals(requests: mpsc::Sender<Option<TenantId>>) {
    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigusr1 = match signal(SignalKind::user_defined1()) {
            Ok(s) => s,
            Err(e) => {
                crate::log_error_with_context!(e, "Failed to create SIGUSR1 handler");
                return;
            }
        };
        while sigusr1.recv().await.is_some() {
            match requests.try_send(None) {
                Ok(()) => tracing::info!("Received SIGUSR1, queueing manual cycle"),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!("Manual cycle already queued, ignoring SIGUSR1")
                }
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            }
        }
    });

    #[cfg(not(unix))]
    drop(requests);
}
