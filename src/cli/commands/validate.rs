//! Validate config command implementation
//!
//! This module implements the `validate-config` command. It loads the file,
//! applies `${VAR}` substitution and `CHARTSYNC_*` overrides, validates, and
//! prints a summary. Secrets are reported only as set or missing.

use crate::config::{load_config, ChartsyncConfig};
use clap::Args;

/// Arguments for the validate-config command
#[derive(Args, Debug)]
pub struct ValidateArgs {}

impl ValidateArgs {
    /// Execute the validate-config command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!(config_path = %config_path, "Validating configuration");

        println!("🔍 Validating configuration file: {config_path}");
        println!();

        let config = match load_config(config_path) {
            Ok(c) => {
                println!("✅ Configuration file loaded successfully");
                c
            }
            Err(e) => {
                println!("❌ Failed to load configuration file");
                println!("   Error: {e}");
                return Ok(2);
            }
        };

        match config.validate() {
            Ok(_) => {
                println!("✅ Configuration is valid");
                println!();
                print_summary(&config);
                Ok(0)
            }
            Err(e) => {
                println!("❌ Configuration validation failed");
                println!("   Error: {e}");
                println!();
                Ok(2)
            }
        }
    }
}

fn print_summary(config: &ChartsyncConfig) {
    println!("Configuration Summary:");
    println!("  Environment: {:?}", config.environment);
    println!("  Log Level: {}", config.application.log_level);
    println!(
        "  Interval: {}s, window {} min",
        config.scheduler.interval_seconds, config.scheduler.window_minutes
    );
    println!(
        "  Parallelism: {} tenant(s), {} patient(s) per tenant",
        config.scheduler.max_parallel_tenants, config.scheduler.max_parallel_patients
    );
    println!("  Target Store: {}", config.target.base_url);
    println!("  Target Token: {}", set_or_missing(config.target.token.is_some()));
    println!("  Write Mode: {:?}", config.target.write_mode);
    println!("  Tag System: {}", config.target.tag_system);
    println!("  Message Bus: {}", config.events.base_url);
    println!("  Topic Prefix: {}", config.events.topic_prefix);
    match &config.sessions {
        Some(sessions) => println!("  Session Service: {}", sessions.base_url),
        None => println!("  Session Service: none (system credentials only)"),
    }
    println!("  Tenants: {}", config.tenants.len());
    for tenant in &config.tenants {
        let integration = tenant
            .ehr_integration
            .map(|kind| kind.to_string())
            .unwrap_or_else(|| "none".to_string());
        let roster = if tenant.discover_patients {
            format!("discovery (fallback {} patient(s))", tenant.patients.len())
        } else {
            format!("{} patient(s)", tenant.patients.len())
        };
        println!(
            "    - {} [{}] {}, system credential {}",
            tenant.id,
            integration,
            roster,
            set_or_missing(tenant.system_credential.is_some())
        );
    }
    println!();
}

fn set_or_missing(present: bool) -> &'static str {
    if present {
        "set"
    } else {
        "missing"
    }
}
