//! Init command implementation
//!
//! This module implements the `init` command for generating a sample
//! configuration file.

use clap::Args;
use std::fs;
use std::path::Path;

/// Arguments for the init command
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Path where to create the configuration file
    #[arg(short, long, default_value = "chartsync.toml")]
    pub output: String,

    /// Overwrite existing file
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    /// Execute the init command
    pub async fn execute(&self) -> anyhow::Result<i32> {
        tracing::info!(output = %self.output, "Initializing configuration file");

        println!("📝 Initializing chartsync configuration");
        println!();

        if Path::new(&self.output).exists() && !self.force {
            println!("❌ Configuration file already exists: {}", self.output);
            println!("   Use --force to overwrite");
            return Ok(2);
        }

        match fs::write(&self.output, Self::generate_config()) {
            Ok(_) => {
                println!("✅ Configuration file created: {}", self.output);
                println!();
                println!("Next steps:");
                println!("  1. Edit {} with your tenants and endpoints", self.output);
                println!("  2. Create a .env file with your credentials:");
                println!("     - CHARTSYNC_TARGET_TOKEN and CHARTSYNC_EVENTS_TOKEN");
                println!("     - ACME_CLIENT_SECRET for the example tenant");
                println!("  3. Validate configuration: chartsync validate-config");
                println!("  4. Run one cycle: chartsync trigger");
                println!("  5. Start the scheduler: chartsync run");
                println!();
                Ok(0)
            }
            Err(e) => {
                println!("❌ Failed to write configuration file");
                println!("   Error: {e}");
                Ok(5)
            }
        }
    }

    fn generate_config() -> String {
        r#"# chartsync configuration
#
# Values of the form ${VAR} are read from the environment (a .env file is
# loaded on start). Any setting can also be overridden with
# CHARTSYNC_<SECTION>_<KEY>, e.g. CHARTSYNC_SCHEDULER_INTERVAL_SECONDS.

environment = "development"  # development | staging | production

[application]
log_level = "info"

# ============================================================================
# Scheduler
# ============================================================================
[scheduler]
# Seconds between cycles
interval_seconds = 1800
# Trailing window of completed encounters considered each cycle
window_minutes = 60
max_parallel_tenants = 4
max_parallel_patients = 8
# Run a cycle immediately on start
run_on_start = false
# Seconds allowed to drain queued events on shutdown
shutdown_timeout_secs = 30
# Refresh a credential this many seconds before it expires
credential_refresh_skew_seconds = 60

# ============================================================================
# Source EHRs (per-tenant base URLs live in [[tenants]])
# ============================================================================
[source]
timeout_seconds = 30
tls_verify = true
page_size = 100
max_pages = 50

[source.retry]
max_retries = 3
initial_delay_ms = 500
max_delay_ms = 10000
backoff_multiplier = 2.0

# ============================================================================
# Target store
# ============================================================================
[target]
# {tenant} is replaced with the tenant id
base_url = "https://store.example.com/{tenant}/fhir"
# token is read from CHARTSYNC_TARGET_TOKEN
timeout_seconds = 30
tls_verify = true
write_mode = "sequential"  # sequential | transaction
tag_system = "original-source-id"

# ============================================================================
# Message bus
# ============================================================================
[events]
base_url = "https://bus.example.com/v1/projects/chartsync"
# token is read from CHARTSYNC_EVENTS_TOKEN
topic_prefix = "chartsync"
auto_create_topics = true
max_retries = 3
channel_capacity = 1024

# Optional: live provider sessions
# [sessions]
# base_url = "https://sessions.example.com"

[logging]
local_enabled = false
local_path = "/var/log/chartsync"
local_rotation = "daily"  # daily | hourly

# ============================================================================
# Tenants
# ============================================================================
[[tenants]]
id = "acme"
name = "Acme Health"
ehr_integration = "fhir"
source_base_url = "https://ehr.acme.example.com/fhir"
mrn_system = "urn:acme:mrn"
# Static roster; also the fallback when discovery fails
patients = ["p-1"]
discover_patients = false

[tenants.system_credential]
token_url = "https://ehr.acme.example.com/oauth2/token"
client_id = "chartsync"
client_secret = "${ACME_CLIENT_SECRET}"
scope = "system/*.read"
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("chartsync.toml");
        fs::write(&output, "# existing").unwrap();

        let args = InitArgs {
            output: output.to_string_lossy().into_owned(),
            force: false,
        };
        assert_eq!(args.execute().await.unwrap(), 2);
        assert_eq!(fs::read_to_string(&output).unwrap(), "# existing");
    }

    #[tokio::test]
    async fn test_generated_config_loads() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("chartsync.toml");
        let args = InitArgs {
            output: output.to_string_lossy().into_owned(),
            force: true,
        };
        assert_eq!(args.execute().await.unwrap(), 0);

        std::env::set_var("ACME_CLIENT_SECRET", "init-test-secret");
        let config = crate::config::load_config(&output).unwrap();
        assert_eq!(config.tenants.len(), 1);
        assert_eq!(config.scheduler.interval_seconds, 1800);
        assert_eq!(config.target.tag_system, "original-source-id");
    }
}
