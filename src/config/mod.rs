//! Configuration management for chartsync.
//!
//! This module provides TOML-based configuration loading, parsing, and validation.
//!
//! # Overview
//!
//! chartsync uses TOML configuration files with support for:
//! - Environment variable substitution (`${VAR_NAME}`)
//! - `CHARTSYNC_<SECTION>_<KEY>` overrides
//! - Default values for optional settings
//! - Validation on load
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use chartsync::config::load_config;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("chartsync.toml")?;
//!
//! println!("Target store: {}", config.target.base_url);
//! println!("Tenants: {}", config.tenants.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration Structure
//!
//! - [`ApplicationConfig`] - Application settings (log level)
//! - [`SchedulerConfig`] - Cycle interval, window and parallelism bounds
//! - [`SourceConfig`] - Source EHR HTTP settings
//! - [`TargetConfig`] - Target store connection and write mode
//! - [`EventsConfig`] - Message bus connection and topics
//! - [`SessionsConfig`] - Provider session collaborator
//! - [`LoggingConfig`] - Logging configuration
//! - [`TenantConfig`] - One `[[tenants]]` record
//!
//! # Example Configuration
//!
//! ```toml
//! [scheduler]
//! interval_seconds = 1800
//! window_minutes = 60
//!
//! [target]
//! base_url = "https://fhir.example.org/{tenant}"
//! token = "${CHARTSYNC_TARGET_TOKEN}"
//!
//! [events]
//! base_url = "https://pubsub.googleapis.com/v1/projects/clinical"
//!
//! [[tenants]]
//! id = "acme"
//! ehr_integration = "fhir"
//! source_base_url = "https://ehr.acme.org/fhir/r4"
//! patients = ["p-1001"]
//!
//! [tenants.system_credential]
//! token_url = "https://ehr.acme.org/oauth2/token"
//! client_id = "chartsync"
//! client_secret = "${ACME_CLIENT_SECRET}"
//! ```

pub mod loader;
pub mod schema;
pub mod secret;

pub use loader::load_config;
pub use schema::{
    ApplicationConfig, ChartsyncConfig, Environment, EventsConfig, LoggingConfig, RetryConfig,
    SchedulerConfig, SessionsConfig, SourceConfig, SystemCredentialConfig, TargetConfig,
    TenantConfig, WriteMode,
};
pub use secret::{secret_string, secret_string_opt, SecretString, SecretValue};
