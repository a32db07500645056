//! Configuration schema types
//!
//! This module defines the configuration structure for chartsync. The TOML
//! file maps directly onto [`ChartsyncConfig`].

use crate::config::SecretString;
use crate::domain::{
    EhrIntegrationKind, PatientId, PatientRoster, SystemCredential, Tenant, TenantId,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

/// Runtime environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Development environment
    #[default]
    Development,
    /// Staging environment
    Staging,
    /// Production environment
    Production,
}

/// Main chartsync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartsyncConfig {
    /// Application-level settings
    #[serde(default)]
    pub application: ApplicationConfig,

    /// Runtime environment (development, staging, production)
    #[serde(default)]
    pub environment: Environment,

    /// Periodic driver settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Source EHR HTTP settings shared by all tenants
    #[serde(default)]
    pub source: SourceConfig,

    /// Target clinical-data store
    pub target: TargetConfig,

    /// Message bus for outcome events
    pub events: EventsConfig,

    /// Session collaborator (provider sessions); absent means none are ever active
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sessions: Option<SessionsConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Tenant records
    #[serde(default)]
    pub tenants: Vec<TenantConfig>,
}

impl ChartsyncConfig {
    /// Validates the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid
    pub fn validate(&self) -> Result<(), String> {
        self.application.validate()?;
        self.scheduler.validate()?;
        self.source.validate(&self.environment)?;
        self.target.validate(&self.environment)?;
        self.events.validate()?;
        if let Some(sessions) = &self.sessions {
            sessions.validate()?;
        }
        self.logging.validate()?;

        let mut seen = HashSet::new();
        for tenant in &self.tenants {
            tenant.validate()?;
            if !seen.insert(tenant.id.trim()) {
                return Err(format!("Duplicate tenant id '{}'", tenant.id));
            }
        }
        Ok(())
    }
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl ApplicationConfig {
    fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            ));
        }
        Ok(())
    }
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts (1 = no retry)
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Initial delay in milliseconds
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Maximum delay in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Backoff multiplier
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    fn validate(&self, section: &str) -> Result<(), String> {
        if self.max_retries == 0 || self.max_retries > 10 {
            return Err(format!(
                "{section}.retry.max_retries must be between 1 and 10, got {}",
                self.max_retries
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(format!(
                "{section}.retry.backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            ));
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

/// Upper bound of `scheduler.window_minutes` (31 days)
pub const MAX_WINDOW_MINUTES: i64 = 31 * 24 * 60;

/// Upper bound of `scheduler.credential_refresh_skew_seconds` (one day)
pub const MAX_REFRESH_SKEW_SECONDS: i64 = 24 * 60 * 60;

/// Periodic driver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between cycle starts
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,

    /// Trailing window for candidate encounters, in minutes
    ///
    /// Should cover the interval plus slack so no encounter falls between ticks.
    #[serde(default = "default_window_minutes")]
    pub window_minutes: i64,

    /// Maximum tenants processed concurrently
    #[serde(default = "default_max_parallel_tenants")]
    pub max_parallel_tenants: usize,

    /// Maximum patients processed concurrently within one tenant
    #[serde(default = "default_max_parallel_patients")]
    pub max_parallel_patients: usize,

    /// Run a cycle immediately on start instead of waiting one interval
    #[serde(default = "default_true")]
    pub run_on_start: bool,

    /// Seconds to wait for an in-flight cycle on shutdown
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Re-resolve credentials this many seconds before they expire
    #[serde(default = "default_credential_refresh_skew_seconds")]
    pub credential_refresh_skew_seconds: i64,
}

impl SchedulerConfig {
    /// Trailing window for candidate encounters
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.window_minutes.clamp(1, MAX_WINDOW_MINUTES))
    }

    /// Margin before expiry at which credentials are re-resolved
    pub fn credential_refresh_skew(&self) -> chrono::Duration {
        chrono::Duration::seconds(
            self.credential_refresh_skew_seconds
                .clamp(0, MAX_REFRESH_SKEW_SECONDS),
        )
    }

    fn validate(&self) -> Result<(), String> {
        if self.interval_seconds == 0 {
            return Err("scheduler.interval_seconds must be > 0".to_string());
        }
        if !(1..=MAX_WINDOW_MINUTES).contains(&self.window_minutes) {
            return Err(format!(
                "scheduler.window_minutes must be between 1 and {MAX_WINDOW_MINUTES}, got {}",
                self.window_minutes
            ));
        }
        let window_seconds = (self.window_minutes as u64).checked_mul(60).unwrap_or(u64::MAX);
        if window_seconds < self.interval_seconds {
            return Err(format!(
                "scheduler.window_minutes ({}) must cover scheduler.interval_seconds ({})",
                self.window_minutes, self.interval_seconds
            ));
        }
        if !(1..=64).contains(&self.max_parallel_tenants) {
            return Err(format!(
                "scheduler.max_parallel_tenants must be between 1 and 64, got {}",
                self.max_parallel_tenants
            ));
        }
        if !(1..=32).contains(&self.max_parallel_patients) {
            return Err(format!(
                "scheduler.max_parallel_patients must be between 1 and 32, got {}",
                self.max_parallel_patients
            ));
        }
        if !(0..=MAX_REFRESH_SKEW_SECONDS).contains(&self.credential_refresh_skew_seconds) {
            return Err(format!(
                "scheduler.credential_refresh_skew_seconds must be between 0 and {MAX_REFRESH_SKEW_SECONDS}, got {}",
                self.credential_refresh_skew_seconds
            ));
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            window_minutes: default_window_minutes(),
            max_parallel_tenants: default_max_parallel_tenants(),
            max_parallel_patients: default_max_parallel_patients(),
            run_on_start: true,
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            credential_refresh_skew_seconds: default_credential_refresh_skew_seconds(),
        }
    }
}

/// Source EHR HTTP settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Request timeout in seconds
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// TLS certificate verification
    ///
    /// Cannot be disabled in production.
    #[serde(default = "default_true")]
    pub tls_verify: bool,

    /// `_count` requested on searches
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Maximum pages followed per search
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Retry configuration
    #[serde(default)]
    pub retry: RetryConfig,
}

impl SourceConfig {
    fn validate(&self, environment: &Environment) -> Result<(), String> {
        if *environment == Environment::Production && !self.tls_verify {
            return Err(
                "TLS certificate verification cannot be disabled in production environments (source.tls_verify)"
                    .to_string(),
            );
        }
        if !(1..=1000).contains(&self.page_size) {
            return Err(format!(
                "source.page_size must be between 1 and 1000, got {}",
                self.page_size
            ));
        }
        if self.max_pages == 0 {
            return Err("source.max_pages must be > 0".to_string());
        }
        self.retry.validate("source")
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            tls_verify: true,
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            retry: RetryConfig::default(),
        }
    }
}

/// How composite members reach the target store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// One request per member, in plan order
    #[default]
    Sequential,
    /// All members except the linking resource in one transaction bundle
    Transaction,
}

/// Target clinical-data store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// FHIR base URL; `{tenant}` is replaced with the tenant id
    pub base_url: String,

    /// Bearer token for the target store
    #[serde(default)]
    pub token: Option<SecretString>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// TLS certificate verification
    #[serde(default = "default_true")]
    pub tls_verify: bool,

    /// Composite write mode
    #[serde(default)]
    pub write_mode: WriteMode,

    /// `meta.tag` system of the Mirrored-Record Tag
    #[serde(default = "default_tag_system")]
    pub tag_system: String,

    /// Retry configuration
    #[serde(default)]
    pub retry: RetryConfig,
}

impl TargetConfig {
    fn validate(&self, environment: &Environment) -> Result<(), String> {
        validate_url("target.base_url", &self.base_url)?;
        if *environment == Environment::Production && !self.tls_verify {
            return Err(
                "TLS certificate verification cannot be disabled in production environments (target.tls_verify)"
                    .to_string(),
            );
        }
        if self.tag_system.trim().is_empty() {
            return Err("target.tag_system cannot be empty".to_string());
        }
        self.retry.validate("target")
    }
}

/// Message bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Bus REST base URL (project-scoped)
    pub base_url: String,

    /// Bearer token for the bus
    #[serde(default)]
    pub token: Option<SecretString>,

    /// Prefix of per-tenant topics (`{prefix}-{tenant}`)
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    /// Create a tenant topic on first publish if it does not exist
    #[serde(default = "default_true")]
    pub auto_create_topics: bool,

    /// Publish attempts per event
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Capacity of the in-process event queue
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl EventsConfig {
    fn validate(&self) -> Result<(), String> {
        validate_url("events.base_url", &self.base_url)?;
        if self.max_retries == 0 || self.max_retries > 10 {
            return Err(format!(
                "events.max_retries must be between 1 and 10, got {}",
                self.max_retries
            ));
        }
        if self.channel_capacity == 0 {
            return Err("events.channel_capacity must be > 0".to_string());
        }
        Ok(())
    }
}

/// Session collaborator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Base URL of the session service
    pub base_url: String,

    /// Bearer token for the session service
    #[serde(default)]
    pub token: Option<SecretString>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl SessionsConfig {
    fn validate(&self) -> Result<(), String> {
        validate_url("sessions.base_url", &self.base_url)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Enable local file logging
    #[serde(default)]
    pub local_enabled: bool,

    /// Local log file directory
    #[serde(default = "default_local_path")]
    pub local_path: String,

    /// Log rotation strategy (daily or hourly)
    #[serde(default = "default_local_rotation")]
    pub local_rotation: String,
}

impl LoggingConfig {
    fn validate(&self) -> Result<(), String> {
        let valid_rotations = ["daily", "hourly"];
        if !valid_rotations.contains(&self.local_rotation.as_str()) {
            return Err(format!(
                "Invalid logging.local_rotation '{}'. Must be one of: {}",
                self.local_rotation,
                valid_rotations.join(", ")
            ));
        }
        if self.local_enabled && self.local_path.trim().is_empty() {
            return Err("logging.local_path cannot be empty when local logging is enabled".to_string());
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            local_enabled: false,
            local_path: default_local_path(),
            local_rotation: default_local_rotation(),
        }
    }
}

/// System credential block of a tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemCredentialConfig {
    /// OAuth2 token endpoint
    pub token_url: String,

    /// OAuth2 client id
    pub client_id: String,

    /// OAuth2 client secret
    pub client_secret: SecretString,

    /// Requested scope
    #[serde(default)]
    pub scope: Option<String>,
}

/// One `[[tenants]]` record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Tenant id
    pub id: String,

    /// Display name
    #[serde(default)]
    pub name: Option<String>,

    /// EHR integration; omit to keep the tenant configured but skipped
    #[serde(default)]
    pub ehr_integration: Option<EhrIntegrationKind>,

    /// Source EHR FHIR base URL
    #[serde(default)]
    pub source_base_url: String,

    /// Identifier system of the medical record number
    #[serde(default = "default_mrn_system")]
    pub mrn_system: String,

    /// Topic override
    #[serde(default)]
    pub topic: Option<String>,

    /// Static roster (also the discovery fallback)
    #[serde(default)]
    pub patients: Vec<String>,

    /// Discover patients from the source EHR
    #[serde(default)]
    pub discover_patients: bool,

    /// Unattended credential
    #[serde(default)]
    pub system_credential: Option<SystemCredentialConfig>,
}

impl TenantConfig {
    fn validate(&self) -> Result<(), String> {
        use secrecy::ExposeSecret;

        TenantId::from_str(&self.id).map_err(|e| format!("tenants: {e}"))?;
        if self.ehr_integration.is_some() {
            validate_url(&format!("tenants[{}].source_base_url", self.id), &self.source_base_url)?;
        }
        if let Some(cred) = &self.system_credential {
            validate_url(&format!("tenants[{}].system_credential.token_url", self.id), &cred.token_url)?;
            if cred.client_id.trim().is_empty() {
                return Err(format!("tenants[{}].system_credential.client_id cannot be empty", self.id));
            }
            if cred.client_secret.expose_secret().is_empty() {
                return Err(format!(
                    "tenants[{}].system_credential.client_secret cannot be empty",
                    self.id
                ));
            }
        }
        for patient in &self.patients {
            PatientId::from_str(patient).map_err(|e| format!("tenants[{}].patients: {e}", self.id))?;
        }
        Ok(())
    }

    /// Converts the record into the domain [`Tenant`]
    pub fn to_tenant(&self) -> Result<Tenant, String> {
        let id = TenantId::from_str(&self.id)?;
        let patients = self
            .patients
            .iter()
            .map(|p| PatientId::from_str(p))
            .collect::<Result<Vec<_>, _>>()?;
        let roster = if self.discover_patients {
            PatientRoster::discoverable(patients)
        } else {
            PatientRoster::fixed(patients)
        };

        Ok(Tenant {
            name: self.name.clone().unwrap_or_else(|| id.to_string()),
            id,
            integration: self.ehr_integration,
            source_base_url: self.source_base_url.trim_end_matches('/').to_string(),
            mrn_system: self.mrn_system.clone(),
            system_credential: self.system_credential.as_ref().map(|c| SystemCredential {
                token_url: c.token_url.clone(),
                client_id: c.client_id.clone(),
                client_secret: c.client_secret.clone(),
                scope: c.scope.clone(),
            }),
            topic: self.topic.clone(),
            roster,
        })
    }
}

fn validate_url(field: &str, value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("{field} cannot be empty"));
    }
    if !value.starts_with("http://") && !value.starts_with("https://") {
        return Err(format!("{field} must start with http:// or https://"));
    }
    url::Url::parse(&value.replace("{tenant}", "tenant"))
        .map_err(|e| format!("{field} is not a valid URL: {e}"))?;
    Ok(())
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_max_retries() -> usize {
    3
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_interval_seconds() -> u64 {
    1800
}

fn default_window_minutes() -> i64 {
    60
}

fn default_max_parallel_tenants() -> usize {
    4
}

fn default_max_parallel_patients() -> usize {
    1
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn default_credential_refresh_skew_seconds() -> i64 {
    60
}

fn default_page_size() -> usize {
    100
}

fn default_max_pages() -> usize {
    20
}

fn default_tag_system() -> String {
    "original-source-id".to_string()
}

fn default_topic_prefix() -> String {
    "chartsync".to_string()
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_local_path() -> String {
    "/var/log/chartsync".to_string()
}

fn default_local_rotation() -> String {
    "daily".to_string()
}

fn default_mrn_system() -> String {
    "urn:oid:2.16.840.1.113883.4.1".to_string()
}
