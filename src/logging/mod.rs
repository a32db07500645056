//! Logging and observability
//!
//! Structured logging with:
//! - Console output
//! - JSON-formatted file logs with rotation
//! - Configurable log levels
//!
//! Secrets never reach a log line: tokens and client secrets are held in
//! [`SecretString`](crate::config::SecretString), whose `Debug` output is redacted.
//!
//! # Example
//!
//! ```no_run
//! use chartsync::logging::init_logging;
//! use chartsync::config::LoggingConfig;
//!
//! let config = LoggingConfig::default();
//! let _guard = init_logging("info", &config).expect("Failed to initialize logging");
//!
//! tracing::info!("Application started");
//! ```

pub mod structured;

pub use structured::{init_logging, LoggingGuard};

/// Log the outcome of one (tenant, patient, encounter) unit
///
/// # Example
///
/// ```no_run
/// use chartsync::log_unit_outcome;
/// use chartsync::domain::{PatientId, SourceId, TenantId};
///
/// let tenant = TenantId::new("acme").unwrap();
/// let patient = PatientId::new("p-1").unwrap();
/// let encounter = SourceId::new("enc-77").unwrap();
/// log_unit_outcome!(&tenant, &patient, &encounter, "synced");
/// ```
#[macro_export]
macro_rules! log_unit_outcome {
    ($tenant_id:expr, $patient_id:expr, $encounter_id:expr, $outcome:expr) => {
        tracing::info!(
            tenant_id = %$tenant_id,
            patient_id = %$patient_id,
            source_encounter_id = %$encounter_id,
            outcome = $outcome,
            "Encounter unit finished"
        );
    };
}

/// Log an error with context
///
/// # Example
///
/// ```no_run
/// use chartsync::log_error_with_context;
/// use chartsync::domain::SyncError;
///
/// let error = SyncError::Configuration("Invalid config".to_string());
/// log_error_with_context!(&error, "Failed to load configuration");
/// ```
#[macro_export]
macro_rules! log_error_with_context {
    ($error:expr, $context:expr) => {
        tracing::error!(
            error = %$error,
            context = $context,
            "Error occurred"
        );
    };
}

/// Log a retry attempt of a named operation
///
/// # Example
///
/// ```no_run
/// use chartsync::log_retry_attempt;
/// use std::time::Duration;
///
/// log_retry_attempt!("target create Encounter", 2, 3, Duration::from_millis(400), "Connection timeout");
/// ```
#[macro_export]
macro_rules! log_retry_attempt {
    ($operation:expr, $attempt:expr, $max_attempts:expr, $delay:expr, $reason:expr) => {
        tracing::warn!(
            operation = $operation,
            attempt = $attempt,
            max_attempts = $max_attempts,
            delay_ms = $delay.as_millis() as u64,
            reason = %$reason,
            "Retrying operation"
        );
    };
}
