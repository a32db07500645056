//! Configuration loader with TOML parsing and environment variable overrides

use super::schema::{ChartsyncConfig, WriteMode};
use super::secret::secret_string;
use crate::domain::errors::SyncError;
use crate::domain::result::Result;
use regex::Regex;
use std::fs;
use std::path::Path;

/// Loads configuration from a TOML file
///
/// This function:
/// 1. Reads the TOML file
/// 2. Performs environment variable substitution (`${VAR}` syntax)
/// 3. Parses the TOML into [`ChartsyncConfig`]
/// 4. Applies environment variable overrides (`CHARTSYNC_*` prefix)
/// 5. Validates the configuration
///
/// # Errors
///
/// Returns [`SyncError::Configuration`] if the file cannot be read or parsed,
/// a referenced variable is unset, or validation fails.
///
/// # Examples
///
/// ```no_run
/// use chartsync::config::loader::load_config;
///
/// let config = load_config("chartsync.toml").expect("Failed to load config");
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<ChartsyncConfig> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(SyncError::Configuration(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    let contents = fs::read_to_string(path).map_err(|e| {
        SyncError::Configuration(format!(
            "Failed to read configuration file {}: {}",
            path.display(),
            e
        ))
    })?;

    let contents = substitute_env_vars(&contents)?;

    let mut config: ChartsyncConfig = toml::from_str(&contents)
        .map_err(|e| SyncError::Configuration(format!("Failed to parse TOML: {e}")))?;

    apply_env_overrides(&mut config)?;

    config.validate().map_err(|e| {
        SyncError::Configuration(format!("Configuration validation failed: {e}"))
    })?;

    Ok(config)
}

/// Substitutes environment variables in the format `${VAR_NAME}`
///
/// Comment lines are left untouched.
///
/// # Errors
///
/// Returns an error listing every referenced variable that is not set
fn substitute_env_vars(input: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")
        .map_err(|e| SyncError::Configuration(format!("Invalid substitution pattern: {e}")))?;
    let mut result = String::with_capacity(input.len());
    let mut missing_vars: Vec<String> = Vec::new();

    for line in input.lines() {
        if line.trim_start().starts_with('#') {
            result.push_str(line);
            result.push('\n');
            continue;
        }

        let mut processed_line = line.to_string();
        for cap in re.captures_iter(line) {
            let var_name = &cap[1];
            match std::env::var(var_name) {
                Ok(value) => {
                    processed_line = processed_line.replace(&format!("${{{var_name}}}"), &value);
                }
                Err(_) => {
                    if !missing_vars.iter().any(|v| v == var_name) {
                        missing_vars.push(var_name.to_string());
                    }
                }
            }
        }
        result.push_str(&processed_line);
        result.push('\n');
    }

    if !missing_vars.is_empty() {
        return Err(SyncError::Configuration(format!(
            "Missing required environment variables: {}",
            missing_vars.join(", ")
        )));
    }

    Ok(result)
}

fn parse_override<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| SyncError::Configuration(format!("Invalid value for {name}: '{raw}'")))
}

/// Applies environment variable overrides using the `CHARTSYNC_*` prefix
///
/// Variables follow the pattern `CHARTSYNC_<SECTION>_<KEY>`, for example
/// `CHARTSYNC_SCHEDULER_INTERVAL_SECONDS` or `CHARTSYNC_TARGET_TOKEN`.
fn apply_env_overrides(config: &mut ChartsyncConfig) -> Result<()> {
    let var = |name: &str| std::env::var(name).ok();

    // Application overrides
    if let Some(val) = var("CHARTSYNC_APPLICATION_LOG_LEVEL") {
        config.application.log_level = val;
    }
    if let Some(val) = var("CHARTSYNC_ENVIRONMENT") {
        config.environment = toml::Value::String(val.to_lowercase())
            .try_into()
            .map_err(|e| SyncError::Configuration(format!("Invalid CHARTSYNC_ENVIRONMENT: {e}")))?;
    }

    // Scheduler overrides
    if let Some(val) = var("CHARTSYNC_SCHEDULER_INTERVAL_SECONDS") {
        config.scheduler.interval_seconds =
            parse_override("CHARTSYNC_SCHEDULER_INTERVAL_SECONDS", &val)?;
    }
    if let Some(val) = var("CHARTSYNC_SCHEDULER_WINDOW_MINUTES") {
        config.scheduler.window_minutes = parse_override("CHARTSYNC_SCHEDULER_WINDOW_MINUTES", &val)?;
    }
    if let Some(val) = var("CHARTSYNC_SCHEDULER_MAX_PARALLEL_TENANTS") {
        config.scheduler.max_parallel_tenants =
            parse_override("CHARTSYNC_SCHEDULER_MAX_PARALLEL_TENANTS", &val)?;
    }
    if let Some(val) = var("CHARTSYNC_SCHEDULER_MAX_PARALLEL_PATIENTS") {
        config.scheduler.max_parallel_patients =
            parse_override("CHARTSYNC_SCHEDULER_MAX_PARALLEL_PATIENTS", &val)?;
    }
    if let Some(val) = var("CHARTSYNC_SCHEDULER_RUN_ON_START") {
        config.scheduler.run_on_start = val.parse().unwrap_or(true);
    }

    // Source overrides
    if let Some(val) = var("CHARTSYNC_SOURCE_TLS_VERIFY") {
        config.source.tls_verify = val.parse().unwrap_or(true);
    }
    if let Some(val) = var("CHARTSYNC_SOURCE_TIMEOUT_SECONDS") {
        config.source.timeout_seconds = parse_override("CHARTSYNC_SOURCE_TIMEOUT_SECONDS", &val)?;
    }

    // Target overrides
    if let Some(val) = var("CHARTSYNC_TARGET_BASE_URL") {
        config.target.base_url = val;
    }
    if let Some(val) = var("CHARTSYNC_TARGET_TOKEN") {
        config.target.token = Some(secret_string(val));
    }
    if let Some(val) = var("CHARTSYNC_TARGET_WRITE_MODE") {
        config.target.write_mode = match val.to_lowercase().as_str() {
            "sequential" => WriteMode::Sequential,
            "transaction" => WriteMode::Transaction,
            other => {
                return Err(SyncError::Configuration(format!(
                    "Invalid CHARTSYNC_TARGET_WRITE_MODE '{other}'. Must be sequential or transaction"
                )))
            }
        };
    }
    if let Some(val) = var("CHARTSYNC_TARGET_TAG_SYSTEM") {
        config.target.tag_system = val;
    }

    // Events overrides
    if let Some(val) = var("CHARTSYNC_EVENTS_BASE_URL") {
        config.events.base_url = val;
    }
    if let Some(val) = var("CHARTSYNC_EVENTS_TOKEN") {
        config.events.token = Some(secret_string(val));
    }
    if let Some(val) = var("CHARTSYNC_EVENTS_TOPIC_PREFIX") {
        config.events.topic_prefix = val;
    }
    if let Some(val) = var("CHARTSYNC_EVENTS_AUTO_CREATE_TOPICS") {
        config.events.auto_create_topics = val.parse().unwrap_or(true);
    }

    // Sessions overrides (only if the section is configured)
    if let Some(ref mut sessions) = config.sessions {
        if let Some(val) = var("CHARTSYNC_SESSIONS_BASE_URL") {
            sessions.base_url = val;
        }
        if let Some(val) = var("CHARTSYNC_SESSIONS_TOKEN") {
            sessions.token = Some(secret_string(val));
        }
    }

    // Logging overrides
    if let Some(val) = var("CHARTSYNC_LOGGING_LOCAL_ENABLED") {
        config.logging.local_enabled = val.parse().unwrap_or(false);
    }
    if let Some(val) = var("CHARTSYNC_LOGGING_LOCAL_PATH") {
        config.logging.local_path = val;
    }

    Ok(())
}
