//! Integration tests for logging functionality

use chartsync::config::{secret_string, LoggingConfig};
use chartsync::domain::{AuthContext, SystemCredential};
use chartsync::logging::init_logging;
use chrono::Utc;
use tempfile::TempDir;

#[test]
fn test_logging_config_default() {
    let config = LoggingConfig::default();
    assert!(!config.local_enabled);
    assert_eq!(config.local_rotation, "daily");
    assert_eq!(config.local_path, "/var/log/chartsync");
}

#[test]
fn test_invalid_log_level_is_rejected() {
    let result = init_logging("verbose", &LoggingConfig::default());
    assert!(result.is_err());
}

// Only test in this binary that installs the global subscriber
#[test]
fn test_file_logging_creates_directory() {
    let temp_dir = TempDir::new().unwrap();
    let log_path = temp_dir.path().join("logs");

    let config = LoggingConfig {
        local_enabled: true,
        local_path: log_path.to_string_lossy().to_string(),
        local_rotation: "hourly".to_string(),
    };

    let guard = init_logging("debug", &config).expect("logging initializes");
    tracing::info!(tenant_id = "acme", "file logging smoke test");
    drop(guard);

    assert!(log_path.is_dir());
}

#[test]
fn test_credentials_are_redacted_in_debug_output() {
    let credential = SystemCredential {
        token_url: "https://ehr.acme.example.com/oauth2/token".to_string(),
        client_id: "chartsync".to_string(),
        client_secret: secret_string("very-secret-value".to_string()),
        scope: None,
    };
    assert!(!format!("{credential:?}").contains("very-secret-value"));

    let auth = AuthContext::system(secret_string("bearer-value".to_string()), Utc::now());
    assert!(!format!("{auth:?}").contains("bearer-value"));
}
