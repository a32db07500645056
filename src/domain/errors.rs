//! Domain error types
//!
//! This module defines the error hierarchy for chartsync. Every failure the
//! pipeline can observe maps onto one of the [`SyncError`] variants; adapter
//! failures carry their own enums ([`SourceError`], [`TargetError`]) that do not
//! expose third-party HTTP client types.

use thiserror::Error;

/// Main chartsync error type
#[derive(Debug, Error)]
pub enum SyncError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Tenant has neither an active provider session nor a system credential
    #[error("No credential available for tenant {tenant_id}")]
    NoCredential { tenant_id: String },

    /// Patient roster could not be discovered and no static roster exists
    #[error("Patient discovery failed for tenant {tenant_id}: {message}")]
    DiscoveryFailure { tenant_id: String, message: String },

    /// Source EHR read failed
    #[error("Source read failed: {0}")]
    SourceRead(#[from] SourceError),

    /// A composite write stopped part-way; the linking resource was not written
    #[error("Partial write failure at {step} after {written} resource(s): {message}")]
    PartialWrite {
        step: String,
        written: usize,
        message: String,
    },

    /// Target store errors outside of a composite write
    #[error("Target store error: {0}")]
    Target(#[from] TargetError),

    /// Message bus errors (never escalated past the publisher)
    #[error("Publish error: {0}")]
    Publish(String),

    /// Token acquisition or session lookup errors
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// Generic errors with context
    #[error("{0}")]
    Other(String),
}

impl SyncError {
    /// Short machine-readable name of the failure class, used in events and logs
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Configuration(_) => "configuration",
            SyncError::NoCredential { .. } => "no_credential",
            SyncError::DiscoveryFailure { .. } => "discovery_failure",
            SyncError::SourceRead(_) => "source_read_failure",
            SyncError::PartialWrite { .. } => "partial_write_failure",
            SyncError::Target(_) => "target_failure",
            SyncError::Publish(_) => "publish_failure",
            SyncError::Authentication(_) => "authentication",
            SyncError::Validation(_) => "validation",
            SyncError::Serialization(_) => "serialization",
            SyncError::Io(_) => "io",
            SyncError::Other(_) => "other",
        }
    }
}

/// Source EHR errors
#[derive(Debug, Error)]
pub enum SourceError {
    /// Failed to connect to the source EHR
    #[error("Failed to connect to source EHR: {0}")]
    ConnectionFailed(String),

    /// Credentials were rejected (401/403)
    #[error("Source EHR rejected credentials: {0}")]
    Unauthorized(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded, retry after: {0}")]
    RateLimited(String),

    /// Server error (5xx)
    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    /// Client error (4xx)
    #[error("Client error: {status} - {message}")]
    ClientError { status: u16, message: String },

    /// Invalid response body
    #[error("Invalid response from source EHR: {0}")]
    InvalidResponse(String),
}

impl SourceError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SourceError::ConnectionFailed(_)
                | SourceError::RateLimited(_)
                | SourceError::ServerError { .. }
        )
    }
}

/// Target clinical-data store errors
#[derive(Debug, Error)]
pub enum TargetError {
    /// Failed to connect to the target store
    #[error("Failed to connect to target store: {0}")]
    ConnectionFailed(String),

    /// Credentials were rejected (401/403)
    #[error("Target store rejected credentials: {0}")]
    Unauthorized(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Create failed
    #[error("Failed to create {resource_type}: {message}")]
    CreateFailed {
        resource_type: String,
        message: String,
    },

    /// Update failed
    #[error("Failed to update {resource_type}/{id}: {message}")]
    UpdateFailed {
        resource_type: String,
        id: String,
        message: String,
    },

    /// Search failed
    #[error("Search failed: {0}")]
    SearchFailed(String),

    /// Transaction bundle rejected
    #[error("Bundle execution failed: {0}")]
    BundleFailed(String),

    /// Throttling (429)
    #[error("Request rate too large (429), retry after: {0}")]
    Throttled(String),

    /// Server error (5xx)
    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    /// Invalid response body
    #[error("Invalid response from target store: {0}")]
    InvalidResponse(String),
}

impl TargetError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TargetError::ConnectionFailed(_)
                | TargetError::Throttled(_)
                | TargetError::ServerError { .. }
        )
    }
}

/// Unit failure details attached to a failed outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureDetail {
    /// Failure class (see [`SyncError::kind`])
    pub kind: String,

    /// Human-readable message
    pub message: String,
}

impl FailureDetail {
    /// Creates a failure detail from an error
    pub fn from_error(err: &SyncError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for FailureDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

// Conversion from std::io::Error
impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Io(err.to_string())
    }
}

// Conversion from serde_json::Error
impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

// Conversion from toml parse errors
impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::Configuration(format!("TOML parse error: {err}"))
    }
}
