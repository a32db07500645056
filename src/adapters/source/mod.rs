//! Source EHR collaborator
//!
//! Read-only operations against a tenant's EHR, always scoped by the
//! [`AuthContext`] resolved for the current unit of work.

pub mod fhir;

pub use fhir::FhirSourceClient;

use crate::domain::{AuthContext, BinaryContent, SourceError, SourceId, Tenant};
use async_trait::async_trait;
use serde_json::Value;

/// Read/search operations of the source EHR
///
/// Query parameters are passed as ordered `(name, value)` pairs so repeated
/// parameters (`date=ge..&date=le..`) are preserved.
#[async_trait]
pub trait SourceEhr: Send + Sync {
    /// Reads one resource by type and id
    async fn read_resource(
        &self,
        tenant: &Tenant,
        auth: &AuthContext,
        resource_type: &str,
        id: &str,
    ) -> Result<Value, SourceError>;

    /// Searches a resource type, following pagination
    async fn search_resources(
        &self,
        tenant: &Tenant,
        auth: &AuthContext,
        resource_type: &str,
        query: &[(String, String)],
    ) -> Result<Vec<Value>, SourceError>;

    /// Fetches raw binary content
    async fn fetch_binary(
        &self,
        tenant: &Tenant,
        auth: &AuthContext,
        id: &SourceId,
        content_type: Option<&str>,
    ) -> Result<BinaryContent, SourceError>;
}
