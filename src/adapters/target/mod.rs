//! Target clinical-data store collaborator

pub mod fhir;

pub use fhir::FhirTargetClient;

use crate::domain::{TargetError, TenantId};
use async_trait::async_trait;
use serde_json::Value;

/// Create/read/update/search operations of the target store
///
/// Calls are scoped by tenant; an implementation decides how a tenant maps
/// onto a store partition (base URL, database, header).
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Creates a resource and returns it with its assigned id
    async fn create_resource(
        &self,
        tenant: &TenantId,
        resource_type: &str,
        body: &Value,
    ) -> Result<Value, TargetError>;

    /// Reads a resource by id
    async fn read_resource(
        &self,
        tenant: &TenantId,
        resource_type: &str,
        id: &str,
    ) -> Result<Value, TargetError>;

    /// Replaces a resource
    async fn update_resource(
        &self,
        tenant: &TenantId,
        resource_type: &str,
        id: &str,
        body: &Value,
    ) -> Result<Value, TargetError>;

    /// Searches a resource type
    async fn search_resources(
        &self,
        tenant: &TenantId,
        resource_type: &str,
        query: &[(String, String)],
    ) -> Result<Vec<Value>, TargetError>;

    /// Executes a transaction or batch Bundle and returns the response Bundle
    async fn execute_bundle(&self, tenant: &TenantId, bundle: &Value) -> Result<Value, TargetError>;
}
