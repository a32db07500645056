//! Tenant configuration collaborator
//!
//! Tenants are read-only to the pipeline. A tenant without an EHR integration
//! is a valid record meaning "skip this tenant".

use crate::config::TenantConfig;
use crate::domain::{EhrIntegrationKind, PatientRoster, Result, SyncError, Tenant, TenantId};
use async_trait::async_trait;

/// Read-only tenant directory
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// All tenant ids, in a stable order
    async fn list_tenant_ids(&self) -> Result<Vec<TenantId>>;

    /// Full tenant record
    async fn get_tenant(&self, tenant_id: &TenantId) -> Result<Option<Tenant>>;

    /// Patient roster of a tenant
    async fn get_patient_roster(&self, tenant_id: &TenantId) -> Result<PatientRoster>;

    /// EHR integration of a tenant, `None` if it has none
    async fn get_ehr_integration_kind(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Option<EhrIntegrationKind>>;
}

/// Directory backed by the `[[tenants]]` configuration records
#[derive(Debug, Clone, Default)]
pub struct ConfigTenantDirectory {
    tenants: Vec<Tenant>,
}

impl ConfigTenantDirectory {
    /// Builds the directory from configuration records
    pub fn from_config(records: &[TenantConfig]) -> Result<Self> {
        let tenants = records
            .iter()
            .map(|r| r.to_tenant().map_err(SyncError::Configuration))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { tenants })
    }

    /// Builds the directory from already-constructed tenants
    pub fn new(tenants: Vec<Tenant>) -> Self {
        Self { tenants }
    }

    fn find(&self, tenant_id: &TenantId) -> Option<&Tenant> {
        self.tenants.iter().find(|t| &t.id == tenant_id)
    }

    fn require(&self, tenant_id: &TenantId) -> Result<&Tenant> {
        self.find(tenant_id)
            .ok_or_else(|| SyncError::Validation(format!("Unknown tenant '{tenant_id}'")))
    }
}

#[async_trait]
impl TenantDirectory for ConfigTenantDirectory {
    async fn list_tenant_ids(&self) -> Result<Vec<TenantId>> {
        Ok(self.tenants.iter().map(|t| t.id.clone()).collect())
    }

    async fn get_tenant(&self, tenant_id: &TenantId) -> Result<Option<Tenant>> {
        Ok(self.find(tenant_id).cloned())
    }

    async fn get_patient_roster(&self, tenant_id: &TenantId) -> Result<PatientRoster> {
        Ok(self.require(tenant_id)?.roster.clone())
    }

    async fn get_ehr_integration_kind(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Option<EhrIntegrationKind>> {
        Ok(self.require(tenant_id)?.integration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, integration: Option<EhrIntegrationKind>) -> TenantConfig {
        TenantConfig {
            id: id.to_string(),
            name: Some(format!("{id} hospital")),
            ehr_integration: integration,
            source_base_url: "https://ehr.example.org/fhir".to_string(),
            mrn_system: "urn:mrn".to_string(),
            topic: None,
            patients: vec!["p-1".to_string()],
            discover_patients: false,
            system_credential: None,
        }
    }

    #[tokio::test]
    async fn test_directory_lookups() {
        let directory = ConfigTenantDirectory::from_config(&[
            record("acme", Some(EhrIntegrationKind::Fhir)),
            record("dormant", None),
        ])
        .unwrap();

        let ids = directory.list_tenant_ids().await.unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0].as_str(), "acme");

        let dormant = TenantId::new("dormant").unwrap();
        assert_eq!(directory.get_ehr_integration_kind(&dormant).await.unwrap(), None);
        assert_eq!(
            directory.get_ehr_integration_kind(&ids[0]).await.unwrap(),
            Some(EhrIntegrationKind::Fhir)
        );
        assert_eq!(
            directory.get_patient_roster(&ids[0]).await.unwrap().static_patients.len(),
            1
        );
    }

    #[tokio::test]
    async fn test_unknown_tenant() {
        let directory = ConfigTenantDirectory::default();
        let unknown = TenantId::new("nobody").unwrap();
        assert!(directory.get_tenant(&unknown).await.unwrap().is_none());
        assert!(directory.get_patient_roster(&unknown).await.is_err());
    }
}
