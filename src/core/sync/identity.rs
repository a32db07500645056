//! Patient identity reconciliation
//!
//! Maps a source patient onto a target patient, reusing an existing target
//! record whenever one can be found and creating one only as a last resort.
//! Resolved mappings are cached for the life of the process; entries come only
//! from target-store results and are never evicted.

use super::mapping::{has_tag, patient_body, tag_query, tagged_by_other_tenant, tenant_tag_system};
use crate::adapters::TargetStore;
use crate::domain::{
    PatientDemographics, PatientId, Result, SourceId, SyncError, TargetError, TargetPatientId,
    Tenant, TenantId,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Find-or-create of target patients
pub struct IdentityReconciler {
    target: Arc<dyn TargetStore>,
    tag_system: String,
    cache: Mutex<HashMap<(TenantId, PatientId), TargetPatientId>>,
}

impl IdentityReconciler {
    pub fn new(target: Arc<dyn TargetStore>, tag_system: impl Into<String>) -> Self {
        Self {
            target,
            tag_system: tag_system.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Target patient for `demographics.source_id`
    ///
    /// Resolution order: cached mapping, target patient with a matching MRN,
    /// target patient tagged with the source patient id, then a new tagged
    /// patient seeded from the source demographics. Callers serialize
    /// concurrent resolutions of the same patient.
    pub async fn find_or_create_patient(
        &self,
        tenant: &Tenant,
        demographics: &PatientDemographics,
    ) -> Result<TargetPatientId> {
        let key = (tenant.id.clone(), demographics.source_id.clone());
        if let Some(hit) = self.cache.lock().await.get(&key) {
            return Ok(hit.clone());
        }

        let resolved = match self.find_existing(tenant, demographics).await? {
            Some(existing) => existing,
            None => self.create(tenant, demographics).await?,
        };

        self.cache.lock().await.insert(key, resolved.clone());
        Ok(resolved)
    }

    async fn find_existing(
        &self,
        tenant: &Tenant,
        demographics: &PatientDemographics,
    ) -> Result<Option<TargetPatientId>> {
        if let Some(mrn) = &demographics.mrn {
            let query = vec![(
                "identifier".to_string(),
                format!("{}|{}", tenant.mrn_system, mrn),
            )];
            // Another tenant's mirrored patient never matches, even on a shared store
            let matches: Vec<Value> = self
                .target
                .search_resources(&tenant.id, "Patient", &query)
                .await?
                .into_iter()
                .filter(|p| !tagged_by_other_tenant(p, &self.tag_system, &tenant.id))
                .collect();
            if matches.len() > 1 {
                tracing::warn!(
                    tenant_id = %tenant.id,
                    patient_id = %demographics.source_id,
                    count = matches.len(),
                    "Several target patients share one MRN, using the first"
                );
            }
            if let Some(id) = matches.iter().find_map(patient_id) {
                tracing::debug!(
                    tenant_id = %tenant.id,
                    patient_id = %demographics.source_id,
                    target_patient_id = %id,
                    "Matched target patient by MRN"
                );
                return Ok(Some(id));
            }
        }

        let tag = source_tag(&demographics.source_id)?;
        let tag_system = tenant_tag_system(&self.tag_system, &tenant.id);
        let tagged = self
            .target
            .search_resources(&tenant.id, "Patient", &tag_query(&tag_system, &tag))
            .await?;
        Ok(tagged
            .iter()
            .filter(|p| has_tag(p, &tag_system, &tag))
            .find_map(patient_id))
    }

    async fn create(
        &self,
        tenant: &Tenant,
        demographics: &PatientDemographics,
    ) -> Result<TargetPatientId> {
        let body = patient_body(
            demographics,
            &tenant_tag_system(&self.tag_system, &tenant.id),
            &tenant.mrn_system,
        );
        let created = self
            .target
            .create_resource(&tenant.id, "Patient", &body)
            .await?;
        let id = patient_id(&created).ok_or_else(|| {
            TargetError::InvalidResponse("created Patient has no id".to_string())
        })?;

        tracing::info!(
            tenant_id = %tenant.id,
            patient_id = %demographics.source_id,
            target_patient_id = %id,
            "Created target patient"
        );
        Ok(id)
    }

    /// Number of cached mappings
    pub async fn cached(&self) -> usize {
        self.cache.lock().await.len()
    }
}

fn patient_id(resource: &Value) -> Option<TargetPatientId> {
    resource["id"]
        .as_str()
        .and_then(|id| TargetPatientId::new(id).ok())
}

fn source_tag(patient: &PatientId) -> Result<SourceId> {
    SourceId::new(patient.as_str()).map_err(SyncError::Validation)
}
