//! Source reads scoped to one tenant and patient
//!
//! Only the encounter itself is required; every related resource that cannot
//! be read is recorded on the bundle as missing and the read carries on.

use crate::adapters::SourceEhr;
use crate::domain::{
    AuthContext, EncounterBundle, EncounterRef, PatientDemographics, PatientId, Result,
    SourceError, SourceId, SourceResource, Tenant,
};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Reads encounters and their related resources from the source EHR
#[derive(Clone)]
pub struct SourceReader {
    source: Arc<dyn SourceEhr>,
    window: Duration,
}

impl SourceReader {
    /// `window` is the trailing period in which completed encounters are candidates
    pub fn new(source: Arc<dyn SourceEhr>, window: Duration) -> Self {
        Self { source, window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn since_param(&self, now: DateTime<Utc>) -> String {
        format!(
            "ge{}",
            (now - self.window).to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }

    /// Completed encounters of `patient` whose timestamp falls in the window ending at `now`
    pub async fn list_candidate_encounters(
        &self,
        tenant: &Tenant,
        patient: &PatientId,
        auth: &AuthContext,
        now: DateTime<Utc>,
    ) -> Result<Vec<EncounterRef>> {
        let query = vec![
            ("patient".to_string(), patient.to_string()),
            ("date".to_string(), self.since_param(now)),
        ];
        let encounters = self
            .source
            .search_resources(tenant, auth, "Encounter", &query)
            .await?;

        let mut seen = BTreeSet::new();
        let candidates: Vec<EncounterRef> = encounters
            .iter()
            .filter_map(|e| EncounterRef::from_resource(e, patient))
            .filter(|e| e.is_candidate(now, self.window))
            .filter(|e| seen.insert(e.source_id.clone()))
            .collect();

        tracing::debug!(
            tenant_id = %tenant.id,
            patient_id = %patient,
            found = encounters.len(),
            candidates = candidates.len(),
            "Listed candidate encounters"
        );
        Ok(candidates)
    }

    /// Patients with encounters in the window, for tenants with a discoverable roster
    pub async fn discover_patients(
        &self,
        tenant: &Tenant,
        auth: &AuthContext,
        now: DateTime<Utc>,
    ) -> Result<Vec<PatientId>> {
        let query = vec![("date".to_string(), self.since_param(now))];
        let encounters = self
            .source
            .search_resources(tenant, auth, "Encounter", &query)
            .await?;

        let mut seen = BTreeSet::new();
        Ok(encounters
            .iter()
            .filter_map(|e| e["subject"]["reference"].as_str())
            .filter_map(|r| SourceId::from_reference(r, "Patient"))
            .filter_map(|id| PatientId::new(id.into_inner()).ok())
            .filter(|p| seen.insert(p.clone()))
            .collect())
    }

    /// Demographics of the source patient
    pub async fn read_patient(
        &self,
        tenant: &Tenant,
        patient: &PatientId,
        auth: &AuthContext,
    ) -> Result<PatientDemographics> {
        let resource = self
            .source
            .read_resource(tenant, auth, "Patient", patient.as_str())
            .await?;
        Ok(PatientDemographics::from_resource(
            &resource,
            patient,
            &tenant.mrn_system,
        ))
    }

    /// Reads the encounter and everything related to it
    ///
    /// # Errors
    ///
    /// Fails only when the encounter itself cannot be read.
    pub async fn fetch_encounter_resources(
        &self,
        tenant: &Tenant,
        encounter: &EncounterRef,
        auth: &AuthContext,
    ) -> Result<EncounterBundle> {
        let body = self
            .source
            .read_resource(tenant, auth, "Encounter", encounter.source_id.as_str())
            .await?;
        let resource = SourceResource::from_value(body).ok_or_else(|| {
            SourceError::InvalidResponse(format!(
                "Encounter/{} has no id or resourceType",
                encounter.source_id
            ))
        })?;
        let mut bundle = EncounterBundle::new(resource);
        let encounter_ref = format!("Encounter/{}", encounter.source_id);

        bundle.documents = self
            .search_related(tenant, auth, "DocumentReference", &encounter_ref, &mut bundle.missing)
            .await;
        bundle.orders = self
            .search_related(tenant, auth, "MedicationRequest", &encounter_ref, &mut bundle.missing)
            .await;

        for reference in appointment_references(&bundle.encounter.body) {
            let Some(id) = SourceId::from_reference(&reference, "Appointment") else {
                bundle.record_missing(reference, "unsupported reference");
                continue;
            };
            match self
                .source
                .read_resource(tenant, auth, "Appointment", id.as_str())
                .await
            {
                Ok(value) => match SourceResource::from_value(value) {
                    Some(r) => bundle.appointments.push(r),
                    None => bundle.record_missing(reference, "invalid resource"),
                },
                Err(e) => bundle.record_missing(reference, e.to_string()),
            }
        }

        let attachments: Vec<(SourceId, Option<String>)> = bundle
            .documents
            .iter()
            .flat_map(|d| binary_attachments(&d.body))
            .collect();
        let mut fetched = BTreeSet::new();
        for (binary_id, content_type) in attachments {
            if !fetched.insert(binary_id.clone()) {
                continue;
            }
            match self
                .source
                .fetch_binary(tenant, auth, &binary_id, content_type.as_deref())
                .await
            {
                Ok(binary) => bundle.binaries.push(binary),
                Err(e) => bundle.record_missing(format!("Binary/{binary_id}"), e.to_string()),
            }
        }

        if !bundle.missing.is_empty() {
            tracing::warn!(
                tenant_id = %tenant.id,
                source_encounter_id = %encounter.source_id,
                missing = bundle.missing.len(),
                "Some related resources could not be read"
            );
        }
        Ok(bundle)
    }

    async fn search_related(
        &self,
        tenant: &Tenant,
        auth: &AuthContext,
        resource_type: &str,
        encounter_ref: &str,
        missing: &mut Vec<crate::domain::MissingResource>,
    ) -> Vec<SourceResource> {
        let query = vec![("encounter".to_string(), encounter_ref.to_string())];
        match self
            .source
            .search_resources(tenant, auth, resource_type, &query)
            .await
        {
            Ok(values) => values.into_iter().filter_map(SourceResource::from_value).collect(),
            Err(e) => {
                missing.push(crate::domain::MissingResource {
                    reference: format!("{resource_type}?encounter={encounter_ref}"),
                    reason: e.to_string(),
                });
                Vec::new()
            }
        }
    }
}

/// `Encounter.appointment[].reference`
fn appointment_references(encounter: &Value) -> Vec<String> {
    encounter["appointment"]
        .as_array()
        .map(|refs| {
            refs.iter()
                .filter_map(|r| r["reference"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Binary references in `DocumentReference.content[].attachment.url`
pub(crate) fn binary_attachments(document: &Value) -> Vec<(SourceId, Option<String>)> {
    document["content"]
        .as_array()
        .map(|content| {
            content
                .iter()
                .filter_map(|c| {
                    let attachment = &c["attachment"];
                    let id = SourceId::from_reference(attachment["url"].as_str()?, "Binary")?;
                    Some((id, attachment["contentType"].as_str().map(str::to_string)))
                })
                .collect()
        })
        .unwrap_or_default()
}
