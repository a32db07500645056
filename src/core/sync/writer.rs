//! Composite record writes
//!
//! Executes a [`WritePlan`] against the target store. Every member is written
//! as an upsert keyed by its Mirrored-Record Tag, so a retry after a partial
//! failure reuses the leaves it already wrote. The linking resource is written
//! only after every other step succeeded.

use super::mapping::{
    binary_body, has_tag, linking_body, member_body, references_encounter, relative_reference,
    tag_query, tenant_tag_system, ReferenceMap, LINK_RESOURCE_TYPE,
};
use super::plan::{WritePlan, WriteStep};
use crate::adapters::TargetStore;
use crate::config::WriteMode;
use crate::domain::{
    EncounterBundle, PatientId, ResourceCounts, Result, SourceId, SourceResource, SyncError,
    TargetError, TargetPatientId, TargetResourceId, TenantId,
};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Outcome of a completed composite write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeResult {
    /// Target id of the encounter
    pub target_encounter_id: TargetResourceId,

    /// Target id of the linking resource
    pub link_id: TargetResourceId,

    /// Members written, per type
    pub counts: ResourceCounts,

    /// Number of successful write requests
    pub written: usize,
}

/// Writes one composite record in plan order
#[derive(Clone)]
pub struct CompositeWriter {
    target: Arc<dyn TargetStore>,
    /// Configured tag system, scoped per tenant before any write
    tag_system: String,
    mode: WriteMode,
}

/// Where the sequential writer has got to
struct Progress {
    refs: ReferenceMap,
    members: Vec<(String, TargetResourceId)>,
    back_refs: Vec<(SourceResource, TargetResourceId)>,
    encounter: Option<TargetResourceId>,
    link: Option<TargetResourceId>,
    written: usize,
}

impl CompositeWriter {
    pub fn new(target: Arc<dyn TargetStore>, tag_system: impl Into<String>, mode: WriteMode) -> Self {
        Self {
            target,
            tag_system: tag_system.into(),
            mode,
        }
    }

    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    /// Writes `bundle` for the already-reconciled `patient`
    ///
    /// # Errors
    ///
    /// Any failed write stops the plan and is returned as
    /// [`SyncError::PartialWrite`]; the linking resource is then absent.
    pub async fn write_composite(
        &self,
        tenant: &TenantId,
        bundle: &EncounterBundle,
        source_patient: &PatientId,
        patient: &TargetPatientId,
        plan: &WritePlan,
    ) -> Result<CompositeResult> {
        plan.validate().map_err(SyncError::Validation)?;
        let refs = ReferenceMap::new(
            source_patient.clone(),
            patient,
            bundle.encounter.source_id.clone(),
        );

        let scoped = self.for_tenant(tenant);
        match self.mode {
            WriteMode::Sequential => scoped.write_sequential(tenant, bundle, patient, plan, refs).await,
            WriteMode::Transaction => scoped.write_transaction(tenant, bundle, patient, plan, refs).await,
        }
    }

    /// Writer whose tags are all under the tenant's tag system
    fn for_tenant(&self, tenant: &TenantId) -> Self {
        Self {
            target: Arc::clone(&self.target),
            tag_system: tenant_tag_system(&self.tag_system, tenant),
            mode: self.mode,
        }
    }

    async fn write_sequential(
        &self,
        tenant: &TenantId,
        bundle: &EncounterBundle,
        patient: &TargetPatientId,
        plan: &WritePlan,
        refs: ReferenceMap,
    ) -> Result<CompositeResult> {
        let mut progress = Progress {
            refs,
            members: Vec::new(),
            back_refs: Vec::new(),
            encounter: None,
            link: None,
            written: 0,
        };

        for step in plan.steps() {
            self.apply_step(tenant, bundle, patient, *step, &mut progress)
                .await
                .map_err(|(label, e)| SyncError::PartialWrite {
                    step: label,
                    written: progress.written,
                    message: e.to_string(),
                })?;
        }

        let (Some(target_encounter_id), Some(link_id)) = (progress.encounter, progress.link) else {
            return Err(SyncError::Validation(
                "write plan finished without encounter or link".to_string(),
            ));
        };
        Ok(CompositeResult {
            target_encounter_id,
            link_id,
            counts: bundle.counts(),
            written: progress.written,
        })
    }

    async fn apply_step(
        &self,
        tenant: &TenantId,
        bundle: &EncounterBundle,
        patient: &TargetPatientId,
        step: WriteStep,
        progress: &mut Progress,
    ) -> std::result::Result<(), (String, TargetError)> {
        match step {
            WriteStep::Binary(i) => {
                let binary = member(&bundle.binaries, i, step)?;
                let body = binary_body(binary, &self.tag_system);
                let id = self
                    .upsert_tagged(tenant, "Binary", &binary.source_id, body)
                    .await
                    .map_err(|e| (label(step, "Binary", &binary.source_id), e))?;
                progress
                    .refs
                    .add_binary(binary.source_id.clone(), relative_reference("Binary", &id));
                progress.members.push(("Binary".to_string(), id));
                progress.written += 1;
            }
            WriteStep::Document(i) | WriteStep::Order(i) => {
                let resources = if matches!(step, WriteStep::Document(_)) {
                    &bundle.documents
                } else {
                    &bundle.orders
                };
                let resource = member(resources, i, step)?;
                let id = self
                    .write_member(tenant, resource, &progress.refs)
                    .await
                    .map_err(|e| (label(step, &resource.resource_type, &resource.source_id), e))?;
                if references_encounter(&resource.body) {
                    progress.back_refs.push((resource.clone(), id.clone()));
                }
                progress.members.push((resource.resource_type.clone(), id));
                progress.written += 1;
            }
            WriteStep::Appointment(i) => {
                let resource = member(&bundle.appointments, i, step)?;
                let id = self
                    .write_member(tenant, resource, &progress.refs)
                    .await
                    .map_err(|e| (label(step, &resource.resource_type, &resource.source_id), e))?;
                progress.refs.add_appointment(
                    resource.source_id.clone(),
                    relative_reference(&resource.resource_type, &id),
                );
                progress.members.push((resource.resource_type.clone(), id));
                progress.written += 1;
            }
            WriteStep::Encounter => {
                let encounter = &bundle.encounter;
                let id = self
                    .write_member(tenant, encounter, &progress.refs)
                    .await
                    .map_err(|e| (label(step, "Encounter", &encounter.source_id), e))?;
                progress
                    .refs
                    .set_encounter(relative_reference("Encounter", &id));
                progress.encounter = Some(id);
                progress.written += 1;
            }
            WriteStep::BackReferences => {
                for (resource, id) in &progress.back_refs {
                    let mut body = member_body(resource, &self.tag_system, &progress.refs);
                    body["id"] = json!(id.as_str());
                    self.target
                        .update_resource(tenant, &resource.resource_type, id.as_str(), &body)
                        .await
                        .map_err(|e| (label(step, &resource.resource_type, &resource.source_id), e))?;
                    progress.written += 1;
                }
            }
            WriteStep::Link => {
                let encounter = progress.encounter.as_ref().ok_or_else(|| {
                    (
                        step.to_string(),
                        TargetError::InvalidResponse("link planned before encounter".to_string()),
                    )
                })?;
                let body = linking_body(
                    &self.tag_system,
                    &bundle.encounter.source_id,
                    patient,
                    encounter,
                    &progress.members,
                );
                let id = self
                    .upsert_tagged(tenant, LINK_RESOURCE_TYPE, &bundle.encounter.source_id, body)
                    .await
                    .map_err(|e| (label(step, LINK_RESOURCE_TYPE, &bundle.encounter.source_id), e))?;
                progress.link = Some(id);
                progress.written += 1;
            }
        }
        Ok(())
    }

    async fn write_member(
        &self,
        tenant: &TenantId,
        resource: &SourceResource,
        refs: &ReferenceMap,
    ) -> std::result::Result<TargetResourceId, TargetError> {
        let body = member_body(resource, &self.tag_system, refs);
        self.upsert_tagged(tenant, &resource.resource_type, &resource.source_id, body)
            .await
    }

    /// Updates the resource carrying the tag for `source_id`, or creates it
    async fn upsert_tagged(
        &self,
        tenant: &TenantId,
        resource_type: &str,
        source_id: &SourceId,
        mut body: Value,
    ) -> std::result::Result<TargetResourceId, TargetError> {
        let existing = self
            .target
            .search_resources(tenant, resource_type, &tag_query(&self.tag_system, source_id))
            .await?
            .into_iter()
            .filter(|r| has_tag(r, &self.tag_system, source_id))
            .find_map(|r| r["id"].as_str().and_then(|id| TargetResourceId::new(id).ok()));

        if let Some(id) = existing {
            tracing::debug!(
                tenant_id = %tenant,
                resource_type = resource_type,
                source_id = %source_id,
                target_id = %id,
                "Updating previously mirrored resource"
            );
            body["id"] = json!(id.as_str());
            self.target
                .update_resource(tenant, resource_type, id.as_str(), &body)
                .await?;
            return Ok(id);
        }

        let created = self
            .target
            .create_resource(tenant, resource_type, &body)
            .await?;
        created["id"]
            .as_str()
            .and_then(|id| TargetResourceId::new(id).ok())
            .ok_or_else(|| {
                TargetError::InvalidResponse(format!("created {resource_type} has no id"))
            })
    }

    async fn write_transaction(
        &self,
        tenant: &TenantId,
        bundle: &EncounterBundle,
        patient: &TargetPatientId,
        plan: &WritePlan,
        mut refs: ReferenceMap,
    ) -> Result<CompositeResult> {
        // Placeholder ids; the server rewrites them on commit
        let steps: Vec<(WriteStep, String)> = plan
            .member_steps()
            .map(|step| (*step, format!("urn:uuid:{}", Uuid::new_v4())))
            .collect();

        for (step, full_url) in &steps {
            match step {
                WriteStep::Binary(i) => {
                    if let Some(binary) = bundle.binaries.get(*i) {
                        refs.add_binary(binary.source_id.clone(), full_url.clone());
                    }
                }
                WriteStep::Appointment(i) => {
                    if let Some(appointment) = bundle.appointments.get(*i) {
                        refs.add_appointment(appointment.source_id.clone(), full_url.clone());
                    }
                }
                WriteStep::Encounter => refs.set_encounter(full_url.clone()),
                _ => {}
            }
        }

        let mut entries = Vec::with_capacity(steps.len());
        let mut kinds = Vec::with_capacity(steps.len());
        for (step, full_url) in &steps {
            let (resource_type, source_id, body) = match step {
                WriteStep::Binary(i) => {
                    let binary = member(&bundle.binaries, *i, *step).map_err(plan_error)?;
                    ("Binary".to_string(), &binary.source_id, binary_body(binary, &self.tag_system))
                }
                WriteStep::Document(i) | WriteStep::Order(i) | WriteStep::Appointment(i) => {
                    let resources = match step {
                        WriteStep::Document(_) => &bundle.documents,
                        WriteStep::Order(_) => &bundle.orders,
                        _ => &bundle.appointments,
                    };
                    let resource = member(resources, *i, *step).map_err(plan_error)?;
                    (
                        resource.resource_type.clone(),
                        &resource.source_id,
                        member_body(resource, &self.tag_system, &refs),
                    )
                }
                WriteStep::Encounter => (
                    "Encounter".to_string(),
                    &bundle.encounter.source_id,
                    member_body(&bundle.encounter, &self.tag_system, &refs),
                ),
                WriteStep::BackReferences | WriteStep::Link => continue,
            };
            entries.push(json!({
                "fullUrl": full_url,
                "resource": body,
                "request": {
                    "method": "PUT",
                    "url": conditional_url(&resource_type, &self.tag_system, source_id),
                },
            }));
            kinds.push((*step, resource_type));
        }

        let transaction = json!({
            "resourceType": "Bundle",
            "type": "transaction",
            "entry": entries,
        });
        let response = self
            .target
            .execute_bundle(tenant, &transaction)
            .await
            .map_err(|e| SyncError::PartialWrite {
                step: "Transaction".to_string(),
                written: 0,
                message: e.to_string(),
            })?;

        let ids = response_ids(&response);
        if ids.len() != kinds.len() {
            return Err(SyncError::PartialWrite {
                step: "Transaction".to_string(),
                written: 0,
                message: format!(
                    "transaction response has {} entries with ids, expected {}",
                    ids.len(),
                    kinds.len()
                ),
            });
        }

        let mut members = Vec::new();
        let mut encounter = None;
        for ((step, resource_type), id) in kinds.into_iter().zip(ids) {
            if step == WriteStep::Encounter {
                encounter = Some(id);
            } else {
                members.push((resource_type, id));
            }
        }
        let written = members.len() + 1;
        let target_encounter_id = encounter.ok_or_else(|| {
            SyncError::Validation("transaction carried no encounter".to_string())
        })?;

        let body = linking_body(
            &self.tag_system,
            &bundle.encounter.source_id,
            patient,
            &target_encounter_id,
            &members,
        );
        let link_id = self
            .upsert_tagged(tenant, LINK_RESOURCE_TYPE, &bundle.encounter.source_id, body)
            .await
            .map_err(|e| SyncError::PartialWrite {
                step: label(WriteStep::Link, LINK_RESOURCE_TYPE, &bundle.encounter.source_id),
                written,
                message: e.to_string(),
            })?;

        Ok(CompositeResult {
            target_encounter_id,
            link_id,
            counts: bundle.counts(),
            written: written + 1,
        })
    }
}

fn label(step: WriteStep, resource_type: &str, source_id: &SourceId) -> String {
    format!("{step} {resource_type}/{source_id}")
}

fn member<T>(items: &[T], index: usize, step: WriteStep) -> std::result::Result<&T, (String, TargetError)> {
    items.get(index).ok_or_else(|| {
        (
            step.to_string(),
            TargetError::InvalidResponse(format!("{step} is not in the bundle")),
        )
    })
}

fn plan_error((step, e): (String, TargetError)) -> SyncError {
    SyncError::Validation(format!("{step}: {e}"))
}

/// `Type?_tag=system|code` for a conditional update
fn conditional_url(resource_type: &str, tag_system: &str, source_id: &SourceId) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("_tag", &format!("{tag_system}|{source_id}"))
        .finish();
    format!("{resource_type}?{query}")
}

/// Target ids of a transaction-response Bundle, in entry order
fn response_ids(response: &Value) -> Vec<TargetResourceId> {
    response["entry"]
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    entry["resource"]["id"]
                        .as_str()
                        .map(str::to_string)
                        .or_else(|| entry["response"]["location"].as_str().and_then(location_id))
                })
                .filter_map(|id| TargetResourceId::new(id).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// `Encounter/123/_history/1` -> `123`
fn location_id(location: &str) -> Option<String> {
    let path = location.split('?').next()?;
    let mut segments: Vec<&str> = path.trim_end_matches('/').split('/').collect();
    if segments.len() >= 2 && segments[segments.len() - 2] == "_history" {
        segments.truncate(segments.len() - 2);
    }
    segments.last().filter(|s| !s.is_empty()).map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conditional_url_encodes_tag() {
        let url = conditional_url(
            "Encounter",
            "original-source-id",
            &SourceId::new("enc-77").unwrap(),
        );
        assert_eq!(url, "Encounter?_tag=original-source-id%7Cenc-77");
    }

    #[test]
    fn test_location_id() {
        assert_eq!(location_id("Encounter/123/_history/1").as_deref(), Some("123"));
        assert_eq!(location_id("https://x/fhir/Binary/b9").as_deref(), Some("b9"));
        assert_eq!(location_id(""), None);
    }

    #[test]
    fn test_response_ids_prefers_resource_id() {
        let response = json!({
            "resourceType": "Bundle",
            "type": "transaction-response",
            "entry": [
                {"resource": {"resourceType": "Binary", "id": "t-b1"}, "response": {"status": "201 Created"}},
                {"response": {"status": "200 OK", "location": "Encounter/t-e1/_history/2"}}
            ]
        });
        let ids: Vec<String> = response_ids(&response)
            .into_iter()
            .map(TargetResourceId::into_inner)
            .collect();
        assert_eq!(ids, vec!["t-b1".to_string(), "t-e1".to_string()]);
    }
}
