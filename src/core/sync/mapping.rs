//! Source-to-target resource mapping
//!
//! Every body written to the target store goes through here: source `id` and
//! `meta` are dropped, the Mirrored-Record Tag is applied, and references are
//! rewritten to target ids. A reference with no target counterpart is removed
//! (its `display` is kept) so nothing written ever points at a missing resource.

use crate::domain::{
    BinaryContent, PatientDemographics, PatientId, SourceId, SourceResource, TargetPatientId,
    TargetResourceId, TenantId,
};
use base64::{engine::general_purpose, Engine as _};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Resource type of the top-level linking resource
pub const LINK_RESOURCE_TYPE: &str = "List";

/// Tag system of one tenant: `{tag_system}/{tenant}`
///
/// Source ids are only unique within a tenant, and tenants may share one
/// target store, so every tag is built and searched under this system.
pub fn tenant_tag_system(tag_system: &str, tenant: &TenantId) -> String {
    format!("{}/{}", tag_system.trim_end_matches('/'), tenant)
}

/// Whether `resource` was mirrored for a tenant other than `tenant`
pub fn tagged_by_other_tenant(resource: &Value, tag_system: &str, tenant: &TenantId) -> bool {
    let own = tenant_tag_system(tag_system, tenant);
    let prefix = format!("{}/", tag_system.trim_end_matches('/'));
    resource["meta"]["tag"]
        .as_array()
        .map(|tags| {
            tags.iter()
                .filter_map(|t| t["system"].as_str())
                .any(|system| system.starts_with(&prefix) && system != own)
        })
        .unwrap_or(false)
}

/// Target encounter a linking resource points at
pub fn linked_encounter(link: &Value) -> Option<TargetResourceId> {
    let reference = link["encounter"]["reference"].as_str()?;
    let mut segments = reference.trim_end_matches('/').rsplit('/');
    let id = segments.next()?;
    if segments.next() != Some("Encounter") {
        return None;
    }
    TargetResourceId::new(id).ok()
}

/// Mirrored-Record Tag coding
pub fn tag_coding(tag_system: &str, source_id: &SourceId) -> Value {
    tag_code(tag_system, source_id.as_str())
}

fn tag_code(tag_system: &str, code: &str) -> Value {
    json!({"system": tag_system, "code": code})
}

/// `_tag` search parameter matching the tag for `source_id`
pub fn tag_query(tag_system: &str, source_id: &SourceId) -> Vec<(String, String)> {
    vec![("_tag".to_string(), format!("{tag_system}|{source_id}"))]
}

/// Whether `resource` carries the tag for `source_id`
pub fn has_tag(resource: &Value, tag_system: &str, source_id: &SourceId) -> bool {
    resource["meta"]["tag"]
        .as_array()
        .map(|tags| {
            tags.iter().any(|t| {
                t["system"].as_str() == Some(tag_system) && t["code"].as_str() == Some(source_id.as_str())
            })
        })
        .unwrap_or(false)
}

fn apply_tag(body: &mut Value, tag_system: &str, source_id: &SourceId) {
    if let Some(obj) = body.as_object_mut() {
        obj.remove("id");
        obj.insert(
            "meta".to_string(),
            json!({"tag": [tag_coding(tag_system, source_id)]}),
        );
    }
}

/// Source-to-target reference translations known while writing one composite
///
/// Only the composite's own patient and encounter are translated; references
/// to any other patient or encounter are treated as unknown. Targets are full
/// reference strings so the same map serves relative references
/// (`Binary/123`) and in-bundle `urn:uuid:` references.
#[derive(Debug, Clone)]
pub struct ReferenceMap {
    source_patient: PatientId,
    patient: String,
    source_encounter: SourceId,
    encounter: Option<String>,
    binaries: HashMap<SourceId, String>,
    appointments: HashMap<SourceId, String>,
}

impl ReferenceMap {
    pub fn new(source_patient: PatientId, patient: &TargetPatientId, source_encounter: SourceId) -> Self {
        Self {
            source_patient,
            patient: patient.reference(),
            source_encounter,
            encounter: None,
            binaries: HashMap::new(),
            appointments: HashMap::new(),
        }
    }

    pub fn set_encounter(&mut self, reference: impl Into<String>) {
        self.encounter = Some(reference.into());
    }

    pub fn add_binary(&mut self, source_id: SourceId, reference: impl Into<String>) {
        self.binaries.insert(source_id, reference.into());
    }

    pub fn add_appointment(&mut self, source_id: SourceId, reference: impl Into<String>) {
        self.appointments.insert(source_id, reference.into());
    }

    /// Target reference for a source reference, `None` if it has no target yet
    fn translate(&self, reference: &str) -> Option<String> {
        let mut parts = reference.trim_end_matches('/').rsplit('/');
        let id = parts.next()?;
        let kind = parts.next()?;
        let source_id = SourceId::new(id).ok()?;
        match kind {
            "Patient" if id == self.source_patient.as_str() => Some(self.patient.clone()),
            "Encounter" if source_id == self.source_encounter => self.encounter.clone(),
            "Binary" => self.binaries.get(&source_id).cloned(),
            "Appointment" => self.appointments.get(&source_id).cloned(),
            _ => None,
        }
    }
}

/// Relative reference `{resource_type}/{id}`
pub fn relative_reference(resource_type: &str, id: &TargetResourceId) -> String {
    format!("{resource_type}/{id}")
}

/// Rewrites `reference` fields and attachment URLs; returns `false` when the
/// value became empty and should be dropped by its parent
fn rewrite(value: &mut Value, refs: &ReferenceMap) -> bool {
    match value {
        Value::Object(obj) => {
            if let Some(reference) = obj.get("reference").and_then(Value::as_str).map(str::to_string) {
                match refs.translate(&reference) {
                    Some(target) => {
                        obj.insert("reference".to_string(), Value::String(target));
                    }
                    None => {
                        obj.remove("reference");
                    }
                }
            }
            if obj.contains_key("contentType") || obj.contains_key("data") {
                if let Some(url) = obj.get("url").and_then(Value::as_str).map(str::to_string) {
                    if url.contains("Binary/") {
                        match refs.translate(&url) {
                            Some(target) => {
                                obj.insert("url".to_string(), Value::String(target));
                            }
                            None => {
                                obj.remove("url");
                            }
                        }
                    }
                }
            }
            let keys: Vec<String> = obj.keys().cloned().collect();
            for key in keys {
                let keep = obj.get_mut(&key).map(|v| rewrite(v, refs)).unwrap_or(true);
                if !keep {
                    obj.remove(&key);
                }
            }
            !obj.is_empty()
        }
        Value::Array(items) => {
            items.retain_mut(|item| rewrite(item, refs));
            !items.is_empty()
        }
        _ => true,
    }
}

/// Target body for a clinical member (document, order, appointment, encounter)
pub fn member_body(resource: &SourceResource, tag_system: &str, refs: &ReferenceMap) -> Value {
    let mut body = resource.body.clone();
    apply_tag(&mut body, tag_system, &resource.source_id);
    if let Some(obj) = body.as_object_mut() {
        let keys: Vec<String> = obj
            .keys()
            .filter(|k| k.as_str() != "meta" && k.as_str() != "resourceType")
            .cloned()
            .collect();
        for key in keys {
            let keep = obj.get_mut(&key).map(|v| rewrite(v, refs)).unwrap_or(true);
            if !keep {
                obj.remove(&key);
            }
        }
    }
    body
}

/// Target `Binary` body
pub fn binary_body(binary: &BinaryContent, tag_system: &str) -> Value {
    json!({
        "resourceType": "Binary",
        "meta": {"tag": [tag_coding(tag_system, &binary.source_id)]},
        "contentType": binary.content_type,
        "data": general_purpose::STANDARD.encode(&binary.data),
    })
}

/// Whether the source body referenced its encounter
pub fn references_encounter(source: &Value) -> bool {
    source["encounter"]["reference"].is_string()
        || source["context"]["encounter"]
            .as_array()
            .map(|a| !a.is_empty())
            .unwrap_or(false)
}

/// Target `Patient` body seeded from source demographics
pub fn patient_body(demographics: &PatientDemographics, tag_system: &str, mrn_system: &str) -> Value {
    let mut body = json!({
        "resourceType": "Patient",
        "meta": {"tag": [tag_code(tag_system, demographics.source_id.as_str())]},
    });

    if let Some(mrn) = &demographics.mrn {
        body["identifier"] = json!([{
            "system": mrn_system,
            "value": mrn,
            "type": {"coding": [{
                "system": "http://terminology.hl7.org/CodeSystem/v2-0203",
                "code": "MR"
            }]}
        }]);
    }
    if demographics.family.is_some() || !demographics.given.is_empty() {
        let mut name = json!({"use": "official"});
        if let Some(family) = &demographics.family {
            name["family"] = json!(family);
        }
        if !demographics.given.is_empty() {
            name["given"] = json!(demographics.given);
        }
        body["name"] = json!([name]);
    }
    if let Some(birth_date) = demographics.birth_date {
        body["birthDate"] = json!(birth_date.format("%Y-%m-%d").to_string());
    }
    if let Some(gender) = &demographics.gender {
        body["gender"] = json!(gender);
    }
    body
}

/// Top-level linking resource of a composite record
pub fn linking_body(
    tag_system: &str,
    source_encounter: &SourceId,
    patient: &TargetPatientId,
    encounter: &TargetResourceId,
    members: &[(String, TargetResourceId)],
) -> Value {
    let entries: Vec<Value> = std::iter::once(format!("Encounter/{encounter}"))
        .chain(members.iter().map(|(kind, id)| format!("{kind}/{id}")))
        .map(|reference| json!({"item": {"reference": reference}}))
        .collect();

    json!({
        "resourceType": LINK_RESOURCE_TYPE,
        "meta": {"tag": [tag_coding(tag_system, source_encounter)]},
        "status": "current",
        "mode": "working",
        "title": format!("Mirrored encounter {source_encounter}"),
        "subject": {"reference": patient.reference()},
        "encounter": {"reference": format!("Encounter/{encounter}")},
        "entry": entries,
    })
}
