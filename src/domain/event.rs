//! Outcome events published to the message bus

use super::clinical::ResourceCounts;
use super::errors::FailureDetail;
use super::ids::{PatientId, SourceId, TargetResourceId, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of unit the event reports on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    /// One (tenant, patient, encounter) unit
    #[serde(rename = "encounter.sync")]
    EncounterSync,
    /// A patient aborted before any encounter unit could start
    #[serde(rename = "patient.sync")]
    PatientSync,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::EncounterSync => "encounter.sync",
            EventType::PatientSync => "patient.sync",
        }
    }
}

/// Outcome status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Success,
    Failed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Success => "success",
            EventStatus::Failed => "failed",
        }
    }
}

/// Marker on a success that performed no writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkipReason {
    /// The encounter was already mirrored
    Duplicate,
}

/// JSON event envelope, one per attempted unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub tenant_id: TenantId,
    pub patient_id: PatientId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_encounter_id: Option<SourceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_encounter_id: Option<TargetResourceId>,
    pub status: EventStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_counts: Option<ResourceCounts>,
}

impl SyncEvent {
    /// Encounter written and linked
    pub fn synced(
        tenant_id: TenantId,
        patient_id: PatientId,
        source_encounter_id: SourceId,
        target_encounter_id: TargetResourceId,
        counts: ResourceCounts,
    ) -> Self {
        Self {
            event_type: EventType::EncounterSync,
            timestamp: Utc::now(),
            tenant_id,
            patient_id,
            source_encounter_id: Some(source_encounter_id),
            target_encounter_id: Some(target_encounter_id),
            status: EventStatus::Success,
            skipped: None,
            error: None,
            resource_counts: Some(counts),
        }
    }

    /// Encounter already mirrored, nothing written
    ///
    /// `target_encounter_id` comes from the existing linking resource.
    pub fn skipped_duplicate(
        tenant_id: TenantId,
        patient_id: PatientId,
        source_encounter_id: SourceId,
        target_encounter_id: Option<TargetResourceId>,
    ) -> Self {
        Self {
            event_type: EventType::EncounterSync,
            timestamp: Utc::now(),
            tenant_id,
            patient_id,
            source_encounter_id: Some(source_encounter_id),
            target_encounter_id,
            status: EventStatus::Success,
            skipped: Some(SkipReason::Duplicate),
            error: None,
            resource_counts: None,
        }
    }

    /// Unit failed; `source_encounter_id` is `None` for patient-level aborts
    pub fn failed(
        tenant_id: TenantId,
        patient_id: PatientId,
        source_encounter_id: Option<SourceId>,
        failure: &FailureDetail,
    ) -> Self {
        let event_type = if source_encounter_id.is_some() {
            EventType::EncounterSync
        } else {
            EventType::PatientSync
        };
        Self {
            event_type,
            timestamp: Utc::now(),
            tenant_id,
            patient_id,
            source_encounter_id,
            target_encounter_id: None,
            status: EventStatus::Failed,
            skipped: None,
            error: Some(failure.to_string()),
            resource_counts: None,
        }
    }

    /// Whether this is a success with a skip marker
    pub fn is_skipped(&self) -> bool {
        self.skipped.is_some()
    }

    /// Attributes duplicated onto message metadata for subscriber filtering
    pub fn attributes(&self) -> BTreeMap<String, String> {
        let mut attrs = BTreeMap::new();
        attrs.insert("eventType".to_string(), self.event_type.as_str().to_string());
        attrs.insert("tenantId".to_string(), self.tenant_id.to_string());
        attrs.insert("status".to_string(), self.status.as_str().to_string());
        if let Some(source_id) = &self.source_encounter_id {
            attrs.insert("sourceEncounterId".to_string(), source_id.to_string());
        }
        if self.is_skipped() {
            attrs.insert("skipped".to_string(), "duplicate".to_string());
        }
        attrs
    }
}
