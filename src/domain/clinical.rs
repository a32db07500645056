//! Clinical record models read from the source EHR
//!
//! Resource bodies stay as opaque FHIR JSON; only the fields the pipeline
//! reasons about (ids, status, timestamps, demographics) are lifted into types.

use super::ids::{PatientId, SourceId};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Encounter statuses that count as completed (R4 `finished`, R5 `completed`)
const COMPLETED_STATUSES: [&str; 2] = ["finished", "completed"];

/// Candidate encounter found in the source EHR
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncounterRef {
    /// Source encounter id
    pub source_id: SourceId,

    /// Source patient the encounter belongs to
    pub patient_id: PatientId,

    /// FHIR encounter status
    pub status: String,

    /// Start of the encounter period
    pub period_start: Option<DateTime<Utc>>,

    /// End of the encounter period
    pub period_end: Option<DateTime<Utc>>,
}

impl EncounterRef {
    /// Builds a reference from an Encounter resource, `None` if it has no id
    pub fn from_resource(resource: &Value, patient_id: &PatientId) -> Option<Self> {
        let source_id = SourceId::new(resource["id"].as_str()?).ok()?;
        Some(Self {
            source_id,
            patient_id: patient_id.clone(),
            status: resource["status"].as_str().unwrap_or_default().to_string(),
            period_start: parse_instant(&resource["period"]["start"]),
            period_end: parse_instant(&resource["period"]["end"]),
        })
    }

    /// Whether the encounter status indicates completion
    pub fn is_completed(&self) -> bool {
        COMPLETED_STATUSES.contains(&self.status.as_str())
    }

    /// Timestamp used for windowing: period end, else period start
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.period_end.or(self.period_start)
    }

    /// Whether the encounter is a candidate for the trailing window ending at `now`
    pub fn is_candidate(&self, now: DateTime<Utc>, window: Duration) -> bool {
        if !self.is_completed() {
            return false;
        }
        match self.timestamp() {
            Some(ts) => ts >= now - window && ts <= now,
            None => false,
        }
    }
}

/// A source resource with its original identifier
#[derive(Debug, Clone, PartialEq)]
pub struct SourceResource {
    /// Source id of the resource
    pub source_id: SourceId,

    /// FHIR resource type
    pub resource_type: String,

    /// Resource body as read from the source
    pub body: Value,
}

impl SourceResource {
    /// Wraps a FHIR resource, `None` if it lacks `id` or `resourceType`
    pub fn from_value(body: Value) -> Option<Self> {
        let source_id = SourceId::new(body["id"].as_str()?).ok()?;
        let resource_type = body["resourceType"].as_str()?.to_string();
        Some(Self {
            source_id,
            resource_type,
            body,
        })
    }
}

/// Raw binary content fetched from the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryContent {
    /// Source Binary id
    pub source_id: SourceId,

    /// MIME type
    pub content_type: String,

    /// Bytes
    pub data: Vec<u8>,
}

/// A related resource that could not be read
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingResource {
    /// Reference as it appeared in the source (`Binary/abc`)
    pub reference: String,

    /// Why it is missing
    pub reason: String,
}

/// Everything read from the source for one encounter
#[derive(Debug, Clone, PartialEq)]
pub struct EncounterBundle {
    /// The encounter itself
    pub encounter: SourceResource,

    /// DocumentReference resources for the encounter
    pub documents: Vec<SourceResource>,

    /// MedicationRequest resources for the encounter
    pub orders: Vec<SourceResource>,

    /// Appointment resources linked from the encounter
    pub appointments: Vec<SourceResource>,

    /// Binary content referenced by the documents
    pub binaries: Vec<BinaryContent>,

    /// Related resources that could not be read
    pub missing: Vec<MissingResource>,
}

impl EncounterBundle {
    /// Bundle holding only the encounter
    pub fn new(encounter: SourceResource) -> Self {
        Self {
            encounter,
            documents: Vec::new(),
            orders: Vec::new(),
            appointments: Vec::new(),
            binaries: Vec::new(),
            missing: Vec::new(),
        }
    }

    /// Records a related resource that could not be read
    pub fn record_missing(&mut self, reference: impl Into<String>, reason: impl Into<String>) {
        self.missing.push(MissingResource {
            reference: reference.into(),
            reason: reason.into(),
        });
    }

    /// Member counts
    pub fn counts(&self) -> ResourceCounts {
        ResourceCounts {
            binaries: self.binaries.len(),
            documents: self.documents.len(),
            orders: self.orders.len(),
            appointments: self.appointments.len(),
        }
    }
}

/// Per-type member counts of a composite record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceCounts {
    pub binaries: usize,
    pub documents: usize,
    pub orders: usize,
    pub appointments: usize,
}

impl ResourceCounts {
    /// Total number of leaf resources
    pub fn total(&self) -> usize {
        self.binaries + self.documents + self.orders + self.appointments
    }
}

/// Source demographic fields used to seed a new target patient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientDemographics {
    /// Source patient id
    pub source_id: PatientId,

    /// Medical record number (external identifier) if present
    pub mrn: Option<String>,

    /// Family name
    pub family: Option<String>,

    /// Given names
    pub given: Vec<String>,

    /// Birth date
    pub birth_date: Option<NaiveDate>,

    /// Administrative gender
    pub gender: Option<String>,
}

impl PatientDemographics {
    /// Extracts demographics from a source Patient resource
    ///
    /// The MRN is the first identifier whose `system` equals `mrn_system`.
    pub fn from_resource(resource: &Value, source_id: &PatientId, mrn_system: &str) -> Self {
        let mrn = resource["identifier"].as_array().and_then(|ids| {
            ids.iter()
                .find(|id| id["system"].as_str() == Some(mrn_system))
                .and_then(|id| id["value"].as_str())
                .map(str::to_string)
        });

        let name = resource["name"]
            .as_array()
            .and_then(|names| {
                names
                    .iter()
                    .find(|n| n["use"].as_str() == Some("official"))
                    .or_else(|| names.first())
            })
            .cloned()
            .unwrap_or(Value::Null);

        let given = name["given"]
            .as_array()
            .map(|g| {
                g.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            source_id: source_id.clone(),
            mrn,
            family: name["family"].as_str().map(str::to_string),
            given,
            birth_date: resource["birthDate"]
                .as_str()
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
            gender: resource["gender"].as_str().map(str::to_string),
        }
    }
}

fn parse_instant(value: &Value) -> Option<DateTime<Utc>> {
    let raw = value.as_str()?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    // FHIR dateTime may be a bare date
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
