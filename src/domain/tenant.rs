//! Tenant model
//!
//! A tenant is an isolated hospital customer. Tenants are created by
//! configuration and are read-only to the pipeline.

use super::ids::{PatientId, TenantId};
use crate::config::SecretString;
use serde::{Deserialize, Serialize};

/// Kind of EHR integration a tenant has
///
/// A tenant without an integration is valid and is skipped entirely by the
/// scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EhrIntegrationKind {
    /// FHIR R4 REST API
    Fhir,
}

impl std::fmt::Display for EhrIntegrationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EhrIntegrationKind::Fhir => write!(f, "fhir"),
        }
    }
}

/// Unattended, tenant-level credential (OAuth2 client credentials)
#[derive(Debug, Clone)]
pub struct SystemCredential {
    /// Token endpoint of the source EHR's authorization server
    pub token_url: String,

    /// OAuth2 client id
    pub client_id: String,

    /// OAuth2 client secret
    pub client_secret: SecretString,

    /// Requested scope (space separated)
    pub scope: Option<String>,
}

/// How a tenant's patients are enumerated
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PatientRoster {
    /// Query the source EHR for the patient list first
    pub discoverable: bool,

    /// Statically configured patients, used directly or as the discovery fallback
    pub static_patients: Vec<PatientId>,
}

impl PatientRoster {
    /// Roster with only a static patient list
    pub fn fixed(patients: Vec<PatientId>) -> Self {
        Self {
            discoverable: false,
            static_patients: patients,
        }
    }

    /// Roster discovered from the source EHR, falling back to `fallback`
    pub fn discoverable(fallback: Vec<PatientId>) -> Self {
        Self {
            discoverable: true,
            static_patients: fallback,
        }
    }
}

/// An isolated hospital customer
#[derive(Debug, Clone)]
pub struct Tenant {
    /// Tenant identifier
    pub id: TenantId,

    /// Display name
    pub name: String,

    /// EHR integration kind, `None` means "skip this tenant"
    pub integration: Option<EhrIntegrationKind>,

    /// Base URL of the tenant's source EHR FHIR endpoint
    pub source_base_url: String,

    /// Identifier system of the medical record number used for reconciliation
    pub mrn_system: String,

    /// Unattended credential, if the tenant has one
    pub system_credential: Option<SystemCredential>,

    /// Message-bus topic override
    pub topic: Option<String>,

    /// Patient roster
    pub roster: PatientRoster,
}

impl Tenant {
    /// Resolves the message-bus topic for this tenant
    ///
    /// Uses the explicit override if configured, otherwise `{prefix}-{tenant_id}`.
    pub fn topic_name(&self, prefix: &str) -> String {
        match &self.topic {
            Some(topic) => topic.clone(),
            None if prefix.is_empty() => self.id.to_string(),
            None => format!("{}-{}", prefix, self.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(topic: Option<&str>) -> Tenant {
        Tenant {
            id: TenantId::new("acme").unwrap(),
            name: "Acme General".to_string(),
            integration: Some(EhrIntegrationKind::Fhir),
            source_base_url: "https://ehr.acme.example/fhir".to_string(),
            mrn_system: "urn:acme:mrn".to_string(),
            system_credential: None,
            topic: topic.map(str::to_string),
            roster: PatientRoster::default(),
        }
    }

    #[test]
    fn test_topic_name_default() {
        assert_eq!(tenant(None).topic_name("chartsync"), "chartsync-acme");
        assert_eq!(tenant(None).topic_name(""), "acme");
    }

    #[test]
    fn test_topic_name_override() {
        assert_eq!(tenant(Some("acme-events")).topic_name("chartsync"), "acme-events");
    }

    #[test]
    fn test_integration_kind_serde() {
        let kind: EhrIntegrationKind = serde_json::from_str("\"fhir\"").unwrap();
        assert_eq!(kind, EhrIntegrationKind::Fhir);
        assert_eq!(kind.to_string(), "fhir");
    }
}
