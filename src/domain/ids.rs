//! Domain identifier types with validation
//!
//! Newtype wrappers keep tenant, source and target identifiers from being mixed
//! up: a source encounter id can never be passed where a target resource id is
//! expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            #[doc = concat!("Creates a new ", $label, ", rejecting blank values")]
            pub fn new(id: impl Into<String>) -> Result<Self, String> {
                let id = id.into();
                let trimmed = id.trim();
                if trimmed.is_empty() {
                    return Err(concat!($label, " cannot be empty").to_string());
                }
                Ok(Self(trimmed.to_string()))
            }

            #[doc = concat!("Returns the ", $label, " as a string slice")]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consumes self and returns the inner String
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifier of an isolated hospital customer
    ///
    /// ```
    /// use chartsync::domain::ids::TenantId;
    ///
    /// let tenant = TenantId::new("acme").unwrap();
    /// assert_eq!(tenant.as_str(), "acme");
    /// ```
    TenantId,
    "Tenant ID"
);

string_id!(
    /// Patient identifier in the source EHR
    PatientId,
    "Patient ID"
);

string_id!(
    /// Patient resource identifier in the target store
    TargetPatientId,
    "Target patient ID"
);

string_id!(
    /// Identifier of a record in the source EHR (encounter, document, binary, ...)
    ///
    /// This is the value carried by the Mirrored-Record Tag.
    SourceId,
    "Source ID"
);

string_id!(
    /// Logical id of a resource written to the target store
    TargetResourceId,
    "Target resource ID"
);

impl TargetPatientId {
    /// FHIR relative reference (`Patient/{id}`)
    pub fn reference(&self) -> String {
        format!("Patient/{}", self.0)
    }
}

impl SourceId {
    /// Parses the id out of a FHIR relative reference such as `Binary/abc`
    ///
    /// Absolute URLs are accepted too; only the last two path segments are used.
    /// Returns `None` if the reference is not of the expected resource type.
    pub fn from_reference(reference: &str, resource_type: &str) -> Option<Self> {
        let trimmed = reference.trim_end_matches('/');
        let mut parts = trimmed.rsplit('/');
        let id = parts.next()?;
        let kind = parts.next()?;
        if kind != resource_type {
            return None;
        }
        Self::new(id).ok()
    }
}
