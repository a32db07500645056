//! Domain models and types for chartsync.
//!
//! # Overview
//!
//! The domain layer provides:
//! - **Strongly-typed identifiers** ([`TenantId`], [`PatientId`], [`SourceId`], ...)
//! - **Tenant and credential models** ([`Tenant`], [`AuthContext`], [`Session`])
//! - **Clinical models** ([`EncounterRef`], [`EncounterBundle`], [`PatientDemographics`])
//! - **Outcome events** ([`SyncEvent`])
//! - **Error types** ([`SyncError`], [`SourceError`], [`TargetError`])
//!
//! # Type Safety
//!
//! ```rust
//! use chartsync::domain::{SourceId, TargetResourceId};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let source = SourceId::new("enc-77")?;
//! let target = TargetResourceId::new("8f1c")?;
//!
//! // This won't compile - source and target ids are distinct types
//! // let wrong: TargetResourceId = source;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod clinical;
pub mod errors;
pub mod event;
pub mod ids;
pub mod result;
pub mod tenant;

pub use auth::{AuthContext, CredentialKind, Session};
pub use clinical::{
    BinaryContent, EncounterBundle, EncounterRef, MissingResource, PatientDemographics,
    ResourceCounts, SourceResource,
};
pub use errors::{FailureDetail, SourceError, SyncError, TargetError};
pub use event::{EventStatus, EventType, SkipReason, SyncEvent};
pub use ids::{PatientId, SourceId, TargetPatientId, TargetResourceId, TenantId};
pub use result::Result;
pub use tenant::{EhrIntegrationKind, PatientRoster, SystemCredential, Tenant};
