//! The synchronization pipeline for one patient
//!
//! - [`reader`] - source reads scoped by tenant and patient
//! - [`identity`] - find-or-create of the target patient
//! - [`guard`] - duplicate detection by Mirrored-Record Tag
//! - [`mapping`] - source-to-target resource bodies
//! - [`plan`] - explicit write order of a composite record
//! - [`writer`] - composite record writes
//! - [`locks`] - per-(tenant, patient) serialization
//! - [`synchronizer`] - the per-unit state machine tying it together

pub mod guard;
pub mod identity;
pub mod locks;
pub mod mapping;
pub mod plan;
pub mod reader;
pub mod synchronizer;
pub mod writer;

pub use guard::{DuplicateGuard, MirroredRecord};
pub use identity::IdentityReconciler;
pub use locks::KeyedMutex;
pub use plan::{WritePlan, WriteStep};
pub use reader::SourceReader;
pub use synchronizer::{CheckOutcome, PatientReport, Synchronizer, UnitOutcome, UnitState};
pub use writer::{CompositeResult, CompositeWriter};
