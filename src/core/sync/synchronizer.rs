//! Per-patient synchronization
//!
//! A unit is one (tenant, patient, encounter) attempt. Each unit walks the
//! states below and ends with exactly one outcome event:
//!
//! ```text
//! Discovered -> IdentityResolved -> Checked(New) -> Written -> Linked -> Notified
//!                                \-> Checked(Duplicate) -----------------> Notified
//! ```
//!
//! Any failure after `Discovered` jumps straight to `Notified` with a failed
//! payload. Failures before any unit exists (credential, encounter listing)
//! end in `Aborted` and produce one patient-level failed event.

use super::guard::DuplicateGuard;
use super::identity::IdentityReconciler;
use super::locks::KeyedMutex;
use super::plan::WritePlan;
use super::reader::SourceReader;
use super::writer::CompositeWriter;
use crate::core::credentials::CredentialLease;
use crate::core::events::EventPublisher;
use crate::domain::{
    EncounterRef, EventStatus, FailureDetail, PatientId, ResourceCounts, Result, SourceId,
    SyncError, SyncEvent, TargetPatientId, TargetResourceId, Tenant,
};
use crate::log_unit_outcome;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

/// Result of the duplicate check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Duplicate,
    New,
}

/// Lifecycle of one unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Discovered,
    IdentityResolved,
    Checked(CheckOutcome),
    Written,
    Linked,
    Notified(EventStatus),
    Aborted,
}

impl UnitState {
    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(&self, next: UnitState) -> bool {
        use UnitState::*;
        match (self, next) {
            (Discovered, IdentityResolved) | (Discovered, Aborted) => true,
            (IdentityResolved, Checked(_)) => true,
            (Checked(CheckOutcome::New), Written) => true,
            (Checked(CheckOutcome::Duplicate), Notified(EventStatus::Success)) => true,
            (Written, Linked) => true,
            (Linked, Notified(EventStatus::Success)) => true,
            (Notified(_), _) | (Aborted, _) => false,
            // any failure once the unit is running is still notified
            (_, Notified(EventStatus::Failed)) => true,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UnitState::Notified(_) | UnitState::Aborted)
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitState::Discovered => write!(f, "discovered"),
            UnitState::IdentityResolved => write!(f, "identity_resolved"),
            UnitState::Checked(CheckOutcome::Duplicate) => write!(f, "checked_duplicate"),
            UnitState::Checked(CheckOutcome::New) => write!(f, "checked_new"),
            UnitState::Written => write!(f, "written"),
            UnitState::Linked => write!(f, "linked"),
            UnitState::Notified(status) => write!(f, "notified_{}", status.as_str()),
            UnitState::Aborted => write!(f, "aborted"),
        }
    }
}

/// Tracks the state of one unit and rejects illegal transitions
#[derive(Debug)]
struct UnitTracker {
    encounter: SourceId,
    state: UnitState,
}

impl UnitTracker {
    fn new(encounter: SourceId) -> Self {
        Self {
            encounter,
            state: UnitState::Discovered,
        }
    }

    fn advance(&mut self, next: UnitState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(SyncError::Other(format!(
                "illegal unit transition {} -> {} for encounter {}",
                self.state, next, self.encounter
            )));
        }
        tracing::trace!(
            source_encounter_id = %self.encounter,
            from = %self.state,
            to = %next,
            "Unit state transition"
        );
        self.state = next;
        Ok(())
    }

    /// Moves to `Notified(status)`; an illegal move is a bug in the unit flow
    fn notify(&mut self, status: EventStatus) {
        if let Err(e) = self.advance(UnitState::Notified(status)) {
            tracing::error!(
                source_encounter_id = %self.encounter,
                state = %self.state,
                error = %e,
                "Unit notified from an unexpected state"
            );
            debug_assert!(false, "{e}");
        }
    }
}

/// How far a unit got when nothing failed
enum Progress {
    Written(TargetResourceId, ResourceCounts),
    Duplicate(Option<TargetResourceId>),
}

/// Terminal result of one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Synced {
        source_encounter_id: SourceId,
        target_encounter_id: TargetResourceId,
        counts: ResourceCounts,
    },
    SkippedDuplicate {
        source_encounter_id: SourceId,
        target_encounter_id: Option<TargetResourceId>,
    },
    Failed {
        source_encounter_id: SourceId,
        failure: FailureDetail,
    },
}

impl UnitOutcome {
    fn label(&self) -> &'static str {
        match self {
            UnitOutcome::Synced { .. } => "synced",
            UnitOutcome::SkippedDuplicate { .. } => "skipped_duplicate",
            UnitOutcome::Failed { .. } => "failed",
        }
    }
}

/// Everything that happened for one patient in one pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientReport {
    pub patient_id: PatientId,

    /// Set when the patient failed before any unit could start
    pub aborted: Option<FailureDetail>,

    pub units: Vec<UnitOutcome>,

    /// Events handed to the publisher
    pub events: usize,
}

impl PatientReport {
    fn new(patient_id: PatientId) -> Self {
        Self {
            patient_id,
            aborted: None,
            units: Vec::new(),
            events: 0,
        }
    }

    pub fn synced(&self) -> usize {
        self.count(|u| matches!(u, UnitOutcome::Synced { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|u| matches!(u, UnitOutcome::SkippedDuplicate { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|u| matches!(u, UnitOutcome::Failed { .. }))
    }

    /// Whether anything for this patient failed
    pub fn has_failures(&self) -> bool {
        self.aborted.is_some() || self.failed() > 0
    }

    fn count(&self, pred: impl Fn(&UnitOutcome) -> bool) -> usize {
        self.units.iter().filter(|u| pred(u)).count()
    }
}

/// Runs every candidate encounter of a patient through the pipeline
pub struct Synchronizer {
    reader: SourceReader,
    guard: DuplicateGuard,
    identity: Arc<IdentityReconciler>,
    writer: CompositeWriter,
    publisher: Arc<EventPublisher>,
    locks: Arc<KeyedMutex>,
}

impl Synchronizer {
    pub fn new(
        reader: SourceReader,
        guard: DuplicateGuard,
        identity: Arc<IdentityReconciler>,
        writer: CompositeWriter,
        publisher: Arc<EventPublisher>,
        locks: Arc<KeyedMutex>,
    ) -> Self {
        Self {
            reader,
            guard,
            identity,
            writer,
            publisher,
            locks,
        }
    }

    pub fn reader(&self) -> &SourceReader {
        &self.reader
    }

    /// Synchronizes one patient; never fails, every failure is in the report
    pub async fn sync_patient(
        &self,
        tenant: &Tenant,
        patient: &PatientId,
        lease: &CredentialLease,
        now: DateTime<Utc>,
    ) -> PatientReport {
        let _lock = self.locks.lock(&tenant.id, patient).await;
        let mut report = PatientReport::new(patient.clone());

        let encounters = match self.list_encounters(tenant, patient, lease, now).await {
            Ok(encounters) => encounters,
            Err(e) => {
                let failure = FailureDetail::from_error(&e);
                tracing::warn!(
                    tenant_id = %tenant.id,
                    patient_id = %patient,
                    state = %UnitState::Aborted,
                    error = %e,
                    "Patient aborted before any unit started"
                );
                self.publisher
                    .publish(
                        tenant,
                        SyncEvent::failed(tenant.id.clone(), patient.clone(), None, &failure),
                    )
                    .await;
                report.events += 1;
                report.aborted = Some(failure);
                return report;
            }
        };

        if encounters.is_empty() {
            tracing::debug!(tenant_id = %tenant.id, patient_id = %patient, "No candidate encounters");
            return report;
        }

        // Resolved once, on the first unit that needs it
        let mut identity: Option<TargetPatientId> = None;
        for encounter in &encounters {
            let outcome = self
                .run_unit(tenant, patient, encounter, lease, &mut identity)
                .await;
            log_unit_outcome!(tenant.id, patient, encounter.source_id, outcome.label());
            report.events += 1;
            report.units.push(outcome);
        }
        report
    }

    async fn list_encounters(
        &self,
        tenant: &Tenant,
        patient: &PatientId,
        lease: &CredentialLease,
        now: DateTime<Utc>,
    ) -> Result<Vec<EncounterRef>> {
        let auth = lease.current().await?;
        self.reader
            .list_candidate_encounters(tenant, patient, &auth, now)
            .await
    }

    /// One unit from `Discovered` to `Notified`; emits exactly one event
    async fn run_unit(
        &self,
        tenant: &Tenant,
        patient: &PatientId,
        encounter: &EncounterRef,
        lease: &CredentialLease,
        identity: &mut Option<TargetPatientId>,
    ) -> UnitOutcome {
        let mut tracker = UnitTracker::new(encounter.source_id.clone());
        let result = self
            .advance_unit(tenant, patient, encounter, lease, identity, &mut tracker)
            .await;

        let (outcome, event) = match result {
            Ok(Progress::Written(target_encounter_id, counts)) => (
                UnitOutcome::Synced {
                    source_encounter_id: encounter.source_id.clone(),
                    target_encounter_id: target_encounter_id.clone(),
                    counts,
                },
                SyncEvent::synced(
                    tenant.id.clone(),
                    patient.clone(),
                    encounter.source_id.clone(),
                    target_encounter_id,
                    counts,
                ),
            ),
            Ok(Progress::Duplicate(target_encounter_id)) => (
                UnitOutcome::SkippedDuplicate {
                    source_encounter_id: encounter.source_id.clone(),
                    target_encounter_id: target_encounter_id.clone(),
                },
                SyncEvent::skipped_duplicate(
                    tenant.id.clone(),
                    patient.clone(),
                    encounter.source_id.clone(),
                    target_encounter_id,
                ),
            ),
            Err(e) => {
                let failure = FailureDetail::from_error(&e);
                tracing::warn!(
                    tenant_id = %tenant.id,
                    patient_id = %patient,
                    source_encounter_id = %encounter.source_id,
                    state = %tracker.state,
                    error = %e,
                    "Unit failed"
                );
                let event = SyncEvent::failed(
                    tenant.id.clone(),
                    patient.clone(),
                    Some(encounter.source_id.clone()),
                    &failure,
                );
                (
                    UnitOutcome::Failed {
                        source_encounter_id: encounter.source_id.clone(),
                        failure,
                    },
                    event,
                )
            }
        };

        tracker.notify(event.status);
        self.publisher.publish(tenant, event).await;
        outcome
    }

    async fn advance_unit(
        &self,
        tenant: &Tenant,
        patient: &PatientId,
        encounter: &EncounterRef,
        lease: &CredentialLease,
        identity: &mut Option<TargetPatientId>,
        tracker: &mut UnitTracker,
    ) -> Result<Progress> {
        let auth = lease.current().await?;

        let target_patient = match identity {
            Some(id) => id.clone(),
            None => {
                let demographics = self.reader.read_patient(tenant, patient, &auth).await?;
                let id = self
                    .identity
                    .find_or_create_patient(tenant, &demographics)
                    .await?;
                *identity = Some(id.clone());
                id
            }
        };
        tracker.advance(UnitState::IdentityResolved)?;

        if let Some(existing) = self
            .guard
            .find_link(&tenant.id, &encounter.source_id)
            .await?
        {
            tracker.advance(UnitState::Checked(CheckOutcome::Duplicate))?;
            tracing::debug!(
                tenant_id = %tenant.id,
                source_encounter_id = %encounter.source_id,
                link_id = %existing.link_id,
                "Encounter already mirrored"
            );
            return Ok(Progress::Duplicate(existing.target_encounter_id));
        }
        tracker.advance(UnitState::Checked(CheckOutcome::New))?;

        let bundle = self
            .reader
            .fetch_encounter_resources(tenant, encounter, &auth)
            .await?;
        let plan = WritePlan::for_bundle(&bundle, self.writer.mode());
        let result = self
            .writer
            .write_composite(&tenant.id, &bundle, patient, &target_patient, &plan)
            .await?;
        tracker.advance(UnitState::Written)?;
        tracker.advance(UnitState::Linked)?;

        tracing::info!(
            tenant_id = %tenant.id,
            source_encounter_id = %encounter.source_id,
            target_encounter_id = %result.target_encounter_id,
            link_id = %result.link_id,
            written = result.written,
            missing = bundle.missing.len(),
            "Composite record written"
        );
        Ok(Progress::Written(result.target_encounter_id, result.counts))
    }
}
