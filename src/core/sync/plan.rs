//! Ordered write plan for one composite record
//!
//! The plan makes the write order explicit: leaves first (binaries, documents,
//! orders, appointments), then the encounter, then back-references onto the
//! encounter, and the linking resource last. Every reference in a resource
//! written later points at something written earlier.

use crate::config::WriteMode;
use crate::domain::EncounterBundle;
use std::fmt;

/// One write in a composite record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStep {
    /// `bundle.binaries[i]`
    Binary(usize),
    /// `bundle.documents[i]`
    Document(usize),
    /// `bundle.orders[i]`
    Order(usize),
    /// `bundle.appointments[i]`
    Appointment(usize),
    Encounter,
    /// Points documents and orders at the written encounter
    BackReferences,
    /// Top-level linking resource; its presence marks the composite complete
    Link,
}

impl WriteStep {
    /// Position of the step's stage in the required order
    pub fn stage(&self) -> u8 {
        match self {
            WriteStep::Binary(_) => 0,
            WriteStep::Document(_) => 1,
            WriteStep::Order(_) => 2,
            WriteStep::Appointment(_) => 3,
            WriteStep::Encounter => 4,
            WriteStep::BackReferences => 5,
            WriteStep::Link => 6,
        }
    }
}

impl fmt::Display for WriteStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteStep::Binary(i) => write!(f, "Binary[{i}]"),
            WriteStep::Document(i) => write!(f, "DocumentReference[{i}]"),
            WriteStep::Order(i) => write!(f, "MedicationRequest[{i}]"),
            WriteStep::Appointment(i) => write!(f, "Appointment[{i}]"),
            WriteStep::Encounter => write!(f, "Encounter"),
            WriteStep::BackReferences => write!(f, "BackReferences"),
            WriteStep::Link => write!(f, "Link"),
        }
    }
}

/// Ordered steps for writing one [`EncounterBundle`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WritePlan {
    steps: Vec<WriteStep>,
}

impl WritePlan {
    /// Builds the plan for `bundle`
    ///
    /// In transaction mode the back-references resolve inside the bundle, so
    /// no separate step is planned for them.
    pub fn for_bundle(bundle: &EncounterBundle, mode: WriteMode) -> Self {
        let mut steps = Vec::new();
        steps.extend((0..bundle.binaries.len()).map(WriteStep::Binary));
        steps.extend((0..bundle.documents.len()).map(WriteStep::Document));
        steps.extend((0..bundle.orders.len()).map(WriteStep::Order));
        steps.extend((0..bundle.appointments.len()).map(WriteStep::Appointment));
        steps.push(WriteStep::Encounter);
        if mode == WriteMode::Sequential {
            steps.push(WriteStep::BackReferences);
        }
        steps.push(WriteStep::Link);
        Self { steps }
    }

    pub fn steps(&self) -> &[WriteStep] {
        &self.steps
    }

    /// Steps before the linking resource
    pub fn member_steps(&self) -> impl Iterator<Item = &WriteStep> {
        self.steps.iter().filter(|s| **s != WriteStep::Link)
    }

    /// Checks stage order and that the plan ends with exactly one Link
    pub fn validate(&self) -> Result<(), String> {
        if let Some(pair) = self.steps.windows(2).find(|w| w[0].stage() > w[1].stage()) {
            return Err(format!("{} planned before {}", pair[0], pair[1]));
        }
        let links = self.steps.iter().filter(|s| **s == WriteStep::Link).count();
        if links != 1 || self.steps.last() != Some(&WriteStep::Link) {
            return Err("plan must end with exactly one Link step".to_string());
        }
        if !self.steps.contains(&WriteStep::Encounter) {
            return Err("plan has no Encounter step".to_string());
        }
        Ok(())
    }

    #[cfg(test)]
    fn from_steps(steps: Vec<WriteStep>) -> Self {
        Self { steps }
    }
}
