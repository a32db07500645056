//! Cycle summary and reporting
//!
//! This module defines structures for tracking and reporting the result of a
//! scheduler cycle and of a manual trigger.

use crate::core::sync::PatientReport;
use crate::domain::{FailureDetail, TenantId};
use serde::Serialize;
use std::time::Duration;

/// How a tenant's part of a cycle ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantStatus {
    /// Patients were enumerated and synchronized (individual units may still fail)
    Processed,

    /// Tenant has no EHR integration and was not touched
    Skipped(String),

    /// Tenant-level failure (no credential, roster unavailable)
    Failed(FailureDetail),
}

/// Result for one tenant in one cycle
#[derive(Debug, Clone)]
pub struct TenantReport {
    pub tenant_id: TenantId,
    pub status: TenantStatus,
    pub patients: Vec<PatientReport>,
}

impl TenantReport {
    pub fn processed(tenant_id: TenantId, patients: Vec<PatientReport>) -> Self {
        Self {
            tenant_id,
            status: TenantStatus::Processed,
            patients,
        }
    }

    pub fn skipped(tenant_id: TenantId, reason: impl Into<String>) -> Self {
        Self {
            tenant_id,
            status: TenantStatus::Skipped(reason.into()),
            patients: Vec::new(),
        }
    }

    pub fn failed(tenant_id: TenantId, failure: FailureDetail) -> Self {
        Self {
            tenant_id,
            status: TenantStatus::Failed(failure),
            patients: Vec::new(),
        }
    }
}

/// Summary of a scheduler cycle
#[derive(Debug, Clone, Default)]
pub struct CycleSummary {
    /// Tenants whose patients were synchronized
    pub tenants_processed: usize,

    /// Tenants without an EHR integration
    pub tenants_skipped: usize,

    /// Tenants that failed before any patient ran
    pub tenants_failed: usize,

    /// Patients attempted
    pub patients: usize,

    /// Patients that failed before any unit started
    pub patients_aborted: usize,

    /// Units written and linked
    pub units_synced: usize,

    /// Units already mirrored
    pub units_skipped: usize,

    /// Units that failed
    pub units_failed: usize,

    /// Events handed to the publisher
    pub events: usize,

    /// Duration of the cycle
    pub duration: Duration,

    /// Per-tenant detail
    pub tenants: Vec<TenantReport>,

    /// Failures outside any tenant (tenant listing)
    pub errors: Vec<String>,
}

impl CycleSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one tenant's report into the totals
    pub fn record(&mut self, report: TenantReport) {
        match &report.status {
            TenantStatus::Processed => self.tenants_processed += 1,
            TenantStatus::Skipped(_) => self.tenants_skipped += 1,
            TenantStatus::Failed(_) => self.tenants_failed += 1,
        }
        for patient in &report.patients {
            self.patients += 1;
            if patient.aborted.is_some() {
                self.patients_aborted += 1;
            }
            self.units_synced += patient.synced();
            self.units_skipped += patient.skipped();
            self.units_failed += patient.failed();
            self.events += patient.events;
        }
        self.tenants.push(report);
    }

    pub fn add_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Units attempted (one event each)
    pub fn units(&self) -> usize {
        self.units_synced + self.units_skipped + self.units_failed
    }

    /// Nothing failed at any level
    pub fn is_successful(&self) -> bool {
        self.errors.is_empty()
            && self.tenants_failed == 0
            && self.patients_aborted == 0
            && self.units_failed == 0
    }

    /// Log the summary
    pub fn log_summary(&self) {
        tracing::info!(
            tenants_processed = self.tenants_processed,
            tenants_skipped = self.tenants_skipped,
            tenants_failed = self.tenants_failed,
            patients = self.patients,
            patients_aborted = self.patients_aborted,
            units_synced = self.units_synced,
            units_skipped = self.units_skipped,
            units_failed = self.units_failed,
            events = self.events,
            duration_ms = self.duration.as_millis() as u64,
            "Sync cycle completed"
        );

        for error in &self.errors {
            tracing::warn!(message = %error, "Sync cycle error");
        }
        for tenant in &self.tenants {
            if let TenantStatus::Failed(failure) = &tenant.status {
                tracing::warn!(
                    tenant_id = %tenant.tenant_id,
                    kind = %failure.kind,
                    message = %failure.message,
                    "Tenant failed this cycle"
                );
            }
        }
    }

    /// Human-readable one-liner for operators
    pub fn message(&self) -> String {
        if let Some(error) = self.errors.first() {
            return error.clone();
        }
        format!(
            "{} tenant(s) processed, {} skipped, {} failed; {} unit(s): {} synced, {} duplicate, {} failed",
            self.tenants_processed,
            self.tenants_skipped,
            self.tenants_failed,
            self.units(),
            self.units_synced,
            self.units_skipped,
            self.units_failed,
        )
    }
}

/// Reply of a manual trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantId>,
}

impl TriggerResponse {
    pub fn from_summary(summary: &CycleSummary, tenant_id: Option<TenantId>) -> Self {
        Self {
            success: summary.is_successful(),
            message: summary.message(),
            tenant_id,
        }
    }

    pub fn rejected(message: impl Into<String>, tenant_id: Option<TenantId>) -> Self {
        Self {
            success: false,
            message: message.into(),
            tenant_id,
        }
    }
}
