//! Periodic and manual sync cycles
//!
//! A cycle enumerates tenants, resolves each tenant's credential, enumerates
//! its patients and hands every patient to the [`Synchronizer`]. Tenants run
//! concurrently up to `max_parallel_tenants`; patients within a tenant up to
//! `max_parallel_patients`. A failing tenant or patient never stops the others.

use super::summary::{CycleSummary, TenantReport, TriggerResponse};
use crate::adapters::TenantDirectory;
use crate::config::SchedulerConfig;
use crate::core::credentials::{CredentialLease, CredentialResolver};
use crate::core::sync::{PatientReport, Synchronizer};
use crate::domain::{
    FailureDetail, PatientId, PatientRoster, Result, SyncError, Tenant, TenantId,
};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

/// Scheduler knobs taken from `[scheduler]`
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub interval: Duration,
    pub max_parallel_tenants: usize,
    pub max_parallel_patients: usize,
    pub run_on_start: bool,
    pub credential_refresh_skew: chrono::Duration,
}

impl SchedulerSettings {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_seconds),
            max_parallel_tenants: config.max_parallel_tenants.max(1),
            max_parallel_patients: config.max_parallel_patients.max(1),
            run_on_start: config.run_on_start,
            credential_refresh_skew: config.credential_refresh_skew(),
        }
    }
}

/// Drives sync cycles
pub struct Scheduler {
    directory: Arc<dyn TenantDirectory>,
    resolver: Arc<CredentialResolver>,
    synchronizer: Arc<Synchronizer>,
    settings: SchedulerSettings,
}

impl Scheduler {
    pub fn new(
        directory: Arc<dyn TenantDirectory>,
        resolver: Arc<CredentialResolver>,
        synchronizer: Arc<Synchronizer>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            directory,
            resolver,
            synchronizer,
            settings,
        }
    }

    /// Runs cycles every interval until `shutdown` turns `true`
    ///
    /// A cycle in progress is never interrupted; shutdown takes effect between
    /// cycles. Returns the number of cycles run.
    pub async fn run_periodic(&self, mut shutdown: watch::Receiver<bool>) -> usize {
        let mut interval = tokio::time::interval(self.settings.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        if !self.settings.run_on_start {
            // the first tick completes immediately
            interval.tick().await;
        }

        tracing::info!(
            interval_secs = self.settings.interval.as_secs(),
            max_parallel_tenants = self.settings.max_parallel_tenants,
            "Scheduler started"
        );

        let mut cycles = 0;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    let summary = self.run_cycle(None).await;
                    summary.log_summary();
                    cycles += 1;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!(cycles, "Scheduler stopped");
        cycles
    }

    /// Runs a manual cycle for every request until `shutdown` turns `true`
    /// or every sender is dropped
    ///
    /// Meant to run beside [`Scheduler::run_periodic`]: manual and scheduled
    /// cycles of one process share the per-patient locks and the identity
    /// cache. A request in progress always finishes. Returns the number of
    /// requests served.
    pub async fn serve_triggers(
        &self,
        mut requests: mpsc::Receiver<Option<TenantId>>,
        mut shutdown: watch::Receiver<bool>,
    ) -> usize {
        let mut served = 0;
        loop {
            tokio::select! {
                request = requests.recv() => {
                    let Some(tenant_id) = request else { break };
                    let response = self.trigger(tenant_id).await;
                    tracing::info!(
                        success = response.success,
                        outcome = %response.message,
                        "Manual cycle finished"
                    );
                    served += 1;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        served
    }

    /// Manual cycle, optionally limited to one tenant
    ///
    /// Never fails: every problem is reported in the response.
    pub async fn trigger(&self, tenant_id: Option<TenantId>) -> TriggerResponse {
        if let Some(id) = &tenant_id {
            match self.directory.get_tenant(id).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    return TriggerResponse::rejected(format!("Unknown tenant '{id}'"), tenant_id)
                }
                Err(e) => {
                    return TriggerResponse::rejected(
                        format!("Tenant lookup failed: {e}"),
                        tenant_id,
                    )
                }
            }
        }

        tracing::info!(tenant_id = ?tenant_id.as_ref().map(TenantId::as_str), "Manual sync triggered");
        let summary = self.run_cycle(tenant_id.as_ref()).await;
        summary.log_summary();
        TriggerResponse::from_summary(&summary, tenant_id)
    }

    /// One cycle over every tenant (or only `filter`)
    pub async fn run_cycle(&self, filter: Option<&TenantId>) -> CycleSummary {
        let started = Instant::now();
        let now = Utc::now();
        let mut summary = CycleSummary::new();

        let tenant_ids = match self.directory.list_tenant_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list tenants");
                summary.add_error(format!("Failed to list tenants: {e}"));
                return summary.with_duration(started.elapsed());
            }
        };
        let selected: Vec<TenantId> = tenant_ids
            .into_iter()
            .filter(|id| filter.map_or(true, |f| f == id))
            .collect();
        if let (Some(f), true) = (filter, selected.is_empty()) {
            summary.add_error(format!("Unknown tenant '{f}'"));
        }

        let mut reports: Vec<TenantReport> = stream::iter(selected)
            .map(|id| self.run_tenant(id, now))
            .buffer_unordered(self.settings.max_parallel_tenants)
            .collect()
            .await;
        reports.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
        for report in reports {
            summary.record(report);
        }
        summary.with_duration(started.elapsed())
    }

    async fn run_tenant(&self, tenant_id: TenantId, now: DateTime<Utc>) -> TenantReport {
        let tenant = match self.load_tenant(&tenant_id).await {
            Ok(Some(tenant)) => tenant,
            Ok(None) => {
                tracing::info!(tenant_id = %tenant_id, "Tenant has no EHR integration, skipping");
                return TenantReport::skipped(tenant_id, "no EHR integration");
            }
            Err(e) => return self.tenant_failed(tenant_id, &e),
        };

        let auth = match self.resolver.resolve(&tenant, now).await {
            Ok(auth) => auth,
            Err(e) => return self.tenant_failed(tenant_id, &e),
        };
        let lease = CredentialLease::new(
            tenant.clone(),
            Arc::clone(&self.resolver),
            self.settings.credential_refresh_skew,
            auth,
        );

        let patients = match self.enumerate_patients(&tenant, &lease, now).await {
            Ok(patients) => patients,
            Err(e) => return self.tenant_failed(tenant_id, &e),
        };
        tracing::info!(
            tenant_id = %tenant_id,
            patients = patients.len(),
            "Synchronizing tenant"
        );

        let tenant = &tenant;
        let lease = &lease;
        let reports: Vec<PatientReport> = stream::iter(patients)
            .map(|patient| async move {
                self.synchronizer
                    .sync_patient(tenant, &patient, lease, now)
                    .await
            })
            .buffer_unordered(self.settings.max_parallel_patients)
            .collect()
            .await;
        TenantReport::processed(tenant_id, reports)
    }

    /// `Ok(None)` for tenants without an EHR integration
    async fn load_tenant(&self, tenant_id: &TenantId) -> Result<Option<Tenant>> {
        if self
            .directory
            .get_ehr_integration_kind(tenant_id)
            .await?
            .is_none()
        {
            return Ok(None);
        }
        let tenant = self.directory.get_tenant(tenant_id).await?.ok_or_else(|| {
            SyncError::Configuration(format!("Tenant '{tenant_id}' disappeared from directory"))
        })?;
        Ok(Some(tenant))
    }

    /// Discovered roster, else the static roster, else `DiscoveryFailure`
    async fn enumerate_patients(
        &self,
        tenant: &Tenant,
        lease: &CredentialLease,
        now: DateTime<Utc>,
    ) -> Result<Vec<PatientId>> {
        let roster: PatientRoster = self.directory.get_patient_roster(&tenant.id).await?;
        if !roster.discoverable {
            return Ok(roster.static_patients);
        }

        let discovered = match lease.current().await {
            Ok(auth) => {
                self.synchronizer
                    .reader()
                    .discover_patients(tenant, &auth, now)
                    .await
            }
            Err(e) => Err(e),
        };
        match discovered {
            Ok(patients) => Ok(patients),
            Err(e) if !roster.static_patients.is_empty() => {
                tracing::warn!(
                    tenant_id = %tenant.id,
                    error = %e,
                    fallback = roster.static_patients.len(),
                    "Patient discovery failed, using static roster"
                );
                Ok(roster.static_patients)
            }
            Err(e) => Err(SyncError::DiscoveryFailure {
                tenant_id: tenant.id.to_string(),
                message: e.to_string(),
            }),
        }
    }

    fn tenant_failed(&self, tenant_id: TenantId, error: &SyncError) -> TenantReport {
        tracing::warn!(
            tenant_id = %tenant_id,
            kind = error.kind(),
            error = %error,
            "Skipping tenant for this cycle"
        );
        TenantReport::failed(tenant_id, FailureDetail::from_error(error))
    }
}
