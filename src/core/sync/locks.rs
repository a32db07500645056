//! In-process locks keyed by (tenant, patient)
//!
//! Two units for the same patient would otherwise race on patient creation
//! and on the duplicate check. That happens when a manual cycle served by
//! `Scheduler::serve_triggers` overlaps a scheduled one, or when a roster
//! lists a patient twice. The locks only cover one process.

use crate::domain::{PatientId, TenantId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Key = (TenantId, PatientId);

/// Async mutex per key; entries are dropped once nobody holds or waits on them
#[derive(Default)]
pub struct KeyedMutex {
    slots: Mutex<HashMap<Key, Weak<AsyncMutex<()>>>>,
}

impl KeyedMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `(tenant, patient)`
    pub async fn lock(&self, tenant: &TenantId, patient: &PatientId) -> OwnedMutexGuard<()> {
        let slot = self.slot((tenant.clone(), patient.clone()));
        slot.lock_owned().await
    }

    fn slot(&self, key: Key) -> Arc<AsyncMutex<()>> {
        // A poisoned map only means another thread panicked mid-insert
        let mut slots = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slots.retain(|_, weak| weak.strong_count() > 0);
        if let Some(existing) = slots.get(&key).and_then(Weak::upgrade) {
            return existing;
        }
        let fresh = Arc::new(AsyncMutex::new(()));
        slots.insert(key, Arc::downgrade(&fresh));
        fresh
    }

    /// Keys currently held or awaited
    pub fn active(&self) -> usize {
        self.slots
            .lock()
            .map(|slots| slots.values().filter(|w| w.strong_count() > 0).count())
            .unwrap_or(0)
    }
}
