//! Cycle driver and cycle reporting

pub mod driver;
pub mod summary;

pub use driver::{Scheduler, SchedulerSettings};
pub use summary::{CycleSummary, TenantReport, TenantStatus, TriggerResponse};
