//! Core business logic for chartsync.
//!
//! # Modules
//!
//! - [`credentials`] - per-tenant choice between provider session and system credential
//! - [`sync`] - the per-patient pipeline (read, reconcile, check, write, link)
//! - [`events`] - background publishing of outcome events
//! - [`scheduler`] - periodic and manual cycles over all tenants
//! - [`pipeline`] - wiring of collaborators into a runnable scheduler
//!
//! # Sync Workflow
//!
//! For every tenant with an EHR integration:
//!
//! 1. **Resolve credential**: live provider session if any, else the system credential
//! 2. **Enumerate patients**: discovery query, falling back to the static roster
//! 3. **List encounters**: completed encounters inside the trailing window
//! 4. **Reconcile identity**: find or create the target patient
//! 5. **Check duplicates**: skip encounters whose linking resource exists
//! 6. **Write**: leaves, encounter, back-references, then the linking resource
//! 7. **Notify**: one event per unit, published in the background
//!
//! # Example
//!
//! ```rust,no_run
//! use chartsync::config::load_config;
//! use chartsync::core::pipeline::Pipeline;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("chartsync.toml")?;
//! let pipeline = Pipeline::from_config(&config)?;
//!
//! let response = pipeline.scheduler().trigger(None).await;
//! println!("{}", response.message);
//!
//! pipeline.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod credentials;
pub mod events;
pub mod pipeline;
pub mod scheduler;
pub mod sync;
