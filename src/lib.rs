// chartsync - EHR encounter mirroring service
// Copyright (c) 2025 Chartsync Contributors
// Licensed under the MIT License

//! # chartsync - EHR encounter mirroring
//!
//! chartsync periodically copies completed encounters, with their clinical
//! documents, orders and appointments, from each tenant's source EHR into a
//! shared FHIR store, and announces every outcome on a per-tenant topic.
//!
//! ## Overview
//!
//! For every tenant, on a fixed interval:
//! - **Authenticate** with a live provider session or the tenant's system credential
//! - **Read** completed encounters of the trailing window and their composites
//! - **Reconcile** the patient against the target store by medical record number
//! - **Write** each composite idempotently, ending with a linking resource tagged
//!   with the source encounter id
//! - **Notify** one event per encounter, published in the background
//!
//! ## Architecture
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`core`] - Sync pipeline, credential selection, scheduler and event publisher
//! - [`adapters`] - HTTP clients for the source EHR, target store, message bus,
//!   token endpoint and session service
//! - [`domain`] - Identifiers, clinical composites, events and errors
//! - [`config`] - Configuration management
//! - [`logging`] - Structured logging
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chartsync::config::load_config;
//! use chartsync::core::pipeline::Pipeline;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = load_config("chartsync.toml")?;
//!     let pipeline = Pipeline::from_config(&config)?;
//!
//!     let response = pipeline.scheduler().trigger(None).await;
//!     println!("{}", serde_json::to_string(&response)?);
//!
//!     pipeline.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Idempotency
//!
//! Every mirrored resource carries a `meta.tag` whose code is the source id.
//! An encounter is considered mirrored once its linking resource exists, and
//! the linking resource is written last, so a cycle interrupted mid-write is
//! retried on the next cycle without duplicating the members already written.
//!
//! ## Error Handling
//!
//! All fallible operations return [`domain::Result`] with a
//! [`domain::SyncError`]; failures are classified into event payloads with
//! [`domain::FailureDetail`].

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod logging;
