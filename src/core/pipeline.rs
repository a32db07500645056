//! Pipeline assembly
//!
//! Wires the collaborators into a [`Scheduler`] and its background
//! [`EventPublisher`]. [`Pipeline::from_config`] builds the HTTP adapters;
//! [`Pipeline::assemble`] accepts any implementation of the collaborator
//! traits.

use crate::adapters::{
    ClientCredentialsIssuer, ConfigTenantDirectory, FhirSourceClient, FhirTargetClient,
    HttpSessionStore, MessageBus, NoSessions, PubSubBus, SessionStore, SourceEhr, TargetStore,
    TenantDirectory, TokenIssuer,
};
use crate::config::ChartsyncConfig;
use crate::core::credentials::CredentialResolver;
use crate::core::events::{EventPublisher, PublisherSettings};
use crate::core::scheduler::{Scheduler, SchedulerSettings};
use crate::core::sync::{
    CompositeWriter, DuplicateGuard, IdentityReconciler, KeyedMutex, SourceReader, Synchronizer,
};
use crate::domain::Result;
use std::sync::Arc;

/// The external systems the pipeline talks to
#[derive(Clone)]
pub struct Collaborators {
    pub directory: Arc<dyn TenantDirectory>,
    pub sessions: Arc<dyn SessionStore>,
    pub tokens: Arc<dyn TokenIssuer>,
    pub source: Arc<dyn SourceEhr>,
    pub target: Arc<dyn TargetStore>,
    pub bus: Arc<dyn MessageBus>,
}

impl Collaborators {
    /// HTTP-backed collaborators from configuration
    pub fn from_config(config: &ChartsyncConfig) -> Result<Self> {
        let sessions: Arc<dyn SessionStore> = match &config.sessions {
            Some(sessions) => Arc::new(HttpSessionStore::new(sessions)?),
            None => Arc::new(NoSessions),
        };
        Ok(Self {
            directory: Arc::new(ConfigTenantDirectory::from_config(&config.tenants)?),
            sessions,
            tokens: Arc::new(ClientCredentialsIssuer::new(
                config.source.timeout_seconds,
                config.source.tls_verify,
            )?),
            source: Arc::new(FhirSourceClient::new(&config.source)?),
            target: Arc::new(FhirTargetClient::new(&config.target)?),
            bus: Arc::new(PubSubBus::new(&config.events)?),
        })
    }
}

/// A ready-to-run scheduler plus the publisher it reports through
pub struct Pipeline {
    scheduler: Arc<Scheduler>,
    publisher: Arc<EventPublisher>,
}

impl Pipeline {
    /// Builds the pipeline against the configured HTTP services
    pub fn from_config(config: &ChartsyncConfig) -> Result<Self> {
        Ok(Self::assemble(Collaborators::from_config(config)?, config))
    }

    /// Builds the pipeline from explicit collaborators
    ///
    /// Spawns the publisher worker, so it must run inside a Tokio runtime.
    pub fn assemble(collaborators: Collaborators, config: &ChartsyncConfig) -> Self {
        let tag_system = config.target.tag_system.clone();
        let publisher = Arc::new(EventPublisher::spawn(
            collaborators.bus,
            PublisherSettings::from_config(&config.events),
        ));

        let synchronizer = Synchronizer::new(
            SourceReader::new(
                collaborators.source,
                config.scheduler.window(),
            ),
            DuplicateGuard::new(Arc::clone(&collaborators.target), tag_system.clone()),
            Arc::new(IdentityReconciler::new(
                Arc::clone(&collaborators.target),
                tag_system.clone(),
            )),
            CompositeWriter::new(collaborators.target, tag_system, config.target.write_mode),
            Arc::clone(&publisher),
            Arc::new(KeyedMutex::new()),
        );

        let resolver = Arc::new(CredentialResolver::new(
            collaborators.sessions,
            collaborators.tokens,
        ));
        let scheduler = Arc::new(Scheduler::new(
            collaborators.directory,
            resolver,
            Arc::new(synchronizer),
            SchedulerSettings::from_config(&config.scheduler),
        ));

        Self {
            scheduler,
            publisher,
        }
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        Arc::clone(&self.scheduler)
    }

    pub fn publisher(&self) -> Arc<EventPublisher> {
        Arc::clone(&self.publisher)
    }

    /// Drains queued events and stops the publisher worker
    pub async fn shutdown(&self) {
        self.publisher.shutdown().await;
        let stats = self.publisher.stats();
        tracing::info!(
            queued = stats.queued,
            published = stats.published,
            failed = stats.failed,
            dropped = stats.dropped,
            "Event publisher stopped"
        );
    }
}
