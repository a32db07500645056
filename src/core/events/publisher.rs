//! Background event publishing
//!
//! Units hand their outcome event to [`EventPublisher::publish`], which only
//! queues it. A single worker task resolves the tenant topic, creates it on
//! first use, and publishes with retries. Publish failures are logged and
//! counted; they never reach the unit that produced the event.

use crate::adapters::http::RetryPolicy;
use crate::adapters::{BusMessage, MessageBus};
use crate::config::EventsConfig;
use crate::domain::{SyncEvent, Tenant};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

/// Worker settings
#[derive(Debug, Clone)]
pub struct PublisherSettings {
    pub topic_prefix: String,
    pub auto_create_topics: bool,
    pub channel_capacity: usize,
    pub retry: RetryPolicy,
}

impl PublisherSettings {
    pub fn from_config(config: &EventsConfig) -> Self {
        Self {
            topic_prefix: config.topic_prefix.clone(),
            auto_create_topics: config.auto_create_topics,
            channel_capacity: config.channel_capacity.max(1),
            retry: RetryPolicy {
                max_attempts: config.max_retries,
                initial_delay_ms: 200,
                max_delay_ms: 5_000,
                multiplier: 2.0,
            },
        }
    }
}

/// Snapshot of publisher counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherStats {
    /// Events accepted onto the queue
    pub queued: u64,
    /// Events the bus acknowledged
    pub published: u64,
    /// Events that exhausted their retries
    pub failed: u64,
    /// Events offered after shutdown
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    queued: AtomicU64,
    published: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> PublisherStats {
        PublisherStats {
            queued: self.queued.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

enum Command {
    Publish { topic: String, event: Box<SyncEvent> },
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Handle to the background publishing worker
pub struct EventPublisher {
    sender: mpsc::Sender<Command>,
    topic_prefix: String,
    counters: Arc<Counters>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventPublisher {
    /// Starts the worker on the current runtime
    pub fn spawn(bus: Arc<dyn MessageBus>, settings: PublisherSettings) -> Self {
        let (sender, receiver) = mpsc::channel(settings.channel_capacity.max(1));
        let counters = Arc::new(Counters::default());
        let worker = Worker {
            bus,
            auto_create_topics: settings.auto_create_topics,
            retry: settings.retry,
            known_topics: HashSet::new(),
            counters: Arc::clone(&counters),
        };
        let handle = tokio::spawn(worker.run(receiver));

        Self {
            sender,
            topic_prefix: settings.topic_prefix,
            counters,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Queues `event` for the tenant's topic
    ///
    /// Waits only for queue space, never for the bus.
    pub async fn publish(&self, tenant: &Tenant, event: SyncEvent) {
        let topic = tenant.topic_name(&self.topic_prefix);
        let command = Command::Publish {
            topic,
            event: Box::new(event),
        };
        match self.sender.send(command).await {
            Ok(()) => {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    tenant_id = %tenant.id,
                    "Event publisher is shut down, dropping event"
                );
            }
        }
    }

    /// Waits until every event queued before this call has been handled
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.sender.send(Command::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Drains the queue and stops the worker
    pub async fn shutdown(&self) {
        let _ = self.sender.send(Command::Shutdown).await;
        if let Some(handle) = self.worker.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Event publisher worker terminated abnormally");
            }
        }
    }

    pub fn stats(&self) -> PublisherStats {
        self.counters.snapshot()
    }
}

struct Worker {
    bus: Arc<dyn MessageBus>,
    auto_create_topics: bool,
    retry: RetryPolicy,
    known_topics: HashSet<String>,
    counters: Arc<Counters>,
}

impl Worker {
    async fn run(mut self, mut receiver: mpsc::Receiver<Command>) {
        while let Some(command) = receiver.recv().await {
            match command {
                Command::Publish { topic, event } => self.deliver(&topic, &event).await,
                Command::Flush(done) => {
                    let _ = done.send(());
                }
                Command::Shutdown => {
                    receiver.close();
                }
            }
        }
        tracing::debug!("Event publisher worker stopped");
    }

    async fn deliver(&mut self, topic: &str, event: &SyncEvent) {
        let message = match BusMessage::from_event(event) {
            Ok(message) => message,
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(topic, error = %e, "Failed to serialize event");
                return;
            }
        };

        if self.auto_create_topics && !self.known_topics.contains(topic) {
            self.ensure_topic(topic).await;
        }

        let bus = Arc::clone(&self.bus);
        let result = self
            .retry
            .run("bus.publish", |_| true, || bus.publish(topic, &message))
            .await;

        match result {
            Ok(message_id) => {
                self.counters.published.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    topic,
                    message_id = %message_id,
                    tenant_id = %event.tenant_id,
                    status = event.status.as_str(),
                    "Published sync event"
                );
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    topic,
                    tenant_id = %event.tenant_id,
                    patient_id = %event.patient_id,
                    error = %e,
                    "Dropping sync event after publish retries"
                );
            }
        }
    }

    /// Creates the topic if missing; failures are left to the publish attempt
    async fn ensure_topic(&mut self, topic: &str) {
        let outcome = match self.bus.topic_exists(topic).await {
            Ok(true) => Ok(()),
            Ok(false) => self.bus.create_topic(topic).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(()) => {
                self.known_topics.insert(topic.to_string());
            }
            Err(e) => {
                tracing::warn!(topic, error = %e, "Could not provision topic");
            }
        }
    }
}
