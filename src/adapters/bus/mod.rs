//! Message bus collaborator

pub mod pubsub;

pub use pubsub::PubSubBus;

use crate::domain::{Result, SyncEvent};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// One message: opaque payload plus filterable attributes
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub data: Vec<u8>,
    pub attributes: BTreeMap<String, String>,
}

impl BusMessage {
    /// Serializes an event as JSON and copies its attributes onto the message
    pub fn from_event(event: &SyncEvent) -> Result<Self> {
        Ok(Self {
            data: serde_json::to_vec(event)?,
            attributes: event.attributes(),
        })
    }
}

/// Topic management and publishing
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Whether the topic exists
    async fn topic_exists(&self, topic: &str) -> Result<bool>;

    /// Creates a topic; creating an existing topic is not an error
    async fn create_topic(&self, topic: &str) -> Result<()>;

    /// Publishes one message and returns the bus-assigned message id
    async fn publish(&self, topic: &str, message: &BusMessage) -> Result<String>;
}
