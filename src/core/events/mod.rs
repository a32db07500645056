//! Outcome event delivery

pub mod publisher;

pub use publisher::{EventPublisher, PublisherSettings, PublisherStats};
