//! Transactional event log with in-process fan-out.
//!
//! Every published event is appended to `event_log` (dense, increasing ids)
//! and then delivered to live subscribers of its source type. Delivery is
//! best-effort: subscriber channels hold a single envelope and a full
//! channel never blocks the publisher, the event stays durable in the log.

mod bus;
#[cfg(test)]
mod tests;

pub use bus::{EventBus, PublishContinuation};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A payload that can be published on the bus.
pub trait DomainEvent: Serialize {
    /// Tag stored in `event_type`; the payload's type name.
    const EVENT_TYPE: &'static str;
}

/// Where an event came from (`source_type`, `source_id`) and its schema version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventMeta {
    pub event_version: u32,
    pub source_type: String,
    pub source_id: String,
}

impl EventMeta {
    pub fn new(event_version: u32, source_type: &str, source_id: &str) -> Self {
        Self {
            event_version,
            source_type: source_type.to_string(),
            source_id: source_id.to_string(),
        }
    }
}

/// Immutable persisted record of a domain event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub id: i64,
    pub event_type: String,
    pub event_version: u32,
    pub source_type: String,
    pub source_id: String,
    pub user_id: String,
    pub created_at: i64,
    pub causation_id: String,
    pub correlation_id: String,
    pub data: Value,
}

impl EventEnvelope {
    /// Decodes `data` into a concrete payload type.
    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(self.data.clone())
    }
}
