//! Domain events flowing between processes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One domain event with an opaque JSON payload
///
/// The runner never interprets `state`; only the process policies do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Unique event identifier
    pub originator_id: String,
    /// Event timestamp
    pub timestamp:     DateTime<Utc>,
    /// Event type, dotted name chosen by the emitting policy
    pub topic:         String,
    /// Opaque event payload
    pub state:         Value
}

impl DomainEvent {
    pub fn new(topic: impl Into<String>, state: Value) -> Self {
        Self { originator_id: Uuid::new_v4().to_string(), timestamp: Utc::now(), topic: topic.into(), state }
    }
}
