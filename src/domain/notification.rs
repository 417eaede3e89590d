//! Notification records published by a process's own log
//!
//! A notification is the durable, sequentially numbered wrapper around one
//! domain event. Ids are strictly increasing and gapless per process within
//! a pipeline; downstream processes consume them in id order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{error::RunnerError, event::DomainEvent};

/// Declared predecessor that must be applied before a notification is admitted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CausalDependency {
    /// Upstream process whose notification must already be applied
    pub process_name:    String,
    /// Notification id that must already be tracked
    pub notification_id: u64
}

impl CausalDependency {
    pub fn new(process_name: impl Into<String>, notification_id: u64) -> Self {
        Self { process_name: process_name.into(), notification_id }
    }
}

/// One durable entry in a process's notification log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Position in the log, strictly increasing and gapless
    pub id:                  u64,
    /// Identifier of the wrapped event
    pub originator_id:       String,
    /// Timestamp of the wrapped event
    pub timestamp:           DateTime<Utc>,
    /// Topic of the wrapped event
    pub topic:               String,
    /// Payload of the wrapped event
    pub state:               Value,
    /// Predecessors that must be applied before this record
    pub causal_dependencies: Vec<CausalDependency>
}

impl NotificationRecord {
    pub fn from_event(id: u64, event: &DomainEvent, causal_dependencies: Vec<CausalDependency>) -> Self {
        Self {
            id,
            originator_id: event.originator_id.clone(),
            timestamp: event.timestamp,
            topic: event.topic.clone(),
            state: event.state.clone(),
            causal_dependencies
        }
    }

    /// Reconstruct the wrapped domain event
    pub fn event(&self) -> Result<DomainEvent, RunnerError> {
        if self.topic.is_empty() {
            return Err(RunnerError::Serialization(format!("notification {} has no event topic", self.id)));
        }

        Ok(DomainEvent {
            originator_id: self.originator_id.clone(),
            timestamp:     self.timestamp,
            topic:         self.topic.clone(),
            state:         self.state.clone()
        })
    }
}

/// Last applied notification id per upstream, persisted with each application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingPosition {
    /// Upstream process the position refers to
    pub upstream_name:   String,
    /// Id of the last applied notification from that upstream
    pub notification_id: u64
}

impl TrackingPosition {
    pub fn new(upstream_name: impl Into<String>, notification_id: u64) -> Self {
        Self { upstream_name: upstream_name.into(), notification_id }
    }
}

/// One pulled event in transit between the puller and the processor
#[derive(Debug, Clone)]
pub struct EventQueueItem {
    /// The decoded upstream event
    pub event:           DomainEvent,
    /// Id of the notification it came from
    pub notification_id: u64,
    /// Upstream process that published it
    pub upstream_name:   String
}
