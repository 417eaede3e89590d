use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{error::RunnerError, event::DomainEvent, identity::ProcessIdentity};

/// Result of a synchronous method call routed to a process
#[derive(Debug, Clone)]
pub struct CallOutcome {
    /// Value returned to the caller
    pub reply:  Value,
    /// New events to record in the process's own log
    pub events: Vec<DomainEvent>
}

impl CallOutcome {
    pub fn reply(value: Value) -> Self {
        Self { reply: value, events: Vec::new() }
    }

    pub fn with_events(mut self, events: Vec<DomainEvent>) -> Self {
        self.events = events;
        self
    }
}

/// Business policy of one process - the injected hook the runner drives
///
/// `apply` must be idempotent at the application layer: after a recovery the
/// same upstream event may be offered again, and the duplicate is rejected by
/// the store's tracking conflict rather than by the policy.
#[async_trait]
pub trait ProcessPolicy: Send + Sync {
    /// React to one upstream event, returning any new events to record
    async fn apply(&self, event: &DomainEvent) -> Result<Vec<DomainEvent>, RunnerError>;

    /// Handle a synchronous method call routed to this process
    async fn call(&self, method: &str, args: Value) -> Result<CallOutcome, RunnerError> {
        let _ = args;
        Err(RunnerError::UnknownMethod(format!("process does not handle method '{}'", method)))
    }
}

/// Builds the policy for each (process, pipeline) instance
pub trait PolicyFactory: Send + Sync {
    fn build(&self, identity: &ProcessIdentity) -> Arc<dyn ProcessPolicy>;
}
