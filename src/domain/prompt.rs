//! Prompts advertising new notifications to downstream processes

use serde::{Deserialize, Serialize};

use crate::domain::identity::PipelineId;

/// Lightweight "new notifications may exist" message
///
/// Prompts are coalescible level-triggers: delivering one is a latency
/// optimization, losing one is covered by the puller's poll fallback.
/// Correctness never depends on prompt delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    /// Process that may have published new notifications
    pub process_name: String,
    /// Pipeline the notifications belong to
    pub pipeline_id:  PipelineId
}

impl Prompt {
    pub fn new(process_name: impl Into<String>, pipeline_id: PipelineId) -> Self {
        Self { process_name: process_name.into(), pipeline_id }
    }
}
