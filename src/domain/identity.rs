use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// Identifier of one parallel instance of the process graph
pub type PipelineId = u32;

/// Pipeline used when a system runs without explicit partitioning
pub const DEFAULT_PIPELINE_ID: PipelineId = 0;

/// Immutable composite key addressing one process actor
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessIdentity {
    /// Process name, unique within the system definition
    pub name:        String,
    /// Pipeline this instance belongs to
    pub pipeline_id: PipelineId
}

impl ProcessIdentity {
    pub fn new(name: impl Into<String>, pipeline_id: PipelineId) -> Self {
        Self { name: name.into(), pipeline_id }
    }

    /// Storage scope for this instance, stable across restarts
    pub fn scope(&self) -> String {
        format!("{}/{}", self.name, self.pipeline_id)
    }
}

impl Display for ProcessIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.pipeline_id)
    }
}
