use thiserror::Error;

/// Common error types for the runner system
#[derive(Error, Debug, Clone)]
pub enum RunnerError {
    /// Missing or invalid configuration
    #[error("{0}")]
    Configuration(String),

    /// Invalid system or process definition
    #[error("{0}")]
    Definition(String),

    /// Operation arrived in the wrong lifecycle state
    #[error("{0}")]
    Lifecycle(String),

    /// Transient infrastructure errors (storage, messaging)
    #[error("{0}")]
    Operational(String),

    /// Concurrent-write or duplicate-tracking conflicts
    #[error("{0}")]
    Conflict(String),

    /// Causal dependency not yet satisfied
    #[error("{0}")]
    CausalDependency(String),

    /// Serialization/deserialization errors
    #[error("{0}")]
    Serialization(String),

    /// Unknown method routed to a process
    #[error("{0}")]
    UnknownMethod(String),

    /// Actor spawning or messaging errors
    #[error("{0}")]
    Actor(String),

    /// Bounded wait elapsed
    #[error("{0}")]
    Timeout(String)
}

/// Coarse error classification used by retry policies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Definition,
    Lifecycle,
    Operational,
    Conflict,
    CausalDependency,
    Serialization,
    UnknownMethod,
    Actor,
    Timeout
}

impl RunnerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RunnerError::Configuration(_) => ErrorKind::Configuration,
            RunnerError::Definition(_) => ErrorKind::Definition,
            RunnerError::Lifecycle(_) => ErrorKind::Lifecycle,
            RunnerError::Operational(_) => ErrorKind::Operational,
            RunnerError::Conflict(_) => ErrorKind::Conflict,
            RunnerError::CausalDependency(_) => ErrorKind::CausalDependency,
            RunnerError::Serialization(_) => ErrorKind::Serialization,
            RunnerError::UnknownMethod(_) => ErrorKind::UnknownMethod,
            RunnerError::Actor(_) => ErrorKind::Actor,
            RunnerError::Timeout(_) => ErrorKind::Timeout
        }
    }
}

/// Convert from anyhow::Error
impl From<anyhow::Error> for RunnerError {
    fn from(err: anyhow::Error) -> Self {
        RunnerError::Configuration(err.to_string())
    }
}

/// Convert from std::io::Error
impl From<std::io::Error> for RunnerError {
    fn from(err: std::io::Error) -> Self {
        RunnerError::Operational(err.to_string())
    }
}

/// Convert from serde_json::Error
impl From<serde_json::Error> for RunnerError {
    fn from(err: serde_json::Error) -> Self {
        RunnerError::Serialization(err.to_string())
    }
}

/// Convert from serde_yaml::Error
impl From<serde_yaml::Error> for RunnerError {
    fn from(err: serde_yaml::Error) -> Self {
        RunnerError::Serialization(err.to_string())
    }
}

/// Convert from ractor::SpawnErr
impl From<ractor::SpawnErr> for RunnerError {
    fn from(err: ractor::SpawnErr) -> Self {
        RunnerError::Actor(err.to_string())
    }
}
