use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{
    error::RunnerError,
    event::DomainEvent,
    identity::ProcessIdentity,
    notification::{NotificationRecord, TrackingPosition}
};

/// One atomic unit of process progress: new notifications plus the advanced
/// tracking position, committed together or not at all
#[derive(Debug, Clone, Default)]
pub struct CommitBatch {
    /// Events to append to the process's own notification log
    pub events:   Vec<DomainEvent>,
    /// Tracking advance for the upstream notification that caused them
    pub tracking: Option<TrackingPosition>
}

impl CommitBatch {
    pub fn events(events: Vec<DomainEvent>) -> Self {
        Self { events, tracking: None }
    }

    pub fn with_tracking(mut self, tracking: TrackingPosition) -> Self {
        self.tracking = Some(tracking);
        self
    }
}

/// Durable storage owned by one (process, pipeline) instance
///
/// Notification ids are assigned by the store at commit time, strictly
/// increasing and gapless. A commit whose tracking does not advance past the
/// recorded position fails with `RunnerError::Conflict`; that conflict is how
/// duplicate re-application is detected after a reset.
#[async_trait]
pub trait ProcessStore: Send + Sync {
    /// Read up to `limit` own-log notifications with ids greater than `after`
    async fn read_notifications(&self, after: u64, limit: usize) -> Result<Vec<NotificationRecord>, RunnerError>;

    /// Highest notification id recorded so far, 0 when the log is empty
    async fn max_notification_id(&self) -> Result<u64, RunnerError>;

    /// Last applied notification id for an upstream, None when nothing from
    /// that upstream has been applied yet
    async fn tracking_position(&self, upstream_name: &str) -> Result<Option<u64>, RunnerError>;

    /// Atomically append notifications and advance tracking, returning the
    /// assigned notification ids
    async fn commit(&self, batch: CommitBatch) -> Result<Vec<u64>, RunnerError>;
}

/// Builds the store for each (process, pipeline) instance
#[async_trait]
pub trait StoreFactory: Send + Sync {
    async fn build(&self, identity: &ProcessIdentity) -> Result<Arc<dyn ProcessStore>, RunnerError>;
}
