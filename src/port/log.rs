use async_trait::async_trait;

use crate::domain::{error::RunnerError, notification::NotificationRecord};

/// Paginated pull interface over a process's notification log
///
/// `read` is idempotent and safely re-callable from the same position, so a
/// reader can resume after a reset without coordination with the log owner.
#[async_trait]
pub trait NotificationLogRead: Send + Sync {
    /// Read up to `limit` notifications with ids greater than `after`,
    /// in ascending id order
    async fn read(&self, after: u64, limit: usize) -> Result<Vec<NotificationRecord>, RunnerError>;
}
