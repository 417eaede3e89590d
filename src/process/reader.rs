//! Per-upstream pull cursor over a notification log

use crate::{
    domain::{error::RunnerError, notification::NotificationRecord},
    port::log::NotificationLogRead
};

/// Reads one upstream's notifications page by page from a saved position
///
/// The cursor advances on read, ahead of the durable tracking position; a
/// reset seeks it back to tracking, so notifications buffered only in memory
/// are read again rather than skipped.
pub struct NotificationReader {
    log:       Box<dyn NotificationLogRead>,
    position:  u64,
    page_size: usize
}

impl NotificationReader {
    pub fn new(log: Box<dyn NotificationLogRead>, page_size: usize) -> Self {
        Self { log, position: 0, page_size: page_size.max(1) }
    }

    /// Move the cursor so the next page starts after `position`
    pub fn seek(&mut self, position: u64) {
        self.position = position;
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Read the next page and advance the cursor past it
    ///
    /// A page shorter than `page_size` means the reader has caught up.
    pub async fn next_page(&mut self) -> Result<Vec<NotificationRecord>, RunnerError> {
        let page = self.log.read(self.position, self.page_size).await?;

        if let Some(last) = page.last() {
            self.position = last.id;
        }

        Ok(page)
    }
}
