//! Notification log read over an actor boundary
//!
//! Downstream processes read an upstream's log through its actor rather
//! than its store, so a log can live in another pipeline or, with a cluster
//! transport, on another node.

use std::time::Duration;

use async_trait::async_trait;
use ractor::{ActorRef, rpc::CallResult};

use crate::{
    actor::message::ProcessMessage,
    domain::{error::RunnerError, notification::NotificationRecord},
    port::log::NotificationLogRead
};

/// Reads an upstream process's notification log via `ProcessMessage::ReadLog`
pub struct NotificationLogView {
    upstream: ActorRef<ProcessMessage>,
    timeout:  Duration
}

impl NotificationLogView {
    pub fn new(upstream: ActorRef<ProcessMessage>, timeout: Duration) -> Self {
        Self { upstream, timeout }
    }
}

#[async_trait]
impl NotificationLogRead for NotificationLogView {
    async fn read(&self, after: u64, limit: usize) -> Result<Vec<NotificationRecord>, RunnerError> {
        let result = ractor::rpc::call(
            &self.upstream,
            |reply| ProcessMessage::ReadLog { after, limit, reply },
            Some(self.timeout)
        )
        .await;

        match result {
            Ok(CallResult::Success(page)) => page,
            Ok(CallResult::Timeout) => Err(RunnerError::Timeout("upstream log read timed out".into())),
            Ok(CallResult::SenderError) => Err(RunnerError::Actor("upstream log reply channel closed".into())),
            Err(e) => Err(RunnerError::Actor(format!("upstream log unreachable: {}", e)))
        }
    }
}
