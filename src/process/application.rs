//! Process application - the core one actor wraps
//!
//! Owns the injected policy and store, the per-upstream readers behind the
//! exclusive read lock, and the outbound prompt hook. Everything here is
//! plain async Rust; actor handles never appear below this layer.

use std::{collections::HashMap, sync::Arc};

use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard, mpsc};
use tracing::{Level, event};

use crate::{
    domain::{
        constant::process,
        error::RunnerError,
        event::DomainEvent,
        identity::{PipelineId, ProcessIdentity},
        notification::{CausalDependency, NotificationRecord, TrackingPosition},
        prompt::Prompt
    },
    port::{
        log::NotificationLogRead,
        policy::ProcessPolicy,
        store::{CommitBatch, ProcessStore}
    },
    process::reader::NotificationReader
};

/// One event-sourced process: policy, store, upstream readers, prompt hook
pub struct ProcessApplication {
    identity:    ProcessIdentity,
    policy:      Arc<dyn ProcessPolicy>,
    store:       Arc<dyn ProcessStore>,
    page_size:   usize,
    /// Reader map behind the exclusive read lock: holding the guard is what
    /// keeps a pull round and a reset from interleaving
    readers:     Mutex<HashMap<String, NotificationReader>>,
    prompt_hook: Mutex<Option<mpsc::Sender<Prompt>>>
}

impl ProcessApplication {
    pub fn new(
        identity: ProcessIdentity,
        policy: Arc<dyn ProcessPolicy>,
        store: Arc<dyn ProcessStore>,
        page_size: usize
    ) -> Self {
        Self {
            identity,
            policy,
            store,
            page_size,
            readers: Mutex::new(HashMap::new()),
            prompt_hook: Mutex::new(None)
        }
    }

    pub fn identity(&self) -> &ProcessIdentity {
        &self.identity
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn pipeline_id(&self) -> PipelineId {
        self.identity.pipeline_id
    }

    /// Register one upstream log, with the reader resuming from the last
    /// durable tracking position
    pub async fn follow(&self, upstream_name: &str, log: Box<dyn NotificationLogRead>) -> Result<(), RunnerError> {
        let mut reader = NotificationReader::new(log, self.page_size);
        let position = self.store.tracking_position(upstream_name).await?.unwrap_or(0);
        reader.seek(position);

        self.readers.lock().await.insert(upstream_name.to_string(), reader);

        event!(Level::DEBUG, event = process::UPSTREAM_FOLLOWED,
               process = %self.identity, upstream = %upstream_name, position = position);
        Ok(())
    }

    /// Take the exclusive read lock over the reader map
    pub async fn lock_readers(&self) -> MutexGuard<'_, HashMap<String, NotificationReader>> {
        self.readers.lock().await
    }

    /// Names of all followed upstreams
    pub async fn upstream_names(&self) -> Vec<String> {
        self.readers.lock().await.keys().cloned().collect()
    }

    /// Seek every reader back to its durable tracking position
    ///
    /// Used with an already-held guard during a reset, so the queue drain and
    /// the seek happen under one lock acquisition.
    pub async fn seek_readers(&self, readers: &mut HashMap<String, NotificationReader>) -> Result<(), RunnerError> {
        for (upstream_name, reader) in readers.iter_mut() {
            let position = self.store.tracking_position(upstream_name).await?.unwrap_or(0);
            reader.seek(position);
        }
        Ok(())
    }

    /// Seek every reader back to its durable tracking position, taking the
    /// read lock for the duration
    pub async fn reset_readers(&self) -> Result<(), RunnerError> {
        let mut readers = self.readers.lock().await;
        self.seek_readers(&mut readers).await
    }

    /// Verify every declared predecessor has already been applied locally
    pub async fn check_causal_dependencies(&self, dependencies: &[CausalDependency]) -> Result<(), RunnerError> {
        if dependencies.is_empty() {
            return Ok(());
        }

        for dependency in dependencies {
            let tracked = self.store.tracking_position(&dependency.process_name).await?.unwrap_or(0);
            if tracked < dependency.notification_id {
                return Err(RunnerError::CausalDependency(format!(
                    "notification {} from '{}' has not been applied yet",
                    dependency.notification_id, dependency.process_name
                )));
            }
        }
        Ok(())
    }

    /// Decode the domain event wrapped by a notification
    pub fn event_from_notification(&self, notification: &NotificationRecord) -> Result<DomainEvent, RunnerError> {
        notification.event()
    }

    /// Apply one upstream event: run the policy, then commit the new events
    /// together with the advanced tracking position
    ///
    /// A commit conflict means this notification was already applied; the
    /// caller decides whether to retry or reset.
    pub async fn apply_upstream_event(
        &self,
        event: &DomainEvent,
        notification_id: u64,
        upstream_name: &str
    ) -> Result<Vec<DomainEvent>, RunnerError> {
        let new_events = self.policy.apply(event).await?;

        let batch = CommitBatch::events(new_events.clone())
            .with_tracking(TrackingPosition::new(upstream_name, notification_id));
        self.store.commit(batch).await?;

        Ok(new_events)
    }

    /// Record events raised outside the upstream-event path and advertise
    /// them through the prompt hook
    pub async fn record_events(&self, events: Vec<DomainEvent>) -> Result<Vec<u64>, RunnerError> {
        let ids = self.store.commit(CommitBatch::events(events)).await?;
        self.fire_prompt_hook().await;
        Ok(ids)
    }

    /// Route a synchronous method call to the policy, recording any events
    /// it raises
    pub async fn call(&self, method: &str, args: Value) -> Result<Value, RunnerError> {
        let outcome = self.policy.call(method, args).await?;

        if !outcome.events.is_empty() {
            self.record_events(outcome.events).await?;
        }

        Ok(outcome.reply)
    }

    /// Serve a page of this process's own notification log
    pub async fn read_log(&self, after: u64, limit: usize) -> Result<Vec<NotificationRecord>, RunnerError> {
        self.store.read_notifications(after, limit).await
    }

    /// Connect the outbound prompt channel; locally raised events will be
    /// advertised through it until unsubscribed
    pub async fn subscribe_prompt_hook(&self, sender: mpsc::Sender<Prompt>) {
        *self.prompt_hook.lock().await = Some(sender);
    }

    pub async fn unsubscribe_prompt_hook(&self) {
        *self.prompt_hook.lock().await = None;
    }

    async fn fire_prompt_hook(&self) {
        let sender = { self.prompt_hook.lock().await.clone() };

        if let Some(sender) = sender {
            let prompt = Prompt::new(self.identity.name.clone(), self.identity.pipeline_id);
            if sender.send(prompt).await.is_err() {
                event!(Level::DEBUG, event = process::PROMPT_HOOK_CLOSED, process = %self.identity);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{adapter::InMemoryProcessStore, port::policy::CallOutcome};

    struct EchoPolicy;

    #[async_trait::async_trait]
    impl ProcessPolicy for EchoPolicy {
        async fn apply(&self, event: &DomainEvent) -> Result<Vec<DomainEvent>, RunnerError> {
            Ok(vec![DomainEvent::new("echo.emitted", event.state.clone())])
        }

        async fn call(&self, method: &str, args: Value) -> Result<CallOutcome, RunnerError> {
            match method {
                "emit" => Ok(CallOutcome::reply(json!({"accepted": true}))
                    .with_events(vec![DomainEvent::new("echo.requested", args)])),
                other => Err(RunnerError::UnknownMethod(format!("process does not handle method '{}'", other)))
            }
        }
    }

    fn application(store: Arc<InMemoryProcessStore>) -> ProcessApplication {
        ProcessApplication::new(ProcessIdentity::new("echo", 0), Arc::new(EchoPolicy), store, 5)
    }

    #[tokio::test]
    async fn test_apply_records_events_and_tracking_together() {
        let store = Arc::new(InMemoryProcessStore::new());
        let application = application(store.clone());

        let upstream = DomainEvent::new("orders.placed", json!({"order": 1}));
        let new_events = application.apply_upstream_event(&upstream, 3, "orders").await.unwrap();

        assert_eq!(new_events.len(), 1);
        assert_eq!(store.tracking_position("orders").await.unwrap(), Some(3));
        assert_eq!(store.max_notification_id().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_apply_is_a_conflict() {
        let store = Arc::new(InMemoryProcessStore::new());
        let application = application(store.clone());

        let upstream = DomainEvent::new("orders.placed", json!({"order": 1}));
        application.apply_upstream_event(&upstream, 3, "orders").await.unwrap();

        let result = application.apply_upstream_event(&upstream, 3, "orders").await;
        assert!(matches!(result, Err(RunnerError::Conflict(_))));
        assert_eq!(store.max_notification_id().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_causal_dependencies_check_tracking() {
        let store = Arc::new(InMemoryProcessStore::new());
        let application = application(store.clone());

        application.check_causal_dependencies(&[]).await.unwrap();

        let unmet = [CausalDependency::new("payments", 2)];
        let result = application.check_causal_dependencies(&unmet).await;
        assert!(matches!(result, Err(RunnerError::CausalDependency(_))));

        let upstream = DomainEvent::new("payments.settled", json!({}));
        application.apply_upstream_event(&upstream, 2, "payments").await.unwrap();
        application.check_causal_dependencies(&unmet).await.unwrap();
    }

    #[tokio::test]
    async fn test_call_records_events_and_fires_hook() {
        let store = Arc::new(InMemoryProcessStore::new());
        let application = application(store.clone());

        let (tx, mut rx) = mpsc::channel(4);
        application.subscribe_prompt_hook(tx).await;

        let reply = application.call("emit", json!({"n": 1})).await.unwrap();
        assert_eq!(reply, json!({"accepted": true}));

        let prompt = rx.recv().await.unwrap();
        assert_eq!(prompt.process_name, "echo");

        let log = application.read_log(0, 10).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].topic, "echo.requested");
    }

    #[tokio::test]
    async fn test_unsubscribed_hook_stays_silent() {
        let store = Arc::new(InMemoryProcessStore::new());
        let application = application(store.clone());

        let (tx, mut rx) = mpsc::channel(4);
        application.subscribe_prompt_hook(tx).await;
        application.unsubscribe_prompt_hook().await;

        application.call("emit", json!({})).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reset_readers_rewinds_to_tracking() {
        let store = Arc::new(InMemoryProcessStore::new());
        let upstream_store = Arc::new(InMemoryProcessStore::new());
        upstream_store
            .seed_notifications(
                (1..=4)
                    .map(|id| {
                        NotificationRecord::from_event(id, &DomainEvent::new("orders.placed", json!({"n": id})), vec![])
                    })
                    .collect()
            )
            .await;

        let application = application(store.clone());
        application.follow("orders", Box::new(StoreLog(upstream_store))).await.unwrap();

        {
            let mut readers = application.lock_readers().await;
            let reader = readers.get_mut("orders").unwrap();
            reader.next_page().await.unwrap();
            assert_eq!(reader.position(), 4);
        }

        let upstream = DomainEvent::new("orders.placed", json!({"n": 2}));
        application.apply_upstream_event(&upstream, 2, "orders").await.unwrap();

        application.reset_readers().await.unwrap();
        let readers = application.lock_readers().await;
        assert_eq!(readers.get("orders").unwrap().position(), 2);
    }

    struct StoreLog(Arc<InMemoryProcessStore>);

    #[async_trait::async_trait]
    impl NotificationLogRead for StoreLog {
        async fn read(&self, after: u64, limit: usize) -> Result<Vec<NotificationRecord>, RunnerError> {
            self.0.read_notifications(after, limit).await
        }
    }
}
