//! System runner - spawns, wires, starts and stops the process actors
//!
//! Start is two-phase across the whole system: every actor is spawned and
//! initialized before any of them runs, so prompts and log reads never
//! target a process that does not exist yet. Close is bounded: processes
//! are asked to stop within the stop timeout, then their actors are
//! terminated and joined.

use std::{collections::HashMap, sync::Arc};

use ractor::{Actor, ActorRef, MessagingErr, rpc::CallResult};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{Level, event};
use uuid::Uuid;

use crate::{
    actor::{log_view::NotificationLogView, message::ProcessMessage, process::ProcessActor},
    adapter::store_factory_from_uri,
    config::RunnerConfig,
    domain::{
        constant::runner,
        error::RunnerError,
        identity::PipelineId,
        system::System
    },
    port::{log::NotificationLogRead, store::StoreFactory}
};

/// Runs a system of event-sourced processes as actors, one per process and
/// pipeline
pub struct SystemRunner {
    system:        System,
    config:        Arc<RunnerConfig>,
    default_store: Option<Arc<dyn StoreFactory>>,
    run_id:        String,
    processes:     HashMap<(String, PipelineId), ActorRef<ProcessMessage>>,
    handles:       Vec<JoinHandle<()>>,
    started:       bool
}

impl SystemRunner {
    /// Build a runner over a system definition
    ///
    /// Fails when a process has neither its own store factory nor a runner
    /// datastore to fall back to.
    pub fn new(system: System, config: RunnerConfig) -> Result<Self, RunnerError> {
        let default_store = match &config.datastore {
            Some(uri) => Some(store_factory_from_uri(uri)?),
            None => None
        };

        if default_store.is_none() {
            if let Some(definition) = system.definitions().iter().find(|definition| definition.store.is_none()) {
                return Err(RunnerError::Configuration(format!(
                    "process '{}' has no store: set a datastore URI or attach a store factory",
                    definition.name
                )));
            }
        }

        let mut run_id = Uuid::new_v4().simple().to_string();
        run_id.truncate(8);

        Ok(Self {
            system,
            config: Arc::new(config),
            default_store,
            run_id,
            processes: HashMap::new(),
            handles: Vec::new(),
            started: false
        })
    }

    /// Spawn, initialize and run every process actor
    pub async fn start(&mut self) -> Result<(), RunnerError> {
        if self.started {
            return Err(RunnerError::Lifecycle("runner is already started".into()));
        }

        event!(Level::INFO, event = runner::RUNNER_STARTING,
               processes = self.system.definitions().len(), pipelines = self.config.pipeline_ids.len());

        if let Err(e) = self.spawn_all().await {
            self.stop_all().await;
            return Err(e);
        }
        if let Err(e) = self.init_all().await {
            self.stop_all().await;
            return Err(e);
        }

        event!(Level::DEBUG, event = runner::PROCESSES_INITIALIZED, count = self.processes.len());

        if let Err(e) = self.run_all().await {
            self.stop_all().await;
            return Err(e);
        }

        self.started = true;
        event!(Level::INFO, event = runner::RUNNER_STARTED, count = self.processes.len());
        Ok(())
    }

    /// Stop every process and wait for its actor to terminate
    pub async fn close(&mut self) -> Result<(), RunnerError> {
        if !self.started && self.processes.is_empty() {
            return Ok(());
        }

        event!(Level::INFO, event = runner::RUNNER_CLOSING);
        self.stop_all().await;
        event!(Level::INFO, event = runner::RUNNER_CLOSED);
        Ok(())
    }

    /// Invoke a named method on one process instance, returning its reply
    pub async fn call(
        &self,
        process_name: &str,
        pipeline_id: PipelineId,
        method: &str,
        args: Value
    ) -> Result<Value, RunnerError> {
        let actor = self.process_ref(process_name, pipeline_id).ok_or_else(|| {
            RunnerError::Definition(format!("unknown process '{}' in pipeline {}", process_name, pipeline_id))
        })?;

        let result = ractor::rpc::call(
            actor,
            |reply| ProcessMessage::Call { method: method.to_string(), args, reply },
            None
        )
        .await;
        Self::call_outcome(result)
    }

    /// The actor hosting one (process, pipeline) instance
    pub fn process_ref(&self, process_name: &str, pipeline_id: PipelineId) -> Option<&ActorRef<ProcessMessage>> {
        self.processes.get(&(process_name.to_string(), pipeline_id))
    }

    async fn spawn_all(&mut self) -> Result<(), RunnerError> {
        for definition in self.system.definitions() {
            for &pipeline_id in self.config.pipeline_ids.iter() {
                let store_factory = match (&definition.store, &self.default_store) {
                    (Some(own), _) => own.clone(),
                    (None, Some(default)) => default.clone(),
                    (None, None) => {
                        return Err(RunnerError::Configuration(format!(
                            "process '{}' has no store factory",
                            definition.name
                        )));
                    }
                };

                let actor_name = format!("{}-{}-p{}", self.run_id, definition.name, pipeline_id);
                let spawned = Actor::spawn(
                    Some(actor_name),
                    ProcessActor,
                    (definition.clone(), pipeline_id, store_factory, self.config.clone())
                )
                .await;

                match spawned {
                    Ok((actor, handle)) => {
                        event!(Level::DEBUG, event = runner::PROCESS_SPAWNED,
                               process = %definition.name, pipeline = pipeline_id);
                        self.processes.insert((definition.name.clone(), pipeline_id), actor);
                        self.handles.push(handle);
                    }
                    Err(e) => {
                        event!(Level::WARN, event = runner::PROCESS_SPAWN_FAILED,
                               process = %definition.name, pipeline = pipeline_id, error = %e);
                        return Err(RunnerError::from(e));
                    }
                }
            }
        }
        Ok(())
    }

    async fn init_all(&self) -> Result<(), RunnerError> {
        for ((process_name, pipeline_id), actor) in self.processes.iter() {
            let mut upstream_logs: HashMap<String, Box<dyn NotificationLogRead>> = HashMap::new();
            for upstream_name in self.system.upstream_names(process_name) {
                let upstream_actor = self.peer(upstream_name, *pipeline_id)?;
                let log = NotificationLogView::new(upstream_actor.clone(), self.config.delivery_timeout());
                upstream_logs.insert(upstream_name.clone(), Box::new(log));
            }

            let mut downstream_processes = HashMap::new();
            for downstream_name in self.system.downstream_names(process_name) {
                let downstream_actor = self.peer(downstream_name, *pipeline_id)?;
                downstream_processes.insert(downstream_name.clone(), downstream_actor.clone());
            }

            let result = ractor::rpc::call(
                actor,
                |reply| ProcessMessage::Init { upstream_logs, downstream_processes, reply },
                None
            )
            .await;
            Self::call_outcome(result)?;
        }
        Ok(())
    }

    async fn run_all(&self) -> Result<(), RunnerError> {
        for actor in self.processes.values() {
            let result = ractor::rpc::call(actor, |reply| ProcessMessage::Run { reply }, None).await;
            Self::call_outcome(result)?;
        }
        Ok(())
    }

    async fn stop_all(&mut self) {
        let (keys, actors): (Vec<(String, PipelineId)>, Vec<ActorRef<ProcessMessage>>) =
            self.processes.iter().map(|(key, actor)| (key.clone(), actor.clone())).unzip();

        if !actors.is_empty() {
            let stopped = ractor::rpc::multi_call(
                &actors,
                |reply| ProcessMessage::Stop { reply },
                Some(self.config.stop_timeout())
            )
            .await;

            match stopped {
                Ok(results) => {
                    for ((process_name, pipeline_id), result) in keys.iter().zip(results) {
                        let failure = match result {
                            CallResult::Success(Ok(())) => None,
                            CallResult::Success(Err(e)) => Some(e.to_string()),
                            CallResult::Timeout => Some("stop timed out".to_string()),
                            CallResult::SenderError => Some("reply channel closed".to_string())
                        };
                        if let Some(reason) = failure {
                            event!(Level::WARN, event = runner::PROCESS_STOP_FAILED,
                                   process = %process_name, pipeline = *pipeline_id, reason = %reason);
                        }
                    }
                }
                Err(e) => {
                    event!(Level::WARN, event = runner::PROCESS_STOP_FAILED, error = %e);
                }
            }
        }

        for actor in &actors {
            actor.stop(None);
        }
        for mut handle in self.handles.drain(..) {
            if tokio::time::timeout(self.config.stop_timeout(), &mut handle).await.is_err() {
                handle.abort();
            }
        }

        self.processes.clear();
        self.started = false;
    }

    fn peer(&self, process_name: &str, pipeline_id: PipelineId) -> Result<&ActorRef<ProcessMessage>, RunnerError> {
        self.process_ref(process_name, pipeline_id).ok_or_else(|| {
            RunnerError::Definition(format!("process '{}' is not running on pipeline {}", process_name, pipeline_id))
        })
    }

    fn call_outcome<T>(
        result: Result<CallResult<Result<T, RunnerError>>, MessagingErr<ProcessMessage>>
    ) -> Result<T, RunnerError> {
        match result {
            Ok(CallResult::Success(inner)) => inner,
            Ok(CallResult::Timeout) => Err(RunnerError::Timeout("process call timed out".into())),
            Ok(CallResult::SenderError) => Err(RunnerError::Actor("process reply channel closed".into())),
            Err(e) => Err(RunnerError::Actor(format!("process unreachable: {}", e)))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        future::Future,
        sync::atomic::{AtomicU32, Ordering},
        time::Duration
    };

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::{
        adapter::{InMemoryProcessStore, InMemoryStoreFactory},
        domain::{
            event::DomainEvent,
            identity::ProcessIdentity,
            notification::{CausalDependency, NotificationRecord},
            system::ProcessDefinition
        },
        port::{
            policy::{CallOutcome, PolicyFactory, ProcessPolicy},
            store::ProcessStore
        }
    };

    struct InertPolicy;

    #[async_trait]
    impl ProcessPolicy for InertPolicy {
        async fn apply(&self, _event: &DomainEvent) -> Result<Vec<DomainEvent>, RunnerError> {
            Ok(vec![])
        }
    }

    struct RelayPolicy {
        topic: &'static str
    }

    #[async_trait]
    impl ProcessPolicy for RelayPolicy {
        async fn apply(&self, event: &DomainEvent) -> Result<Vec<DomainEvent>, RunnerError> {
            Ok(vec![DomainEvent::new(self.topic, event.state.clone())])
        }
    }

    /// Relay that fails a fixed number of times on one upstream event
    struct FlakyRelayPolicy {
        topic:       &'static str,
        fail_on_n:   u64,
        fail_budget: AtomicU32
    }

    #[async_trait]
    impl ProcessPolicy for FlakyRelayPolicy {
        async fn apply(&self, event: &DomainEvent) -> Result<Vec<DomainEvent>, RunnerError> {
            if event.state["n"].as_u64() == Some(self.fail_on_n) && self.fail_budget.load(Ordering::SeqCst) > 0 {
                self.fail_budget.fetch_sub(1, Ordering::SeqCst);
                return Err(RunnerError::Conflict(format!("event {} lost an optimistic write race", self.fail_on_n)));
            }
            Ok(vec![DomainEvent::new(self.topic, event.state.clone())])
        }
    }

    struct GreeterPolicy;

    #[async_trait]
    impl ProcessPolicy for GreeterPolicy {
        async fn apply(&self, _event: &DomainEvent) -> Result<Vec<DomainEvent>, RunnerError> {
            Ok(vec![])
        }

        async fn call(&self, method: &str, args: Value) -> Result<CallOutcome, RunnerError> {
            match method {
                "greet" => {
                    let name = args["name"].as_str().unwrap_or("world").to_string();
                    Ok(CallOutcome::reply(json!({"greeting": format!("hello {}", name)}))
                        .with_events(vec![DomainEvent::new("greeter.greeted", json!({"name": name}))]))
                }
                other => Err(RunnerError::UnknownMethod(format!("no method '{}'", other)))
            }
        }
    }

    struct FixedPolicyFactory(Arc<dyn ProcessPolicy>);

    impl PolicyFactory for FixedPolicyFactory {
        fn build(&self, _identity: &ProcessIdentity) -> Arc<dyn ProcessPolicy> {
            self.0.clone()
        }
    }

    fn definition(name: &str, policy: Arc<dyn ProcessPolicy>, stores: &Arc<InMemoryStoreFactory>) -> ProcessDefinition {
        ProcessDefinition::new(name, Arc::new(FixedPolicyFactory(policy))).with_store(stores.clone())
    }

    fn test_config() -> RunnerConfig {
        RunnerConfig {
            poll_interval_ms: 50,
            retry_max_attempts: 2,
            retry_backoff_ms: 10,
            stop_timeout_ms: 2000,
            loop_join_timeout_ms: 500,
            delivery_timeout_ms: 1000,
            ..RunnerConfig::default()
        }
    }

    fn order_record(id: u64, dependencies: Vec<CausalDependency>) -> NotificationRecord {
        NotificationRecord::from_event(id, &DomainEvent::new("orders.placed", json!({"n": id})), dependencies)
    }

    async fn eventually<F, Fut>(mut check: F, what: &str)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if check().await {
                return;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("timed out waiting for {}", what);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn applied_ns(store: &InMemoryProcessStore) -> Vec<u64> {
        store
            .read_notifications(0, 100)
            .await
            .unwrap()
            .iter()
            .map(|notification| notification.state["n"].as_u64().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_pipeline_applies_notifications_in_order() {
        let stores = Arc::new(InMemoryStoreFactory::new());
        let system = System::builder()
            .process(definition("orders", Arc::new(InertPolicy), &stores))
            .process(definition("audit", Arc::new(RelayPolicy { topic: "audit.recorded" }), &stores))
            .pipe(["orders", "audit"])
            .build()
            .unwrap();

        stores
            .store(&ProcessIdentity::new("orders", 0))
            .await
            .seed_notifications((1..=3).map(|id| order_record(id, vec![])).collect())
            .await;

        let mut system_runner = SystemRunner::new(system, test_config()).unwrap();
        system_runner.start().await.unwrap();

        let audit_store = stores.store(&ProcessIdentity::new("audit", 0)).await;
        eventually(
            || {
                let audit_store = audit_store.clone();
                async move { audit_store.max_notification_id().await.unwrap() == 3 }
            },
            "audit to apply all three notifications"
        )
        .await;

        assert_eq!(applied_ns(&audit_store).await, vec![1, 2, 3]);
        assert_eq!(audit_store.tracking_position("orders").await.unwrap(), Some(3));

        system_runner.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_recovery_reapplies_nothing_and_skips_nothing() {
        let stores = Arc::new(InMemoryStoreFactory::new());
        let flaky = Arc::new(FlakyRelayPolicy {
            topic:       "audit.recorded",
            fail_on_n:   2,
            fail_budget: AtomicU32::new(3)
        });
        let system = System::builder()
            .process(definition("orders", Arc::new(InertPolicy), &stores))
            .process(definition("audit", flaky.clone(), &stores))
            .pipe(["orders", "audit"])
            .build()
            .unwrap();

        stores
            .store(&ProcessIdentity::new("orders", 0))
            .await
            .seed_notifications((1..=3).map(|id| order_record(id, vec![])).collect())
            .await;

        let mut system_runner = SystemRunner::new(system, test_config()).unwrap();
        system_runner.start().await.unwrap();

        let audit_store = stores.store(&ProcessIdentity::new("audit", 0)).await;
        eventually(
            || {
                let audit_store = audit_store.clone();
                async move { audit_store.max_notification_id().await.unwrap() == 3 }
            },
            "audit to recover and catch up"
        )
        .await;

        // Exactly one derived event per upstream notification, still in order
        assert_eq!(applied_ns(&audit_store).await, vec![1, 2, 3]);
        assert_eq!(audit_store.tracking_position("orders").await.unwrap(), Some(3));
        assert_eq!(flaky.fail_budget.load(Ordering::SeqCst), 0);

        system_runner.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_unmet_causal_dependency_blocks_later_notifications() {
        let stores = Arc::new(InMemoryStoreFactory::new());
        let system = System::builder()
            .process(definition("orders", Arc::new(InertPolicy), &stores))
            .process(definition("audit", Arc::new(RelayPolicy { topic: "audit.recorded" }), &stores))
            .pipe(["orders", "audit"])
            .build()
            .unwrap();

        // Notification 2 requires something from a process audit never
        // tracks, so it can never be admitted
        stores
            .store(&ProcessIdentity::new("orders", 0))
            .await
            .seed_notifications(vec![
                order_record(1, vec![]),
                order_record(2, vec![CausalDependency::new("billing", 5)]),
            ])
            .await;

        let mut system_runner = SystemRunner::new(system, test_config()).unwrap();
        system_runner.start().await.unwrap();

        let audit_store = stores.store(&ProcessIdentity::new("audit", 0)).await;
        eventually(
            || {
                let audit_store = audit_store.clone();
                async move { audit_store.max_notification_id().await.unwrap() == 1 }
            },
            "audit to apply the first notification"
        )
        .await;

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(applied_ns(&audit_store).await, vec![1]);
        assert_eq!(audit_store.tracking_position("orders").await.unwrap(), Some(1));

        system_runner.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_satisfiable_causal_dependencies_apply_in_order() {
        let stores = Arc::new(InMemoryStoreFactory::new());
        let system = System::builder()
            .process(definition("orders", Arc::new(InertPolicy), &stores))
            .process(definition("audit", Arc::new(RelayPolicy { topic: "audit.recorded" }), &stores))
            .pipe(["orders", "audit"])
            .build()
            .unwrap();

        // Each notification requires its predecessor to have been applied
        stores
            .store(&ProcessIdentity::new("orders", 0))
            .await
            .seed_notifications(vec![
                order_record(1, vec![]),
                order_record(2, vec![CausalDependency::new("orders", 1)]),
                order_record(3, vec![CausalDependency::new("orders", 2)]),
            ])
            .await;

        let mut system_runner = SystemRunner::new(system, test_config()).unwrap();
        system_runner.start().await.unwrap();

        let audit_store = stores.store(&ProcessIdentity::new("audit", 0)).await;
        eventually(
            || {
                let audit_store = audit_store.clone();
                async move { audit_store.max_notification_id().await.unwrap() == 3 }
            },
            "audit to work through the dependency chain"
        )
        .await;

        assert_eq!(applied_ns(&audit_store).await, vec![1, 2, 3]);
        assert_eq!(audit_store.tracking_position("orders").await.unwrap(), Some(3));

        system_runner.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_call_replies_and_prompts_feed_downstream() {
        let stores = Arc::new(InMemoryStoreFactory::new());
        let system = System::builder()
            .process(definition("greeter", Arc::new(GreeterPolicy), &stores))
            .process(definition("mirror", Arc::new(RelayPolicy { topic: "mirror.echoed" }), &stores))
            .pipe(["greeter", "mirror"])
            .build()
            .unwrap();

        // A poll interval far beyond the test deadline: the mirror can only
        // learn about the greeting through the prompt path
        let mut config = test_config();
        config.poll_interval_ms = 60_000;

        let mut system_runner = SystemRunner::new(system, config).unwrap();
        system_runner.start().await.unwrap();

        let reply = system_runner.call("greeter", 0, "greet", json!({"name": "ada"})).await.unwrap();
        assert_eq!(reply, json!({"greeting": "hello ada"}));

        let unknown = system_runner.call("greeter", 0, "dance", json!({})).await;
        assert!(matches!(unknown, Err(RunnerError::UnknownMethod(_))));

        let mirror_store = stores.store(&ProcessIdentity::new("mirror", 0)).await;
        eventually(
            || {
                let mirror_store = mirror_store.clone();
                async move { mirror_store.max_notification_id().await.unwrap() == 1 }
            },
            "mirror to echo the greeting"
        )
        .await;

        let echoed = mirror_store.read_notifications(0, 10).await.unwrap();
        assert_eq!(echoed[0].topic, "mirror.echoed");
        assert_eq!(mirror_store.tracking_position("greeter").await.unwrap(), Some(1));

        system_runner.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_pipelines_run_independently() {
        let stores = Arc::new(InMemoryStoreFactory::new());
        let system = System::builder()
            .process(definition("orders", Arc::new(InertPolicy), &stores))
            .process(definition("audit", Arc::new(RelayPolicy { topic: "audit.recorded" }), &stores))
            .pipe(["orders", "audit"])
            .build()
            .unwrap();

        stores
            .store(&ProcessIdentity::new("orders", 0))
            .await
            .seed_notifications((1..=2).map(|id| order_record(id, vec![])).collect())
            .await;
        stores
            .store(&ProcessIdentity::new("orders", 1))
            .await
            .seed_notifications(vec![order_record(1, vec![])])
            .await;

        let mut config = test_config();
        config.pipeline_ids = vec![0, 1];

        let mut system_runner = SystemRunner::new(system, config).unwrap();
        system_runner.start().await.unwrap();

        let audit_zero = stores.store(&ProcessIdentity::new("audit", 0)).await;
        let audit_one = stores.store(&ProcessIdentity::new("audit", 1)).await;
        eventually(
            || {
                let audit_zero = audit_zero.clone();
                let audit_one = audit_one.clone();
                async move {
                    audit_zero.max_notification_id().await.unwrap() == 2
                        && audit_one.max_notification_id().await.unwrap() == 1
                }
            },
            "both pipelines to catch up"
        )
        .await;

        assert_eq!(applied_ns(&audit_zero).await, vec![1, 2]);
        assert_eq!(applied_ns(&audit_one).await, vec![1]);

        system_runner.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_runner_requires_a_datastore() {
        let system = System::builder()
            .process(ProcessDefinition::new("orders", Arc::new(FixedPolicyFactory(Arc::new(InertPolicy)))))
            .build()
            .unwrap();

        let result = SystemRunner::new(system, test_config());
        assert!(matches!(result, Err(RunnerError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_start_twice_fails_and_close_is_idempotent() {
        let stores = Arc::new(InMemoryStoreFactory::new());
        let system = System::builder().process(definition("orders", Arc::new(InertPolicy), &stores)).build().unwrap();

        let mut system_runner = SystemRunner::new(system, test_config()).unwrap();
        system_runner.start().await.unwrap();

        assert!(matches!(system_runner.start().await, Err(RunnerError::Lifecycle(_))));

        system_runner.close().await.unwrap();
        system_runner.close().await.unwrap();

        let gone = system_runner.call("orders", 0, "anything", json!({})).await;
        assert!(matches!(gone, Err(RunnerError::Definition(_))));
    }

    struct StoreLog(Arc<InMemoryProcessStore>);

    #[async_trait]
    impl NotificationLogRead for StoreLog {
        async fn read(&self, after: u64, limit: usize) -> Result<Vec<NotificationRecord>, RunnerError> {
            self.0.read_notifications(after, limit).await
        }
    }

    #[tokio::test]
    async fn test_actor_lifecycle_gates_and_late_follow() {
        let stores = Arc::new(InMemoryStoreFactory::new());
        let relay = definition("audit", Arc::new(RelayPolicy { topic: "audit.recorded" }), &stores);
        let config = Arc::new(test_config());

        let (actor, handle) =
            Actor::spawn(None, ProcessActor, (relay, 0, stores.clone() as Arc<dyn StoreFactory>, config))
                .await
                .unwrap();

        // Running before Init is a lifecycle error
        let premature = ractor::rpc::call(&actor, |reply| ProcessMessage::Run { reply }, None).await.unwrap();
        assert!(matches!(premature, CallResult::Success(Err(RunnerError::Lifecycle(_)))));

        let initialized = ractor::rpc::call(
            &actor,
            |reply| ProcessMessage::Init {
                upstream_logs:        HashMap::new(),
                downstream_processes: HashMap::new(),
                reply
            },
            None
        )
        .await
        .unwrap();
        assert!(matches!(initialized, CallResult::Success(Ok(()))));

        // A second Init must be rejected
        let again = ractor::rpc::call(
            &actor,
            |reply| ProcessMessage::Init {
                upstream_logs:        HashMap::new(),
                downstream_processes: HashMap::new(),
                reply
            },
            None
        )
        .await
        .unwrap();
        assert!(matches!(again, CallResult::Success(Err(RunnerError::Lifecycle(_)))));

        // Follow an upstream log added after initialization
        let orders_store = Arc::new(InMemoryProcessStore::new());
        orders_store.seed_notifications((1..=2).map(|id| order_record(id, vec![])).collect()).await;
        let followed = ractor::rpc::call(
            &actor,
            |reply| ProcessMessage::Follow {
                upstream_name: "orders".to_string(),
                log:           Box::new(StoreLog(orders_store)),
                reply
            },
            None
        )
        .await
        .unwrap();
        assert!(matches!(followed, CallResult::Success(Ok(()))));

        let running = ractor::rpc::call(&actor, |reply| ProcessMessage::Run { reply }, None).await.unwrap();
        assert!(matches!(running, CallResult::Success(Ok(()))));

        let audit_store = stores.store(&ProcessIdentity::new("audit", 0)).await;
        eventually(
            || {
                let audit_store = audit_store.clone();
                async move { audit_store.tracking_position("orders").await.unwrap() == Some(2) }
            },
            "the late-followed upstream to be applied"
        )
        .await;

        let stopped = ractor::rpc::call(&actor, |reply| ProcessMessage::Stop { reply }, None).await.unwrap();
        assert!(matches!(stopped, CallResult::Success(Ok(()))));

        // A second Stop is an acknowledged no-op
        let stopped_again = ractor::rpc::call(&actor, |reply| ProcessMessage::Stop { reply }, None).await.unwrap();
        assert!(matches!(stopped_again, CallResult::Success(Ok(()))));

        actor.stop(None);
        let _ = handle.await;
    }
}
