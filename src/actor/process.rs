//! Process actor - one event-sourced process on one pipeline
//!
//! Lifecycle is two-phase: Init constructs the process core and wires it to
//! its neighbours, Run starts the pull, process and push loops. Keeping the
//! phases apart lets the runner build every actor before any of them starts
//! reading, so no prompt ever targets a process that does not exist yet.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, atomic::AtomicU64},
    time::Duration
};

use ractor::{Actor, ActorProcessingErr, ActorRef};
use serde_json::Value;
use tokio::{
    sync::{Mutex, Notify, mpsc},
    task::JoinHandle
};
use tokio_util::sync::CancellationToken;
use tracing::{Level, event};

use crate::{
    actor::{
        loops::{Processor, Puller, Pusher, QueuedEvent},
        message::ProcessMessage
    },
    config::RunnerConfig,
    domain::{
        constant::process,
        error::{ErrorKind, RunnerError},
        identity::{PipelineId, ProcessIdentity},
        notification::NotificationRecord,
        prompt::Prompt,
        retry::RetryPolicy,
        system::ProcessDefinition
    },
    port::{log::NotificationLogRead, store::StoreFactory},
    process::application::ProcessApplication
};

/// Where a process actor is in its two-phase start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Created,
    Initialized,
    Running,
    Stopped
}

/// ProcessActor state - the wiring around one ProcessApplication
pub struct ProcessActorState {
    /// Process name plus pipeline id
    pub identity:      ProcessIdentity,
    /// Definition this instance was spawned from
    pub definition:    ProcessDefinition,
    /// Builds the store for this instance during Init
    pub store_factory: Arc<dyn StoreFactory>,
    /// Runner-wide tunables
    pub config:        Arc<RunnerConfig>,
    /// Retry policy for operational errors at the call, read and apply
    /// boundaries
    pub retry:         RetryPolicy,
    /// The process core, present once initialized
    pub application:   Option<Arc<ProcessApplication>>,
    /// Downstream actors prompted when this process publishes
    pub downstreams:   HashMap<String, ActorRef<ProcessMessage>>,
    /// Upstreams with undrained notifications
    pub pending:       Arc<Mutex<HashSet<String>>>,
    /// Wakes the puller when the pending set grows
    pub prompted:      Arc<Notify>,
    /// Bumped by every reset; queue items from older epochs are stale
    pub reset_epoch:   Arc<AtomicU64>,
    /// Cancels all three loops
    pub stop_token:    CancellationToken,
    pub event_tx:      mpsc::Sender<QueuedEvent>,
    pub event_rx:      Option<mpsc::Receiver<QueuedEvent>>,
    pub prompt_tx:     mpsc::Sender<Prompt>,
    pub prompt_rx:     Option<mpsc::Receiver<Prompt>>,
    pub puller:        Option<JoinHandle<()>>,
    pub processor:     Option<JoinHandle<()>>,
    pub pusher:        Option<JoinHandle<()>>,
    pub lifecycle:     Lifecycle
}

/// ProcessActor - hosts one (process, pipeline) instance
pub struct ProcessActor;

#[async_trait::async_trait]
impl Actor for ProcessActor {
    type Arguments = (ProcessDefinition, PipelineId, Arc<dyn StoreFactory>, Arc<RunnerConfig>);
    type Msg = ProcessMessage;
    type State = ProcessActorState;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        (definition, pipeline_id, store_factory, config): Self::Arguments
    ) -> Result<Self::State, ActorProcessingErr> {
        let identity = ProcessIdentity::new(&definition.name, pipeline_id);
        event!(Level::DEBUG, event = process::ACTOR_STARTED, process = %identity);

        let (event_tx, event_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (prompt_tx, prompt_rx) = mpsc::channel(config.queue_capacity.max(1));
        let retry = config.retry_policy(&[ErrorKind::Operational, ErrorKind::Conflict]);

        Ok(ProcessActorState {
            identity,
            definition,
            store_factory,
            config,
            retry,
            application: None,
            downstreams: HashMap::new(),
            pending: Arc::new(Mutex::new(HashSet::new())),
            prompted: Arc::new(Notify::new()),
            reset_epoch: Arc::new(AtomicU64::new(0)),
            stop_token: CancellationToken::new(),
            event_tx,
            event_rx: Some(event_rx),
            prompt_tx,
            prompt_rx: Some(prompt_rx),
            puller: None,
            processor: None,
            pusher: None,
            lifecycle: Lifecycle::Created
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State
    ) -> Result<(), ActorProcessingErr> {
        match message {
            ProcessMessage::Init { upstream_logs, downstream_processes, reply } => {
                let result = self.handle_init(upstream_logs, downstream_processes, state).await;
                let _ = reply.send(result);
            }
            ProcessMessage::Follow { upstream_name, log, reply } => {
                let _ = reply.send(self.handle_follow(&upstream_name, log, state).await);
            }
            ProcessMessage::Run { reply } => {
                let _ = reply.send(self.handle_run(state).await);
            }
            ProcessMessage::Prompt { prompt, reply } => {
                state.pending.lock().await.insert(prompt.process_name.clone());
                state.prompted.notify_one();
                let _ = reply.send(());
                event!(Level::DEBUG, event = process::PROMPT_RECEIVED,
                       process = %state.identity, from = %prompt.process_name);
            }
            ProcessMessage::Call { method, args, reply } => {
                let _ = reply.send(self.handle_call(&method, args, state).await);
            }
            ProcessMessage::ReadLog { after, limit, reply } => {
                let _ = reply.send(self.handle_read_log(after, limit, state).await);
            }
            ProcessMessage::Stop { reply } => {
                let _ = reply.send(self.handle_stop(state).await);
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State
    ) -> Result<(), ActorProcessingErr> {
        // Killed without a Stop message: the loops still wind down
        state.stop_token.cancel();
        Ok(())
    }
}

impl ProcessActor {
    async fn handle_init(
        &self,
        upstream_logs: HashMap<String, Box<dyn NotificationLogRead>>,
        downstream_processes: HashMap<String, ActorRef<ProcessMessage>>,
        state: &mut ProcessActorState
    ) -> Result<(), RunnerError> {
        if state.lifecycle != Lifecycle::Created {
            return Err(RunnerError::Lifecycle(format!("process '{}' is already initialized", state.identity)));
        }

        let store = state.store_factory.build(&state.identity).await?;
        let policy = state.definition.policy.build(&state.identity);
        let application =
            Arc::new(ProcessApplication::new(state.identity.clone(), policy, store, state.config.page_size));

        // Events recorded through the call path advertise themselves to the
        // pusher from here on
        application.subscribe_prompt_hook(state.prompt_tx.clone()).await;

        let upstream_count = upstream_logs.len();
        for (upstream_name, log) in upstream_logs {
            application.follow(&upstream_name, log).await?;
        }

        state.downstreams = downstream_processes;
        state.application = Some(application);
        state.lifecycle = Lifecycle::Initialized;

        event!(Level::DEBUG, event = process::PROCESS_INITIALIZED,
               process = %state.identity, upstreams = upstream_count, downstreams = state.downstreams.len());
        Ok(())
    }

    async fn handle_follow(
        &self,
        upstream_name: &str,
        log: Box<dyn NotificationLogRead>,
        state: &mut ProcessActorState
    ) -> Result<(), RunnerError> {
        match &state.application {
            Some(application) => application.follow(upstream_name, log).await,
            None => Err(RunnerError::Lifecycle(format!(
                "process '{}' cannot follow '{}' before it is initialized",
                state.identity, upstream_name
            )))
        }
    }

    async fn handle_run(&self, state: &mut ProcessActorState) -> Result<(), RunnerError> {
        if state.lifecycle != Lifecycle::Initialized {
            return Err(RunnerError::Lifecycle(format!(
                "process '{}' must be initialized exactly once before running",
                state.identity
            )));
        }
        let Some(application) = state.application.clone() else {
            return Err(RunnerError::Lifecycle(format!("process '{}' has no application", state.identity)));
        };
        let (Some(event_rx), Some(prompt_rx)) = (state.event_rx.take(), state.prompt_rx.take()) else {
            return Err(RunnerError::Lifecycle(format!("process '{}' loops were already started", state.identity)));
        };

        // Readers start from durable truth, not wherever a previous life
        // left them
        application.reset_readers().await?;

        let puller = Puller {
            application:   application.clone(),
            pending:       state.pending.clone(),
            prompted:      state.prompted.clone(),
            event_tx:      state.event_tx.clone(),
            poll_interval: state.config.poll_interval(),
            reset_epoch:   state.reset_epoch.clone(),
            stop:          state.stop_token.clone()
        };
        let processor = Processor {
            application: application.clone(),
            event_rx,
            prompt_tx: state.prompt_tx.clone(),
            pending: state.pending.clone(),
            prompted: state.prompted.clone(),
            reset_epoch: state.reset_epoch.clone(),
            retry: state.retry.clone(),
            pace: state.config.retry_backoff(),
            stop: state.stop_token.clone()
        };
        let pusher = Pusher {
            process_name:     state.identity.name.clone(),
            prompt_rx,
            downstreams:      state.downstreams.iter().map(|(name, actor)| (name.clone(), actor.clone())).collect(),
            delivery_timeout: state.config.delivery_timeout(),
            stop:             state.stop_token.clone()
        };

        state.puller = Some(tokio::spawn(puller.run()));
        state.processor = Some(tokio::spawn(processor.run()));
        state.pusher = Some(tokio::spawn(pusher.run()));

        // Catch up immediately instead of waiting out the first poll tick
        let upstream_names = application.upstream_names().await;
        state.pending.lock().await.extend(upstream_names);
        state.prompted.notify_one();

        state.lifecycle = Lifecycle::Running;
        event!(Level::DEBUG, event = process::LOOPS_STARTED, process = %state.identity);
        Ok(())
    }

    async fn handle_call(&self, method: &str, args: Value, state: &mut ProcessActorState) -> Result<Value, RunnerError> {
        event!(Level::DEBUG, event = process::CALL_RECEIVED, process = %state.identity, method = %method);

        let Some(application) = &state.application else {
            return Err(RunnerError::Lifecycle(format!(
                "cannot call method '{}' before process '{}' is initialized",
                method, state.identity
            )));
        };

        let result = state.retry.run(|| application.call(method, args.clone())).await;
        if let Err(e) = &result {
            event!(Level::WARN, event = process::CALL_FAILED,
                   process = %state.identity, method = %method, error = %e);
        }
        result
    }

    async fn handle_read_log(
        &self,
        after: u64,
        limit: usize,
        state: &mut ProcessActorState
    ) -> Result<Vec<NotificationRecord>, RunnerError> {
        let Some(application) = &state.application else {
            return Err(RunnerError::Lifecycle(format!(
                "cannot read the log of process '{}' before it is initialized",
                state.identity
            )));
        };
        state.retry.run(|| application.read_log(after, limit)).await
    }

    async fn handle_stop(&self, state: &mut ProcessActorState) -> Result<(), RunnerError> {
        if state.lifecycle == Lifecycle::Stopped {
            return Ok(());
        }

        event!(Level::DEBUG, event = process::PROCESS_STOPPING, process = %state.identity);
        state.stop_token.cancel();

        let join_timeout = state.config.loop_join_timeout();
        Self::join_loop("puller", state.puller.take(), join_timeout, &state.identity).await;
        Self::join_loop("processor", state.processor.take(), join_timeout, &state.identity).await;
        Self::join_loop("pusher", state.pusher.take(), join_timeout, &state.identity).await;

        if let Some(application) = &state.application {
            application.unsubscribe_prompt_hook().await;
        }

        state.lifecycle = Lifecycle::Stopped;
        event!(Level::DEBUG, event = process::PROCESS_STOPPED, process = %state.identity);
        Ok(())
    }

    async fn join_loop(name: &str, handle: Option<JoinHandle<()>>, join_timeout: Duration, identity: &ProcessIdentity) {
        let Some(mut handle) = handle else {
            return;
        };

        if tokio::time::timeout(join_timeout, &mut handle).await.is_err() {
            event!(Level::WARN, event = process::LOOP_JOIN_TIMED_OUT, process = %identity, loop_name = name);
            handle.abort();
        }
    }
}
