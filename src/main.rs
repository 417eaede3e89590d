//! # Procline CLI Application
//!
//! Runs a small demo system of two event-sourced processes: a `greeter` that
//! answers `greet` calls and records a notification for each greeting, and a
//! `mirror` that follows the greeter's log and echoes every greeting into its
//! own log.
//!
//! ## Usage
//!
//! ```bash
//! # Run with the in-memory datastore
//! procline
//!
//! # Keep the notification logs on disk
//! procline --datastore rocksdb:/var/lib/procline
//!
//! # Run the same system on three pipelines
//! procline --pipelines 0,1,2
//! ```
//!
//! The process stays up until Ctrl-C, greeting a new visitor every couple of
//! seconds and logging the replies. Set `RUST_LOG=procline=debug` to watch
//! the pull, process and push loops at work.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use clap::Parser;
use procline::{
    CallOutcome, DEFAULT_PIPELINE_ID, DomainEvent, PipelineId, PolicyFactory, ProcessDefinition, ProcessIdentity,
    ProcessPolicy, RunnerConfig, RunnerError, System, SystemRunner
};
use serde_json::{Value, json};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "procline", version, about = "Run a demo system of event-sourced processes")]
struct Cli {
    /// Datastore URI, e.g. `inmemory` or `rocksdb:/var/lib/procline`
    #[arg(long)]
    datastore: Option<String>,

    /// Comma-separated pipeline ids to run the system on
    #[arg(long, value_delimiter = ',')]
    pipelines: Option<Vec<PipelineId>>
}

#[tokio::main]
async fn main() -> Result<(), RunnerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("procline=info")))
        .init();

    let cli = Cli::parse();

    let mut config = RunnerConfig::load()?;
    if let Some(datastore) = cli.datastore {
        config.datastore = Some(datastore);
    }
    if let Some(pipelines) = cli.pipelines {
        config.pipeline_ids = pipelines;
    }
    if config.datastore.is_none() {
        config.datastore = Some("inmemory".to_string());
    }

    let system = System::builder()
        .process(ProcessDefinition::new("greeter", Arc::new(StatelessPolicyFactory(Arc::new(GreeterPolicy)))))
        .process(ProcessDefinition::new("mirror", Arc::new(StatelessPolicyFactory(Arc::new(MirrorPolicy)))))
        .pipe(["greeter", "mirror"])
        .build()?;

    let mut system_runner = SystemRunner::new(system, config)?;
    system_runner.start().await?;

    let mut visits = 0u64;
    let mut ticker = tokio::time::interval(Duration::from_secs(2));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                visits += 1;
                let args = json!({"name": format!("visitor-{}", visits)});
                match system_runner.call("greeter", DEFAULT_PIPELINE_ID, "greet", args).await {
                    Ok(reply) => info!(reply = %reply, "greeting delivered"),
                    Err(e) => warn!(error = %e, "greeting failed")
                }
            }
        }
    }

    system_runner.close().await
}

/// Greets callers and records one notification per greeting
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
            other => Err(RunnerError::UnknownMethod(format!("greeter does not handle '{}'", other)))
        }
    }
}

/// Echoes every upstream greeting into its own log
struct MirrorPolicy;

#[async_trait]
impl ProcessPolicy for MirrorPolicy {
    async fn apply(&self, event: &DomainEvent) -> Result<Vec<DomainEvent>, RunnerError> {
        Ok(vec![DomainEvent::new("mirror.echoed", event.state.clone())])
    }
}

/// Hands out the same policy for every pipeline instance
struct StatelessPolicyFactory(Arc<dyn ProcessPolicy>);

impl PolicyFactory for StatelessPolicyFactory {
    fn build(&self, _identity: &ProcessIdentity) -> Arc<dyn ProcessPolicy> {
        self.0.clone()
    }
}
