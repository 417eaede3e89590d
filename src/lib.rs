//! # Procline
//!
//! A library for running systems of event-sourced processes over durable notification logs.
//!
//! This crate provides functionality to:
//! - Define process pipelines where each process follows the notification logs of its upstreams
//! - Run one actor per process and pipeline, each with its own pull, process and push loops
//! - Apply upstream events through injected policies and record the results atomically with
//!   tracking positions, so every notification is processed exactly once
//! - Recover from processing errors by resetting readers to the durable tracking positions
//! - Route synchronous method calls to individual processes

// Public API modules
pub mod actor;
pub mod adapter;
pub mod config;
pub mod domain;
pub mod port;
pub mod process;

// Re-export commonly used types
pub use actor::{NotificationLogView, ProcessActor, ProcessMessage, SystemRunner};
pub use config::RunnerConfig;
pub use domain::{
    error::RunnerError,
    event::DomainEvent,
    identity::{DEFAULT_PIPELINE_ID, PipelineId, ProcessIdentity},
    notification::NotificationRecord,
    system::{ProcessDefinition, System}
};
pub use port::{
    policy::{CallOutcome, PolicyFactory, ProcessPolicy},
    store::{ProcessStore, StoreFactory}
};
