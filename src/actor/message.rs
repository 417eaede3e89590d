//! Typed messages for actor communication

use std::collections::HashMap;

use ractor::{ActorRef, Message, RpcReplyPort};
use serde_json::Value;

use crate::{
    domain::{error::RunnerError, notification::NotificationRecord, prompt::Prompt},
    port::log::NotificationLogRead
};

/// Messages for ProcessActor instances (one per process and pipeline)
pub enum ProcessMessage {
    /// Construct the process core and wire it to its neighbours
    Init {
        upstream_logs:        HashMap<String, Box<dyn NotificationLogRead>>,
        downstream_processes: HashMap<String, ActorRef<ProcessMessage>>,
        reply:                RpcReplyPort<Result<(), RunnerError>>
    },
    /// Follow one more upstream log after initialization
    Follow {
        upstream_name: String,
        log:           Box<dyn NotificationLogRead>,
        reply:         RpcReplyPort<Result<(), RunnerError>>
    },
    /// Start the pull, process and push loops
    Run { reply: RpcReplyPort<Result<(), RunnerError>> },
    /// An upstream advertises new notifications; coalesced, never lossy for
    /// correctness
    Prompt { prompt: Prompt, reply: RpcReplyPort<()> },
    /// Invoke a named method on the process policy
    Call {
        method: String,
        args:   Value,
        reply:  RpcReplyPort<Result<Value, RunnerError>>
    },
    /// Serve a page of this process's own notification log
    ReadLog {
        after: u64,
        limit: usize,
        reply: RpcReplyPort<Result<Vec<NotificationRecord>, RunnerError>>
    },
    /// Stop the loops and release the prompt hook
    Stop { reply: RpcReplyPort<Result<(), RunnerError>> }
}

// Implement Message trait for Ractor
impl Message for ProcessMessage {}
