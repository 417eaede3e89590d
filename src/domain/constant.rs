//! Domain Events - Structured events for internal monitoring and debugging

/// SystemRunner Events
pub mod runner {
    pub const RUNNER_STARTING: &str = "runner.starting";
    pub const PROCESS_SPAWNED: &str = "process.spawned";
    pub const PROCESS_SPAWN_FAILED: &str = "process.spawn_failed";
    pub const PROCESSES_INITIALIZED: &str = "processes.initialized";
    pub const RUNNER_STARTED: &str = "runner.started";
    pub const RUNNER_CLOSING: &str = "runner.closing";
    pub const RUNNER_CLOSED: &str = "runner.closed";
    pub const PROCESS_STOP_FAILED: &str = "process.stop_failed";
}

/// ProcessActor Events
pub mod process {
    pub const ACTOR_STARTED: &str = "actor.started";
    pub const PROCESS_INITIALIZED: &str = "process.initialized";
    pub const UPSTREAM_FOLLOWED: &str = "upstream.followed";
    pub const LOOPS_STARTED: &str = "loops.started";
    pub const PROMPT_RECEIVED: &str = "prompt.received";
    pub const PROMPT_HOOK_CLOSED: &str = "prompt.hook_closed";
    pub const CALL_RECEIVED: &str = "call.received";
    pub const CALL_FAILED: &str = "call.failed";
    pub const PROCESS_STOPPING: &str = "process.stopping";
    pub const PROCESS_STOPPED: &str = "process.stopped";
    pub const LOOP_JOIN_TIMED_OUT: &str = "loop.join_timed_out";
}

/// Puller Loop Events
pub mod puller {
    pub const NOTIFICATIONS_PULLED: &str = "notifications.pulled";
    pub const PULL_FAILED: &str = "pull.failed";
    pub const ROUND_ABANDONED: &str = "round.abandoned";
    pub const PULLER_STOPPED: &str = "puller.stopped";
}

/// Processor Loop Events
pub mod processor {
    pub const EVENT_APPLIED: &str = "event.applied";
    pub const EVENT_APPLY_FAILED: &str = "event.apply_failed";
    pub const STALE_EVENT_SKIPPED: &str = "event.stale_skipped";
    pub const RESET_STARTED: &str = "reset.started";
    pub const RESET_COMPLETED: &str = "reset.completed";
    pub const RESET_FAILED: &str = "reset.failed";
    pub const PROCESSOR_STOPPED: &str = "processor.stopped";
}

/// Pusher Loop Events
pub mod pusher {
    pub const PROMPT_PUSHED: &str = "prompt.pushed";
    pub const PROMPT_DELIVERY_FAILED: &str = "prompt.delivery_failed";
    pub const PUSHER_STOPPED: &str = "pusher.stopped";
}

/// Store Events
pub mod store {
    pub const STORE_OPENED: &str = "store.opened";
    pub const COMMIT_CONFLICT: &str = "commit.conflict";
}

/// Retry Events
pub mod retry {
    pub const ATTEMPT_FAILED: &str = "attempt.failed";
    pub const ATTEMPTS_EXHAUSTED: &str = "attempts.exhausted";
}
