use std::time::Duration;

/// Tunables for the periodic control loops run by each worker process.
///
/// Scheduler jitter, heartbeat cadence and timeout, the node force-reimage
/// deadline, queue size limits and autoscaler batching.
#[derive(Clone)]
pub struct Config {
    /// How often a worker updates its own heartbeat row in `onefuzz.worker`.
    ///
    /// Actual periods are jittered downwards by up to 1/4 to avoid thundering
    /// herds against the database.
    pub heartbeat_interval: Duration,

    /// The timeout after which a worker process, or a node, is considered
    /// dead if its heartbeat hasn't advanced.
    ///
    /// Recommended to be at least 2x `heartbeat_interval`.
    pub heartbeat_timeout: Duration,

    /// A task's assigned node is given this long to heartbeat after being
    /// scheduled before the task is force-failed with `TASK_CANCELLED`.
    pub node_assignment_grace: Duration,

    /// Multiplier on `heartbeat_timeout` after which a node that never
    /// acknowledged its stop command is force-reimaged.
    pub force_reimage_multiplier: u32,

    /// Upper bound on scheduler tick jitter.
    pub scheduler_jitter: Duration,

    /// How often the autoscaler control loop runs per scaleset.
    pub autoscaler_interval: Duration,

    /// Maximum number of scaleset instances touched by a single batched
    /// resize call.
    pub autoscaler_batch_size: u32,

    /// Maximum permitted size, in bytes, of a queued work-set message before
    /// the scheduler truncates stdout/stderr tails and retries.
    pub max_queue_message_bytes: usize,

    /// Size that stdout/stderr tails are truncated to when a message is too
    /// large to enqueue or persist.
    pub tail_truncate_bytes: usize,

    /// Maximum permitted frames retained in a minimized call stack.
    pub minimized_stack_depth: usize,

    /// Bound on notification delivery attempts before a dispatch is given up
    /// on and recorded as `notification_failed`.
    pub notification_max_attempts: u32,

    /// Stamped onto every outbound [`onefuzz_core::events::WebhookMessage`].
    pub instance_id: uuid::Uuid,
    pub instance_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(120),
            node_assignment_grace: Duration::from_secs(15 * 60),
            force_reimage_multiplier: 2,
            scheduler_jitter: Duration::from_secs(30),
            autoscaler_interval: Duration::from_secs(60),
            autoscaler_batch_size: 500,
            max_queue_message_bytes: 64 * 1024,
            tail_truncate_bytes: 4 * 1024,
            minimized_stack_depth: 30,
            notification_max_attempts: 5,
            instance_id: uuid::Uuid::nil(),
            instance_name: "onefuzz".into(),
        }
    }
}
