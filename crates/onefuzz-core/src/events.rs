use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{EventId, JobId, MachineId, NotificationId, PoolId, ScalesetId, TaskId, WebhookId};

/// Canonical webhook event types.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    JobCreated,
    JobStopped,
    TaskCreated,
    TaskScheduled,
    TaskStopped,
    TaskFailed,
    TaskHeartbeat,
    NodeCreated,
    NodeHeartbeat,
    NodeStateUpdated,
    NodeDeleted,
    CrashReported,
    RegressionReported,
    FileAdded,
    ScalesetCreated,
    ScalesetFailed,
    ScalesetResizeScheduled,
    ScalesetStateUpdated,
    ScalesetDeleted,
    ProxyCreated,
    ProxyDeleted,
    ProxyFailed,
    NotificationCreated,
    NotificationDeleted,
    NotificationFailed,
}

pub const EVENT_VERSION: u32 = 3;

/// Outbound webhook subscription. Events are durable and referenceable by id
/// for later replay.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Webhook {
    pub webhook_id: WebhookId,
    pub name: String,
    pub url: String,
    pub event_types: Vec<EventType>,
    pub secret_token_ref: Option<crate::secret::SecretRef>,
}

/// The outbound payload delivered to webhook subscribers.
///
/// Payloads too large for the delivery queue are replaced with a reference to
/// an Events container blob -- see [`EventPayload::Inline`] vs
/// [`EventPayload::BlobRef`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebhookMessage {
    pub event_id: EventId,
    pub event_type: EventType,
    pub event_version: u32,
    pub instance_id: uuid::Uuid,
    pub instance_name: String,
    pub created_at: DateTime<Utc>,
    pub webhook_id: WebhookId,
    pub event: EventPayload,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    Inline(Value),
    BlobRef { container: String, blob: String },
}

/// Convenience constructors for the event bodies referenced from the core
/// lifecycle machines. Kept intentionally loose (`serde_json::Value`) because
/// each event type has its own ad-hoc shape in the source system and the
/// scheduling core's job is to route and size-limit them, not validate their
/// schema.
pub fn job_created(job_id: JobId, project: &str, name: &str) -> Value {
    serde_json::json!({ "job_id": job_id, "project": project, "name": name })
}

pub fn job_stopped(job_id: JobId) -> Value {
    serde_json::json!({ "job_id": job_id })
}

pub fn task_scheduled(task_id: TaskId, job_id: JobId) -> Value {
    serde_json::json!({ "task_id": task_id, "job_id": job_id })
}

pub fn task_stopped(task_id: TaskId, job_id: JobId) -> Value {
    serde_json::json!({ "task_id": task_id, "job_id": job_id })
}

pub fn task_failed(task_id: TaskId, job_id: JobId, error: &crate::task::TaskError) -> Value {
    serde_json::json!({ "task_id": task_id, "job_id": job_id, "error": error })
}

pub fn node_heartbeat(machine_id: MachineId, pool_id: PoolId) -> Value {
    serde_json::json!({ "machine_id": machine_id, "pool_id": pool_id })
}

pub fn node_state_updated(machine_id: MachineId, state: crate::node::NodeState) -> Value {
    serde_json::json!({ "machine_id": machine_id, "state": state })
}

pub fn node_deleted(machine_id: MachineId) -> Value {
    serde_json::json!({ "machine_id": machine_id })
}

pub fn scaleset_resize_scheduled(scaleset_id: ScalesetId, size: u32) -> Value {
    serde_json::json!({ "scaleset_id": scaleset_id, "size": size })
}

pub fn scaleset_state_updated(
    scaleset_id: ScalesetId,
    state: crate::scaleset::ScalesetState,
) -> Value {
    serde_json::json!({ "scaleset_id": scaleset_id, "state": state })
}

pub fn notification_failed(notification_id: NotificationId, reason: &str) -> Value {
    serde_json::json!({ "notification_id": notification_id, "reason": reason })
}

pub fn crash_reported(report: &crate::report::Report) -> Value {
    serde_json::json!({
        "task_id": report.task_id,
        "job_id": report.job_id,
        "report": report,
    })
}

pub fn regression_reported(report: &crate::report::Report) -> Value {
    serde_json::json!({
        "task_id": report.task_id,
        "job_id": report.job_id,
        "report": report,
    })
}
