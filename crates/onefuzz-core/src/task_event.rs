use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{MachineId, TaskId};

/// An append-only log entry describing something an agent reported about a
/// task.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub machine_id: MachineId,
    pub event_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
