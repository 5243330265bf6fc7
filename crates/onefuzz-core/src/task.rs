use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{JobId, MachineId, TaskId};
use crate::pool::Os;

/// Lifecycle of a [`Task`]. Declaration order is the monotonic state index:
/// `init -> waiting -> scheduled -> setting_up -> running -> stopping ->
/// stopped`.
#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "task_state", rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Init,
    Waiting,
    Scheduled,
    SettingUp,
    Running,
    Stopping,
    Stopped,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        self == TaskState::Stopped
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContainerRef {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolRef {
    pub count: u32,
    pub name: crate::ids::PoolName,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskDetails {
    #[serde(rename = "type")]
    pub kind: String,
    pub duration: u32,
    #[serde(default)]
    pub target_exe: Option<String>,
    #[serde(default)]
    pub target_options: Vec<String>,
}

/// Attributes used to decide whether sibling tasks may be bundled onto the
/// same work-set message.
#[derive(Clone, Debug, Default, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub struct ColocationKey {
    pub os: Option<Os>,
    pub pool: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default)]
    pub prereq_tasks: Vec<TaskId>,
    pub containers: Vec<ContainerRef>,
    pub pool: PoolRef,
    pub task: TaskDetails,
    #[serde(default)]
    pub colocate: bool,
    #[serde(default)]
    pub target_count: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskError {
    pub code: crate::error::ErrorCode,
    pub message: String,
    #[serde(default)]
    pub stderr_tail: Option<String>,
    #[serde(default)]
    pub stdout_tail: Option<String>,
}

/// A single unit of work (fuzz, coverage, crash-report, merge, repro,
/// analysis) with a pool affinity and typed config.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub job_id: JobId,
    pub state: TaskState,
    pub os: Os,
    pub config: TaskConfig,
    pub error: Option<TaskError>,
    pub heartbeat: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub user_info: Option<crate::job::UserInfo>,
    pub created_at: DateTime<Utc>,
    pub running_on: Option<MachineId>,
}
