use serde::{Deserialize, Serialize};

use crate::ids::{MachineId, TaskId};

#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "node_task_state", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum NodeTaskState {
    Init,
    SettingUp,
    Running,
}

/// Association record between a node and a task it is running. Deleted when
/// the node is reimaged.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeTask {
    pub machine_id: MachineId,
    pub task_id: TaskId,
    pub state: NodeTaskState,
}
