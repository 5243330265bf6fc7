use onefuzz_core::ids::{MachineId, TaskId};
use onefuzz_core::node::NodeState;
use onefuzz_core::task::TaskState;
use serde::{Deserialize, Serialize};

/// `onefuzz:task` notification payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub state: TaskState,
    #[serde(default)]
    pub running_on: Option<MachineId>,
}

/// `onefuzz:node` notification payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Node {
    pub machine_id: MachineId,
    pub state: NodeState,
}

/// `onefuzz:worker` notification payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Worker {
    pub worker_id: i64,
    pub deleted: bool,
}
