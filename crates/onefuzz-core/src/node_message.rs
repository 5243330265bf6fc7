use serde::{Deserialize, Serialize};

use crate::ids::{MachineId, TaskId};

/// A server -> agent command. FIFO per machine.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum NodeCommand {
    Stop,
    StopTask { task_id: TaskId },
    AddSshKey { public_key: String },
}

/// A single queued command for one machine, FIFO within that machine's
/// partition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeMessage {
    pub machine_id: MachineId,
    /// Monotonic within a machine; used for peek-lock/ack semantics.
    pub message_id: i64,
    pub command: NodeCommand,
}
