//! The node agent protocol.
//!
//! Every handler here is idempotent with respect to `(machine_id, monotonic
//! token)`: replaying a register, heartbeat or worker-event call must never
//! double-apply a transition. Handlers retry their
//! `get -> mutate -> replace` cycle on [`StoreError::Conflict`] and
//! otherwise surface a user-facing [`onefuzz_core::Error`].

use chrono::Utc;
use onefuzz_core::error::{Error, Result};
use onefuzz_core::ids::{MachineId, PoolName, ScalesetId, TaskId};
use onefuzz_core::node::{Node, NodeState};
use onefuzz_core::node_message::{NodeCommand, NodeMessage};
use onefuzz_core::node_task::{NodeTask, NodeTaskState};
use onefuzz_core::task::{TaskError, TaskState};

use crate::store::{retry_on_conflict, Store};

const RETRY_ATTEMPTS: u32 = 5;

pub struct RegisterRequest {
    pub machine_id: MachineId,
    pub pool_name: PoolName,
    pub scaleset_id: Option<ScalesetId>,
    pub version: String,
}

#[derive(Debug)]
pub struct RegisterResponse {
    pub node: Node,
    pub work_queue_url: String,
    pub commands_url: String,
    pub events_url: String,
}

/// `POST /api/agent_registration`. Creates or replaces the Node record.
pub async fn register(store: &Store, req: RegisterRequest) -> Result<RegisterResponse> {
    let pool = store
        .pools()
        .get_by_name(&req.pool_name)
        .await
        .map_err(|e| Error::invalid_request(e.to_string()))?
        .ok_or_else(|| Error::invalid_request(format!("unknown pool `{}`", req.pool_name)))?;

    let node = retry_on_conflict(RETRY_ATTEMPTS, || async {
        match store.nodes().get(req.machine_id).await? {
            Some(existing) => {
                let node = Node {
                    pool_name: req.pool_name.clone(),
                    pool_id: pool.value.pool_id,
                    scaleset_id: req.scaleset_id,
                    version: req.version.clone(),
                    ..existing.value
                };
                store.nodes().replace(&node, existing.version).await?;
                Ok(node)
            }
            None => {
                let node = Node {
                    machine_id: req.machine_id,
                    pool_name: req.pool_name.clone(),
                    pool_id: pool.value.pool_id,
                    scaleset_id: req.scaleset_id,
                    version: req.version.clone(),
                    state: NodeState::Init,
                    initialized_at: Some(Utc::now()),
                    heartbeat: None,
                    reimage_requested: false,
                    delete_requested: false,
                    debug_keep_node: false,
                };
                store.nodes().insert(&node).await?;
                Ok(node)
            }
        }
    })
    .await
    .map_err(|e| Error::invalid_request(e.to_string()))?;

    Ok(RegisterResponse {
        work_queue_url: format!("/api/agent_commands?machine_id={}&queue={}", node.machine_id, pool.value.name),
        commands_url: format!("/api/agent_commands?machine_id={}", node.machine_id),
        events_url: format!("/api/agent_events?machine_id={}", node.machine_id),
        node,
    })
}

/// `POST /api/agent_events` heartbeat variant. Silently ignored for unknown
/// nodes.
///
/// The first heartbeat from a node moves it `init -> ready`, and moves any
/// task scheduled onto it `scheduled -> setting_up` (the agent has picked up
/// its work set and is provisioning it).
pub async fn heartbeat(store: &Store, machine_id: MachineId) -> Result<()> {
    retry_on_conflict(RETRY_ATTEMPTS, || async {
        let Some(existing) = store.nodes().get(machine_id).await? else {
            return Ok(());
        };

        let mut node = existing.value;
        node.heartbeat = Some(Utc::now());
        if node.state == NodeState::Init {
            node.state = NodeState::Ready;
        }

        store.nodes().replace(&node, existing.version).await?;
        Ok(())
    })
    .await
    .map_err(|e| Error::invalid_request(e.to_string()))?;

    for task in store
        .tasks()
        .search_running_on(machine_id)
        .await
        .map_err(|e| Error::invalid_request(e.to_string()))?
    {
        if task.value.state != TaskState::Scheduled {
            continue;
        }
        let task_id = task.value.task_id;

        retry_on_conflict(RETRY_ATTEMPTS, || async {
            let Some(current) = store.tasks().get(task_id).await? else {
                return Ok(());
            };
            if current.value.state != TaskState::Scheduled {
                return Ok(());
            }
            let mut t = current.value;
            t.state = TaskState::SettingUp;
            t.heartbeat = Some(Utc::now());
            store.tasks().replace(&t, current.version).await?;
            Ok(())
        })
        .await
        .map_err(|e| Error::invalid_request(e.to_string()))?;

        store
            .node_tasks()
            .put(&NodeTask {
                machine_id,
                task_id,
                state: NodeTaskState::SettingUp,
            })
            .await
            .map_err(|e| Error::invalid_request(e.to_string()))?;
    }

    Ok(())
}

/// `GET /api/agent_commands`. Peek-lock: the agent acks by calling
/// [`ack_command`] once it has applied the command.
pub async fn pending_command(store: &Store, machine_id: MachineId) -> Result<Option<NodeMessage>> {
    let mut messages = store
        .node_messages()
        .peek(machine_id, 1)
        .await
        .map_err(|e| Error::invalid_request(e.to_string()))?;
    Ok(messages.pop())
}

pub async fn ack_command(store: &Store, machine_id: MachineId, message_id: i64) -> Result<()> {
    store
        .node_messages()
        .ack(machine_id, message_id)
        .await
        .map_err(|e| Error::invalid_request(e.to_string()))
}

/// `POST /api/node_add_ssh_key`.
pub async fn add_ssh_key(store: &Store, machine_id: MachineId, public_key: String) -> Result<()> {
    store
        .node_messages()
        .enqueue(machine_id, &NodeCommand::AddSshKey { public_key })
        .await
        .map_err(|e| Error::invalid_request(e.to_string()))?;
    Ok(())
}

/// Exit status an agent reports with a `done` worker event.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct ExitStatus {
    #[serde(default)]
    pub code: Option<i32>,
    #[serde(default)]
    pub signal: Option<i32>,
    pub success: bool,
}

/// The two shapes of `POST /api/agent_events` worker-event payloads.
pub enum WorkerEvent {
    Running {
        task_id: TaskId,
    },
    Done {
        task_id: TaskId,
        exit_status: ExitStatus,
        stdout: String,
        stderr: String,
    },
}

/// `POST /api/agent_events` worker-event variant.
///
/// Every call appends exactly one [`onefuzz_core::task_event`] entry,
/// regardless of whether the state transition it describes actually fires.
pub async fn worker_event(
    store: &Store,
    machine_id: MachineId,
    event: WorkerEvent,
    tail_truncate_bytes: usize,
) -> Result<()> {
    let (task_id, event_data) = match &event {
        WorkerEvent::Running { task_id } => (*task_id, serde_json::json!({"running": {"task_id": task_id}})),
        WorkerEvent::Done {
            task_id,
            exit_status,
            stdout,
            stderr,
        } => (
            *task_id,
            serde_json::json!({
                "done": {"task_id": task_id, "exit_status": exit_status, "stdout": stdout, "stderr": stderr}
            }),
        ),
    };

    store
        .task_events()
        .append(&onefuzz_core::task_event::TaskEvent {
            task_id,
            machine_id,
            event_data,
            created_at: Utc::now(),
        })
        .await
        .map_err(|e| Error::invalid_request(e.to_string()))?;

    match event {
        WorkerEvent::Running { task_id } => apply_running(store, machine_id, task_id).await,
        WorkerEvent::Done {
            task_id,
            exit_status,
            stdout,
            stderr,
        } => apply_done(store, machine_id, task_id, exit_status, stdout, stderr, tail_truncate_bytes).await,
    }
}

async fn apply_running(store: &Store, machine_id: MachineId, task_id: TaskId) -> Result<()> {
    let existing = store
        .tasks()
        .get(task_id)
        .await
        .map_err(|e| Error::invalid_request(e.to_string()))?
        .ok_or_else(|| Error::invalid_request(format!("unknown task `{task_id}`")))?;

    // A `running` report racing a stop is a no-op: a task's state index only
    // moves forward, never back out of `stopping`/`stopped`.
    if existing.value.state >= TaskState::Stopping {
        return Ok(());
    }

    retry_on_conflict(RETRY_ATTEMPTS, || async {
        let current = store.tasks().get(task_id).await?.unwrap_or_else(|| existing.clone());
        if current.value.state >= TaskState::Stopping {
            return Ok(());
        }
        let mut task = current.value;
        task.state = TaskState::Running;
        task.running_on = Some(machine_id);
        store.tasks().replace(&task, current.version).await?;
        Ok::<_, crate::error::StoreError>(())
    })
    .await
    .map_err(|e| Error::invalid_request(e.to_string()))?;

    store
        .node_tasks()
        .put(&NodeTask {
            machine_id,
            task_id,
            state: NodeTaskState::Running,
        })
        .await
        .map_err(|e| Error::invalid_request(e.to_string()))?;

    retry_on_conflict(RETRY_ATTEMPTS, || async {
        if let Some(existing) = store.nodes().get(machine_id).await? {
            let mut node = existing.value;
            node.state = NodeState::Busy;
            store.nodes().replace(&node, existing.version).await?;
        }
        Ok::<_, crate::error::StoreError>(())
    })
    .await
    .map_err(|e| Error::invalid_request(e.to_string()))?;

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn apply_done(
    store: &Store,
    machine_id: MachineId,
    task_id: TaskId,
    exit_status: ExitStatus,
    stdout: String,
    stderr: String,
    tail_truncate_bytes: usize,
) -> Result<()> {
    let existing = store
        .tasks()
        .get(task_id)
        .await
        .map_err(|e| Error::invalid_request(e.to_string()))?
        .ok_or_else(|| Error::invalid_request(format!("unknown task `{task_id}`")))?;

    // A done report for a task that never reached `running` means the node
    // never got to start it -- cancellation, not failure.
    let never_started = existing.value.state < TaskState::Running;

    let error = if never_started {
        Some(TaskError {
            code: onefuzz_core::error::ErrorCode::TaskCancelled,
            message: "task was cancelled before it started running".into(),
            stderr_tail: None,
            stdout_tail: None,
        })
    } else if !exit_status.success {
        Some(TaskError {
            code: onefuzz_core::error::ErrorCode::TaskFailed,
            message: "task exited with a non-success status".into(),
            stderr_tail: Some(tail(&stderr, tail_truncate_bytes)),
            stdout_tail: Some(tail(&stdout, tail_truncate_bytes)),
        })
    } else {
        None
    };

    retry_on_conflict(RETRY_ATTEMPTS, || async {
        let current = store.tasks().get(task_id).await?.unwrap_or_else(|| existing.clone());
        if current.value.state >= TaskState::Stopping {
            return Ok(());
        }
        let mut task = current.value;
        task.state = TaskState::Stopping;
        task.end_time = Some(Utc::now());
        task.error = error.clone();
        store.tasks().replace(&task, current.version).await?;
        Ok::<_, crate::error::StoreError>(())
    })
    .await
    .map_err(|e| Error::invalid_request(e.to_string()))?;

    store
        .node_tasks()
        .delete(machine_id, task_id)
        .await
        .map_err(|e| Error::invalid_request(e.to_string()))?;

    retry_on_conflict(RETRY_ATTEMPTS, || async {
        if let Some(existing) = store.nodes().get(machine_id).await? {
            let remaining = store.node_tasks().search_by_machine(machine_id).await?;
            if remaining.is_empty() {
                let mut node = existing.value;
                let destination = node.done_destination();
                if destination == NodeState::Halt {
                    store
                        .node_messages()
                        .enqueue(machine_id, &NodeCommand::Stop)
                        .await?;
                }
                node.state = destination;
                store.nodes().replace(&node, existing.version).await?;
            }
        }
        Ok::<_, crate::error::StoreError>(())
    })
    .await
    .map_err(|e| Error::invalid_request(e.to_string()))?;

    Ok(())
}

/// Truncates to the last `limit` bytes on a `char` boundary.
fn tail(s: &str, limit: usize) -> String {
    if s.len() <= limit {
        return s.to_string();
    }
    let start = s.len() - limit;
    let boundary = (start..s.len()).find(|&i| s.is_char_boundary(i)).unwrap_or(s.len());
    s[boundary..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_truncates_to_the_last_n_bytes() {
        assert_eq!(tail("hello world", 5), "world");
        assert_eq!(tail("short", 100), "short");
    }
}
