use axum::extract::{Query, State};
use axum::Json;
use onefuzz_core::error::Error;
use onefuzz_core::ids::{MachineId, PoolName, ScalesetId, TaskId};
use onefuzz_core::node::Node;
use onefuzz_core::node_message::NodeMessage;
use onefuzz_runtime::protocol::{self, ExitStatus, RegisterRequest, WorkerEvent};
use serde::Deserialize;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct RegistrationRequest {
    machine_id: MachineId,
    pool_name: String,
    #[serde(default)]
    scaleset_id: Option<ScalesetId>,
    version: String,
}

#[derive(serde::Serialize)]
pub struct RegistrationResponse {
    node: Node,
    work_queue_url: String,
    commands_url: String,
    events_url: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegistrationRequest>,
) -> ApiResult<Json<RegistrationResponse>> {
    let resp = protocol::register(
        &state.store,
        RegisterRequest {
            machine_id: req.machine_id,
            pool_name: PoolName::from(req.pool_name),
            scaleset_id: req.scaleset_id,
            version: req.version,
        },
    )
    .await?;

    Ok(Json(RegistrationResponse {
        node: resp.node,
        work_queue_url: resp.work_queue_url,
        commands_url: resp.commands_url,
        events_url: resp.events_url,
    }))
}

/// `POST /api/agent_events`: a payload with a `worker_event` reports a
/// task's `running`/`done` status; anything else is a bare heartbeat, which
/// is a silent no-op for unknown machines.
#[derive(Deserialize)]
pub struct EventsRequest {
    machine_id: MachineId,
    #[serde(default)]
    worker_event: Option<WorkerEventBody>,
}

#[derive(Deserialize)]
pub struct WorkerEventBody {
    #[serde(default)]
    running: Option<RunningEvent>,
    #[serde(default)]
    done: Option<DoneEvent>,
}

#[derive(Deserialize)]
pub struct RunningEvent {
    task_id: TaskId,
}

#[derive(Deserialize)]
pub struct DoneEvent {
    task_id: TaskId,
    exit_status: ExitStatus,
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
}

pub async fn events(State(state): State<AppState>, Json(req): Json<EventsRequest>) -> ApiResult<Json<()>> {
    let Some(worker_event) = req.worker_event else {
        protocol::heartbeat(&state.store, req.machine_id).await?;
        return Ok(Json(()));
    };

    let event = match (worker_event.running, worker_event.done) {
        (Some(running), None) => WorkerEvent::Running {
            task_id: running.task_id,
        },
        (None, Some(done)) => WorkerEvent::Done {
            task_id: done.task_id,
            exit_status: done.exit_status,
            stdout: done.stdout,
            stderr: done.stderr,
        },
        _ => {
            return Err(Error::invalid_request("worker event must carry exactly one of `running` or `done`").into());
        }
    };

    protocol::worker_event(&state.store, req.machine_id, event, state.config.tail_truncate_bytes).await?;
    Ok(Json(()))
}

#[derive(Deserialize)]
pub struct CommandsQuery {
    machine_id: MachineId,
}

pub async fn commands(
    State(state): State<AppState>,
    Query(q): Query<CommandsQuery>,
) -> ApiResult<Json<Option<NodeMessage>>> {
    let message = protocol::pending_command(&state.store, q.machine_id).await?;
    Ok(Json(message))
}

#[derive(Deserialize)]
pub struct AckQuery {
    machine_id: MachineId,
    message_id: i64,
}

pub async fn ack(State(state): State<AppState>, Query(q): Query<AckQuery>) -> ApiResult<Json<()>> {
    protocol::ack_command(&state.store, q.machine_id, q.message_id).await?;
    Ok(Json(()))
}

#[derive(Deserialize)]
pub struct AddSshKeyRequest {
    machine_id: MachineId,
    public_key: String,
}

pub async fn add_ssh_key(State(state): State<AppState>, Json(req): Json<AddSshKeyRequest>) -> ApiResult<Json<()>> {
    protocol::add_ssh_key(&state.store, req.machine_id, req.public_key).await?;
    Ok(Json(()))
}
