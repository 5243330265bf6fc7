use axum::extract::{Query, State};
use axum::Json;
use onefuzz_core::error::Error;
use onefuzz_core::ids::{MachineId, PoolName};
use onefuzz_core::node::Node;
use onefuzz_core::node_message::NodeCommand;
use serde::Deserialize;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ListQuery {
    machine_id: Option<MachineId>,
    pool_name: Option<String>,
}

pub async fn list(State(state): State<AppState>, Query(q): Query<ListQuery>) -> ApiResult<Json<Vec<Node>>> {
    let nodes = if let Some(id) = q.machine_id {
        state.store.nodes().get(id).await?.into_iter().collect()
    } else if let Some(pool_name) = q.pool_name {
        state
            .store
            .nodes()
            .search_ready_in_pool(&PoolName::from(pool_name))
            .await?
    } else {
        state.store.nodes().search_not_halted().await?
    };
    Ok(Json(nodes.into_iter().map(|n| n.value).collect()))
}

/// PATCH = reimage: flags the node for reimage on its next done transition.
#[derive(Deserialize)]
pub struct PatchRequest {
    machine_id: MachineId,
}

pub async fn patch(State(state): State<AppState>, Json(req): Json<PatchRequest>) -> ApiResult<Json<Node>> {
    let existing = state
        .store
        .nodes()
        .get(req.machine_id)
        .await?
        .ok_or_else(|| Error::unable_to_find(format!("no node `{}`", req.machine_id)))?;

    let mut node = existing.value;
    node.reimage_requested = true;
    state.store.nodes().replace(&node, existing.version).await?;

    Ok(Json(node))
}

/// POST requests the node stop whatever it is running and return to
/// `ready`, without deleting its database row (unlike DELETE).
#[derive(Deserialize)]
pub struct StopRequest {
    machine_id: MachineId,
}

pub async fn stop(State(state): State<AppState>, Json(req): Json<StopRequest>) -> ApiResult<Json<Node>> {
    let existing = state
        .store
        .nodes()
        .get(req.machine_id)
        .await?
        .ok_or_else(|| Error::unable_to_find(format!("no node `{}`", req.machine_id)))?;

    state
        .store
        .node_messages()
        .enqueue(req.machine_id, &NodeCommand::Stop)
        .await?;

    Ok(Json(existing.value))
}

#[derive(Deserialize)]
pub struct DeleteQuery {
    machine_id: MachineId,
}

pub async fn delete(State(state): State<AppState>, Query(q): Query<DeleteQuery>) -> ApiResult<Json<Node>> {
    let existing = state
        .store
        .nodes()
        .get(q.machine_id)
        .await?
        .ok_or_else(|| Error::unable_to_find(format!("no node `{}`", q.machine_id)))?;

    let mut node = existing.value;
    node.delete_requested = true;
    state.store.nodes().replace(&node, existing.version).await?;

    Ok(Json(node))
}
