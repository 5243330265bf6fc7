use axum::extract::{Query, State};
use axum::Json;
use onefuzz_core::error::Error;
use onefuzz_core::ids::{ReproId, TaskId};
use onefuzz_core::repro::{Repro, ReproConfig, ReproState};
use serde::Deserialize;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ListQuery {
    vm_id: Option<ReproId>,
}

pub async fn list(State(state): State<AppState>, Query(q): Query<ListQuery>) -> ApiResult<Json<Vec<Repro>>> {
    let repros = match q.vm_id {
        Some(vm_id) => state.store.repros().get(vm_id).await?.into_iter().collect(),
        None => state.store.repros().search_non_terminal().await?,
    };
    Ok(Json(repros.into_iter().map(|r| r.value).collect()))
}

#[derive(Deserialize)]
pub struct CreateRequest {
    task_id: TaskId,
    config: ReproConfig,
}

pub async fn create(State(state): State<AppState>, Json(req): Json<CreateRequest>) -> ApiResult<Json<Repro>> {
    let task = state
        .store
        .tasks()
        .get(req.task_id)
        .await?
        .ok_or_else(|| Error::invalid_task(format!("no task `{}`", req.task_id)))?;

    let end_time = chrono::Utc::now() + chrono::Duration::hours(req.config.duration as i64);
    let repro = Repro {
        vm_id: ReproId::new(),
        task_id: req.task_id,
        state: ReproState::Init,
        os: task.value.os,
        config: req.config,
        auth: None,
        ip: None,
        end_time: Some(end_time),
        user_info: None,
        error: None,
    };
    let created = state.store.repros().insert(&repro).await?;
    Ok(Json(created.value))
}

#[derive(Deserialize)]
pub struct DeleteQuery {
    vm_id: ReproId,
}

pub async fn delete(State(state): State<AppState>, Query(q): Query<DeleteQuery>) -> ApiResult<Json<Repro>> {
    let existing = state
        .store
        .repros()
        .get(q.vm_id)
        .await?
        .ok_or_else(|| Error::unable_to_find(format!("no repro `{}`", q.vm_id)))?;

    let mut repro = existing.value;
    if repro.delete_is_noop() {
        state.store.repros().delete(repro.vm_id).await?;
        return Ok(Json(repro));
    }

    repro.state = ReproState::Stopping;
    state.store.repros().replace(&repro, existing.version).await?;

    Ok(Json(repro))
}
