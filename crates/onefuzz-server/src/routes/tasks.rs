use axum::extract::{Query, State};
use axum::Json;
use chrono::Utc;
use onefuzz_core::error::Error;
use onefuzz_core::ids::{JobId, TaskId};
use onefuzz_core::job::UserInfo;
use onefuzz_core::pool::Os;
use onefuzz_core::task::{Task, TaskConfig, TaskState};
use serde::Deserialize;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ListQuery {
    task_id: Option<TaskId>,
    job_id: Option<JobId>,
}

pub async fn list(State(state): State<AppState>, Query(q): Query<ListQuery>) -> ApiResult<Json<Vec<Task>>> {
    let tasks = if let Some(task_id) = q.task_id {
        state.store.tasks().get(task_id).await?.into_iter().collect()
    } else if let Some(job_id) = q.job_id {
        state.store.tasks().search_by_job(job_id).await?
    } else {
        return Err(Error::invalid_request("must supply task_id or job_id").into());
    };
    Ok(Json(tasks.into_iter().map(|t| t.value).collect()))
}

#[derive(Deserialize)]
pub struct CreateRequest {
    job_id: JobId,
    os: Os,
    config: TaskConfig,
    #[serde(default)]
    user_info: Option<UserInfo>,
}

pub async fn create(State(state): State<AppState>, Json(req): Json<CreateRequest>) -> ApiResult<Json<Task>> {
    state
        .store
        .jobs()
        .get(req.job_id)
        .await?
        .ok_or_else(|| Error::invalid_job(format!("no job `{}`", req.job_id)))?;

    let pool = state
        .store
        .pools()
        .get_by_name(&req.config.pool.name)
        .await?
        .ok_or_else(|| Error::invalid_request(format!("unknown pool `{}`", req.config.pool.name)))?;
    if pool.value.os != req.os {
        return Err(Error::invalid_request(format!(
            "task os `{:?}` does not match pool `{}` ({:?})",
            req.os, pool.value.name, pool.value.os
        ))
        .into());
    }

    let task = Task {
        task_id: TaskId::new(),
        job_id: req.job_id,
        state: TaskState::Waiting,
        os: req.os,
        config: req.config,
        error: None,
        heartbeat: None,
        end_time: None,
        user_info: req.user_info,
        created_at: Utc::now(),
        running_on: None,
    };
    let created = state.store.tasks().insert(&task).await?;
    Ok(Json(created.value))
}

#[derive(Deserialize)]
pub struct DeleteQuery {
    task_id: TaskId,
}

pub async fn delete(State(state): State<AppState>, Query(q): Query<DeleteQuery>) -> ApiResult<Json<Task>> {
    let existing = state
        .store
        .tasks()
        .get(q.task_id)
        .await?
        .ok_or_else(|| Error::unable_to_find(format!("no task `{}`", q.task_id)))?;

    // Cancelling a task that is already stopping or stopped is a no-op.
    let mut task = existing.value;
    if task.state >= TaskState::Stopping {
        return Ok(Json(task));
    }

    task.state = TaskState::Stopping;
    state.store.tasks().replace(&task, existing.version).await?;

    Ok(Json(task))
}
