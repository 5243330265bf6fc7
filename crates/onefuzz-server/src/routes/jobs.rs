use axum::extract::{Query, State};
use axum::Json;
use chrono::Utc;
use onefuzz_core::error::Error;
use onefuzz_core::ids::JobId;
use onefuzz_core::job::{Job, JobConfig, JobState, UserInfo};
use serde::Deserialize;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ListQuery {
    job_id: Option<JobId>,
}

pub async fn list(State(state): State<AppState>, Query(q): Query<ListQuery>) -> ApiResult<Json<Vec<Job>>> {
    let jobs = match q.job_id {
        Some(job_id) => state.store.jobs().get(job_id).await?.into_iter().collect(),
        None => state.store.jobs().search_non_terminal().await?,
    };
    Ok(Json(jobs.into_iter().map(|j| j.value).collect()))
}

#[derive(Deserialize)]
pub struct CreateRequest {
    config: JobConfig,
    #[serde(default)]
    user_info: Option<UserInfo>,
}

pub async fn create(State(state): State<AppState>, Json(req): Json<CreateRequest>) -> ApiResult<Json<Job>> {
    let job = Job {
        job_id: JobId::new(),
        state: JobState::Enabled,
        config: req.config,
        user_info: req.user_info,
        created_at: Utc::now(),
        error: None,
    };
    let created = state.store.jobs().insert(&job).await?;
    Ok(Json(created.value))
}

#[derive(Deserialize)]
pub struct DeleteQuery {
    job_id: JobId,
}

pub async fn delete(State(state): State<AppState>, Query(q): Query<DeleteQuery>) -> ApiResult<Json<Job>> {
    let existing = state
        .store
        .jobs()
        .get(q.job_id)
        .await?
        .ok_or_else(|| Error::unable_to_find(format!("no job `{}`", q.job_id)))?;

    // Deleting a job that is already stopping or stopped is a no-op.
    let mut job = existing.value;
    if job.state >= JobState::Stopping {
        return Ok(Json(job));
    }

    job.state = JobState::Stopping;
    state.store.jobs().replace(&job, existing.version).await?;

    Ok(Json(job))
}
