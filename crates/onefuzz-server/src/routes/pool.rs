use axum::extract::{Query, State};
use axum::Json;
use chrono::Utc;
use onefuzz_core::error::Error;
use onefuzz_core::ids::PoolId;
use onefuzz_core::pool::{Architecture, Os, Pool, PoolState};
use serde::Deserialize;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ListQuery {
    name: Option<String>,
}

pub async fn list(State(state): State<AppState>, Query(q): Query<ListQuery>) -> ApiResult<Json<Vec<Pool>>> {
    let pools = match q.name {
        Some(name) => state
            .store
            .pools()
            .get_by_name(&name.into())
            .await?
            .into_iter()
            .collect(),
        None => state.store.pools().search_all().await?,
    };
    Ok(Json(pools.into_iter().map(|p| p.value).collect()))
}

#[derive(Deserialize)]
pub struct CreateRequest {
    name: String,
    os: Os,
    arch: Architecture,
    #[serde(default)]
    managed: bool,
}

pub async fn create(State(state): State<AppState>, Json(req): Json<CreateRequest>) -> ApiResult<Json<Pool>> {
    let pool = Pool {
        pool_id: PoolId::new(),
        name: req.name.into(),
        os: req.os,
        arch: req.arch,
        managed: req.managed,
        state: PoolState::Running,
        created_at: Utc::now(),
    };
    let created = state.store.pools().insert(&pool).await?;
    Ok(Json(created.value))
}

#[derive(Deserialize)]
pub struct PatchRequest {
    name: String,
    state: PoolState,
}

pub async fn patch(State(state): State<AppState>, Json(req): Json<PatchRequest>) -> ApiResult<Json<Pool>> {
    let existing = state
        .store
        .pools()
        .get_by_name(&req.name.clone().into())
        .await?
        .ok_or_else(|| Error::unable_to_find(format!("no pool `{}`", req.name)))?;

    let mut pool = existing.value;
    pool.state = req.state;
    state.store.pools().replace(&pool, existing.version).await?;

    Ok(Json(pool))
}

#[derive(Deserialize)]
pub struct DeleteQuery {
    name: String,
}

pub async fn delete(State(state): State<AppState>, Query(q): Query<DeleteQuery>) -> ApiResult<Json<Pool>> {
    let existing = state
        .store
        .pools()
        .get_by_name(&q.name.clone().into())
        .await?
        .ok_or_else(|| Error::unable_to_find(format!("no pool `{}`", q.name)))?;

    // Only flags the pool; the row (and its work queue) goes away once the
    // drain tick observes every assigned task stopped and every scaleset
    // halted.
    let mut pool = existing.value;
    if pool.state >= PoolState::Shutdown {
        return Ok(Json(pool));
    }

    pool.state = PoolState::Shutdown;
    state.store.pools().replace(&pool, existing.version).await?;

    // Pool deletion cascades to its scalesets; each drains and halts on its
    // own schedule.
    for scaleset in state.store.scalesets().search_by_pool(&pool.name).await? {
        if scaleset.value.is_terminal() || scaleset.value.state == onefuzz_core::scaleset::ScalesetState::Shutdown {
            continue;
        }
        let mut s = scaleset.value;
        s.state = onefuzz_core::scaleset::ScalesetState::Shutdown;
        state.store.scalesets().replace(&s, scaleset.version).await?;
    }

    Ok(Json(pool))
}
