use std::collections::BTreeMap;

use axum::extract::{Query, State};
use axum::Json;
use chrono::Utc;
use onefuzz_core::error::Error;
use onefuzz_core::ids::ScalesetId;
use onefuzz_core::scaleset::{Scaleset, ScalesetAuth, ScalesetState};
use serde::Deserialize;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ListQuery {
    scaleset_id: Option<ScalesetId>,
    pool_name: Option<String>,
}

pub async fn list(State(state): State<AppState>, Query(q): Query<ListQuery>) -> ApiResult<Json<Vec<Scaleset>>> {
    let scalesets = if let Some(id) = q.scaleset_id {
        let scaleset = state
            .store
            .scalesets()
            .get(id)
            .await?
            .ok_or_else(|| Error::invalid_request(format!("unable to find scaleset `{id}`")))?;
        vec![scaleset]
    } else if let Some(pool_name) = q.pool_name {
        state.store.scalesets().search_by_pool(&pool_name.into()).await?
    } else {
        state.store.scalesets().search_active().await?
    };
    Ok(Json(scalesets.into_iter().map(|s| s.value).collect()))
}

#[derive(Deserialize)]
pub struct CreateRequest {
    pool_name: String,
    vm_sku: String,
    image: String,
    region: String,
    size: u32,
    #[serde(default)]
    min_size: u32,
    max_size: u32,
    #[serde(default)]
    spot: bool,
    #[serde(default)]
    ephemeral_os: bool,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    #[serde(default)]
    auth: Option<ScalesetAuth>,
}

pub async fn create(State(state): State<AppState>, Json(req): Json<CreateRequest>) -> ApiResult<Json<Scaleset>> {
    let pool_name: onefuzz_core::ids::PoolName = req.pool_name.into();
    let pool = state
        .store
        .pools()
        .get_by_name(&pool_name)
        .await?
        .ok_or_else(|| Error::invalid_request(format!("unknown pool `{pool_name}`")))?;
    if !pool.value.managed {
        return Err(Error::invalid_request(format!("pool `{pool_name}` is unmanaged and cannot host scalesets")).into());
    }

    let scaleset = Scaleset {
        scaleset_id: ScalesetId::new(),
        pool_name,
        state: ScalesetState::Init,
        vm_sku: req.vm_sku,
        image: req.image,
        region: req.region,
        size: req.size,
        min_size: req.min_size,
        max_size: req.max_size,
        spot: req.spot,
        ephemeral_os: req.ephemeral_os,
        needs_config_update: false,
        tags: req.tags,
        auth: req.auth,
        client_id: None,
        nodes: Vec::new(),
        error: None,
        created_at: Utc::now(),
    };
    let created = state.store.scalesets().insert(&scaleset).await?;
    Ok(Json(created.value))
}

#[derive(Deserialize)]
pub struct PatchRequest {
    scaleset_id: ScalesetId,
    #[serde(default)]
    size: Option<u32>,
}

pub async fn patch(State(state): State<AppState>, Json(req): Json<PatchRequest>) -> ApiResult<Json<Scaleset>> {
    let existing = state
        .store
        .scalesets()
        .get(req.scaleset_id)
        .await?
        .ok_or_else(|| Error::unable_to_find(format!("no scaleset `{}`", req.scaleset_id)))?;

    let mut scaleset = existing.value;
    if let Some(size) = req.size {
        scaleset.size = size;
        scaleset.state = ScalesetState::Resize;
    }
    state.store.scalesets().replace(&scaleset, existing.version).await?;

    Ok(Json(scaleset))
}

#[derive(Deserialize)]
pub struct DeleteQuery {
    scaleset_id: ScalesetId,
}

pub async fn delete(State(state): State<AppState>, Query(q): Query<DeleteQuery>) -> ApiResult<Json<Scaleset>> {
    let existing = state
        .store
        .scalesets()
        .get(q.scaleset_id)
        .await?
        .ok_or_else(|| Error::unable_to_find(format!("no scaleset `{}`", q.scaleset_id)))?;

    let mut scaleset = existing.value;
    if scaleset.state >= ScalesetState::Shutdown {
        return Ok(Json(scaleset));
    }

    scaleset.state = ScalesetState::Shutdown;
    state.store.scalesets().replace(&scaleset, existing.version).await?;

    Ok(Json(scaleset))
}
