use std::collections::BTreeMap;

use axum::extract::{Query, State};
use axum::Json;
use onefuzz_core::container::Container;
use onefuzz_core::error::Error;
use serde::Deserialize;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateRequest {
    name: String,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

pub async fn create(State(state): State<AppState>, Json(req): Json<CreateRequest>) -> ApiResult<Json<Container>> {
    let container = Container {
        name: req.name,
        // Account placement is an out-of-scope storage-management concern;
        // every container lands on the instance's single configured account.
        storage_account: state.config.instance_name.clone(),
        metadata: req.metadata,
    };
    state.store.containers().insert(&container).await?;
    Ok(Json(container))
}

#[derive(Deserialize)]
pub struct DeleteQuery {
    name: String,
}

pub async fn delete(State(state): State<AppState>, Query(q): Query<DeleteQuery>) -> ApiResult<Json<()>> {
    state
        .store
        .containers()
        .get(&q.name)
        .await?
        .ok_or_else(|| Error::invalid_container(format!("no container `{}`", q.name)))?;
    state.store.containers().delete(&q.name).await?;
    Ok(Json(()))
}
