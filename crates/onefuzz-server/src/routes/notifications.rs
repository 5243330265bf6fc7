use axum::extract::{Query, State};
use axum::Json;
use chrono::Utc;
use onefuzz_core::error::Error;
use onefuzz_core::ids::NotificationId;
use onefuzz_core::notification::{Notification, NotificationConfig};
use serde::Deserialize;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ListQuery {
    container: Option<String>,
}

pub async fn list(State(state): State<AppState>, Query(q): Query<ListQuery>) -> ApiResult<Json<Vec<Notification>>> {
    let Some(container) = q.container else {
        return Err(Error::invalid_request("must supply container").into());
    };
    let notifications = state.store.notifications().search_by_container(&container).await?;
    Ok(Json(notifications.into_iter().map(|n| n.value).collect()))
}

#[derive(Deserialize)]
pub struct CreateRequest {
    container: String,
    config: NotificationConfig,
    #[serde(default)]
    replace_existing: bool,
}

pub async fn create(State(state): State<AppState>, Json(req): Json<CreateRequest>) -> ApiResult<Json<Notification>> {
    if req.replace_existing {
        let existing = state.store.notifications().search_by_container(&req.container).await?;
        for n in existing {
            if n.value.config.kind() == req.config.kind() {
                state.store.notifications().delete(n.value.notification_id).await?;
            }
        }
    }

    let notification = Notification {
        notification_id: NotificationId::new(),
        container: req.container,
        config: req.config,
        replace_existing: req.replace_existing,
        created_at: Utc::now(),
    };
    let created = state.store.notifications().insert(&notification).await?;
    Ok(Json(created.value))
}

#[derive(Deserialize)]
pub struct DeleteQuery {
    notification_id: NotificationId,
}

pub async fn delete(State(state): State<AppState>, Query(q): Query<DeleteQuery>) -> ApiResult<Json<()>> {
    state
        .store
        .notifications()
        .get(q.notification_id)
        .await?
        .ok_or_else(|| Error::unable_to_find(format!("no notification `{}`", q.notification_id)))?;
    state.store.notifications().delete(q.notification_id).await?;
    Ok(Json(()))
}
