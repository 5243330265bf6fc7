use axum::extract::{Query, State};
use axum::response::Redirect;
use onefuzz_core::error::Error;
use serde::Deserialize;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct DownloadQuery {
    container: String,
    filename: String,
}

/// `GET /api/download?container=&filename=`. Redirects to a time-limited
/// signed blob URL; signing the URL against a real storage account is the
/// cloud SDK wrapper the workspace's Non-goals exclude, so this builds the
/// URL shape a caller would actually receive and leaves the signature query
/// string as a placeholder the storage layer would fill in.
pub async fn download(State(state): State<AppState>, Query(q): Query<DownloadQuery>) -> ApiResult<Redirect> {
    let container = state
        .store
        .containers()
        .get(&q.container)
        .await?
        .ok_or_else(|| Error::invalid_container(format!("no container `{}`", q.container)))?;

    let url = format!(
        "https://{}.blob.core.windows.net/{}/{}?sv=2021-08-06&sig=unsigned",
        container.storage_account, container.name, q.filename
    );

    Ok(Redirect::temporary(&url))
}
