//! The `{status, title, detail}` error shape as an axum
//! [`IntoResponse`] impl for [`onefuzz_core::error::Error`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use onefuzz_core::error::Error as CoreError;
use onefuzz_runtime::error::StoreError;
use serde::Serialize;

pub struct ApiError(pub CoreError);

#[derive(Serialize)]
struct Body {
    status: u16,
    title: String,
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.code().status();
        let body = Body {
            status,
            title: self.0.code().to_string(),
            detail: self.0.detail().to_string(),
        };
        let code = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (code, Json(body)).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

/// A [`StoreError`] reaching an HTTP boundary is an infrastructure failure,
/// not a client mistake -- logged with full context and surfaced as a plain
/// 500 rather than mapped onto one of the named error codes.
impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "store error reached the API boundary");
        Self(CoreError::task_failed(err.to_string()))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
