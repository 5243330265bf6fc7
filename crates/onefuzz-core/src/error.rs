//! The error taxonomy shared by every component.
//!
//! REST handlers, agent protocol handlers and the background lifecycle loops
//! all report failures through [`Error`], which carries one of the
//! [`ErrorCode`] variants surfaced over the REST API. This keeps the
//! `{status, title, detail}` error shape uniform no matter which component
//! raised it.
use std::fmt;

/// Canonical error codes surfaced to API and agent clients.
///
/// These map 1:1 onto the `title` field of the REST error shape.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidRequest,
    InvalidJob,
    InvalidTask,
    UnableToFind,
    Unauthorized,
    TaskFailed,
    TaskCancelled,
    InvalidContainer,
    VmCreateFailed,
}

impl ErrorCode {
    /// The HTTP status code this error should be reported with.
    pub fn status(self) -> u16 {
        match self {
            ErrorCode::InvalidRequest | ErrorCode::InvalidJob | ErrorCode::InvalidTask => 400,
            ErrorCode::Unauthorized => 401,
            // A missing container surfaces as a 404 with its own title, so a
            // download of a bad container name reads as "not found" rather
            // than "malformed request".
            ErrorCode::UnableToFind | ErrorCode::InvalidContainer => 404,
            ErrorCode::TaskFailed | ErrorCode::TaskCancelled | ErrorCode::VmCreateFailed => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::InvalidJob => "INVALID_JOB",
            ErrorCode::InvalidTask => "INVALID_TASK",
            ErrorCode::UnableToFind => "UNABLE_TO_FIND",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::TaskFailed => "TASK_FAILED",
            ErrorCode::TaskCancelled => "TASK_CANCELLED",
            ErrorCode::InvalidContainer => "INVALID_CONTAINER",
            ErrorCode::VmCreateFailed => "VM_CREATE_FAILED",
        };
        f.write_str(s)
    }
}

/// An opaque, user-facing error.
///
/// Wraps an [`ErrorCode`] plus a human-readable detail message. Intentionally
/// does not implement `From<sqlx::Error>` and friends: infrastructure errors
/// should be logged with full context and retried by the caller (see
/// `onefuzz_runtime::store::StoreError`), not turned into a 4xx.
#[derive(Clone, Eq, PartialEq)]
pub struct Error {
    code: ErrorCode,
    detail: String,
}

impl Error {
    pub fn new(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.detail)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.detail)
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

macro_rules! error_ctor {
    ($fn_name:ident, $variant:ident) => {
        impl Error {
            pub fn $fn_name(detail: impl Into<String>) -> Self {
                Self::new(ErrorCode::$variant, detail)
            }
        }
    };
}

error_ctor!(invalid_request, InvalidRequest);
error_ctor!(invalid_job, InvalidJob);
error_ctor!(invalid_task, InvalidTask);
error_ctor!(unable_to_find, UnableToFind);
error_ctor!(unauthorized, Unauthorized);
error_ctor!(task_failed, TaskFailed);
error_ctor!(task_cancelled, TaskCancelled);
error_ctor!(invalid_container, InvalidContainer);
error_ctor!(vm_create_failed, VmCreateFailed);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_their_error_classes() {
        assert_eq!(ErrorCode::UnableToFind.status(), 404);
        assert_eq!(ErrorCode::InvalidContainer.status(), 404);
        assert_eq!(ErrorCode::InvalidRequest.status(), 400);
        assert_eq!(ErrorCode::TaskFailed.status(), 500);
    }

    #[test]
    fn display_matches_the_wire_title() {
        let err = Error::unable_to_find("unable to find scaleset");
        assert_eq!(err.code().to_string(), "UNABLE_TO_FIND");
    }
}
