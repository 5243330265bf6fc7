//! Infrastructure-level errors raised by the entity store and the background
//! control loops.
//!
//! These are distinct from [`onefuzz_core::Error`]: that type is the
//! user-facing `{status, title, detail}` shape surfaced over the REST API,
//! while [`StoreError`] is what `onefuzz_runtime::store` returns to callers
//! that need to distinguish "someone else won the race" from "the database
//! is unreachable".

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a record already exists for this key")]
    AlreadyExists,

    #[error("the record's version token did not match (concurrent modification)")]
    Conflict,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict)
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
