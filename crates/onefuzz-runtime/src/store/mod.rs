//! The entity store.
//!
//! A mapping from `(entity_kind, key) -> record` with per-record version
//! tokens, backed by Postgres. Single-record updates are linearizable
//! (enforced by a `version` column compare-and-swap); multi-record updates
//! are **not** atomic, so every caller here is written as
//! `get -> mutate -> replace(version)`, retrying on [`StoreError::Conflict`].
//!
//! Each submodule owns one entity kind and exposes `insert`/`replace`/
//! `get`/`search`/`delete` where the entity needs them; read-only or
//! append-only records (like [`task_event`]) only expose what they need.

mod container;
mod instance_config;
mod job;
mod node;
mod node_message;
mod node_task;
mod notification;
mod pool;
mod repro;
mod scaleset;
mod task;
mod task_event;
mod unique_report;
mod webhook;

pub use self::container::ContainerStore;
pub use self::instance_config::{ConfigCache, InstanceConfigStore};
pub use self::job::JobStore;
pub use self::node::NodeStore;
pub use self::node_message::NodeMessageStore;
pub use self::node_task::NodeTaskStore;
pub use self::notification::NotificationStore;
pub use self::pool::PoolStore;
pub use self::repro::ReproStore;
pub use self::scaleset::ScalesetStore;
pub use self::task::TaskStore;
pub use self::task_event::TaskEventStore;
pub use self::unique_report::{RecordOutcome, UniqueReportStore};
pub use self::webhook::WebhookStore;

use crate::error::{StoreError, StoreResult};

/// A record paired with the version token it was read at.
#[derive(Clone, Debug)]
pub struct Versioned<T> {
    pub value: T,
    pub version: i64,
}

/// Retry an optimistic `get -> mutate -> replace` cycle up to `attempts`
/// times, stopping as soon as it succeeds or fails with something other than
/// a version conflict.
pub async fn retry_on_conflict<T, Fut>(
    attempts: u32,
    mut op: impl FnMut() -> Fut,
) -> StoreResult<T>
where
    Fut: std::future::Future<Output = StoreResult<T>>,
{
    let mut last_err = StoreError::Conflict;
    for _ in 0..attempts.max(1) {
        match op().await {
            Ok(value) => return Ok(value),
            Err(StoreError::Conflict) => {
                last_err = StoreError::Conflict;
                continue;
            }
            Err(other) => return Err(other),
        }
    }
    Err(last_err)
}

/// Shared handle to the entity store, cheaply clonable.
#[derive(Clone)]
pub struct Store {
    pub(crate) pool: sqlx::PgPool,
}

impl Store {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }

    pub fn jobs(&self) -> JobStore<'_> {
        JobStore(&self.pool)
    }

    pub fn tasks(&self) -> TaskStore<'_> {
        TaskStore(&self.pool)
    }

    pub fn nodes(&self) -> NodeStore<'_> {
        NodeStore(&self.pool)
    }

    pub fn pools(&self) -> PoolStore<'_> {
        PoolStore(&self.pool)
    }

    pub fn scalesets(&self) -> ScalesetStore<'_> {
        ScalesetStore(&self.pool)
    }

    pub fn node_tasks(&self) -> NodeTaskStore<'_> {
        NodeTaskStore(&self.pool)
    }

    pub fn node_messages(&self) -> NodeMessageStore<'_> {
        NodeMessageStore(&self.pool)
    }

    pub fn task_events(&self) -> TaskEventStore<'_> {
        TaskEventStore(&self.pool)
    }

    pub fn notifications(&self) -> NotificationStore<'_> {
        NotificationStore(&self.pool)
    }

    pub fn repros(&self) -> ReproStore<'_> {
        ReproStore(&self.pool)
    }

    pub fn unique_reports(&self) -> UniqueReportStore<'_> {
        UniqueReportStore(&self.pool)
    }

    pub fn containers(&self) -> ContainerStore<'_> {
        ContainerStore(&self.pool)
    }

    pub fn webhooks(&self) -> WebhookStore<'_> {
        WebhookStore(&self.pool)
    }

    pub fn instance_config(&self) -> InstanceConfigStore<'_> {
        InstanceConfigStore(&self.pool)
    }
}
