pub mod agent;
pub mod containers;
pub mod download;
pub mod jobs;
pub mod node;
pub mod notifications;
pub mod pool;
pub mod reports;
pub mod repro;
pub mod scaleset;
pub mod tasks;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/jobs", get(jobs::list).post(jobs::create).delete(jobs::delete))
        .route("/api/tasks", get(tasks::list).post(tasks::create).delete(tasks::delete))
        .route(
            "/api/pool",
            get(pool::list).post(pool::create).patch(pool::patch).delete(pool::delete),
        )
        .route(
            "/api/scaleset",
            get(scaleset::list)
                .post(scaleset::create)
                .patch(scaleset::patch)
                .delete(scaleset::delete),
        )
        .route(
            "/api/node",
            get(node::list).patch(node::patch).post(node::stop).delete(node::delete),
        )
        .route("/api/agent_registration", post(agent::register))
        .route("/api/agent_events", post(agent::events))
        .route("/api/agent_commands", get(agent::commands).delete(agent::ack))
        .route("/api/node_add_ssh_key", post(agent::add_ssh_key))
        .route("/api/download", get(download::download))
        .route("/api/containers", post(containers::create).delete(containers::delete))
        .route(
            "/api/notifications",
            get(notifications::list).post(notifications::create).delete(notifications::delete),
        )
        .route("/api/repro_vms", get(repro::list).post(repro::create).delete(repro::delete))
        .route("/api/reports_ingest", post(reports::ingest))
        .route("/healthz", get(healthz))
}

async fn healthz() -> &'static str {
    "ok"
}
