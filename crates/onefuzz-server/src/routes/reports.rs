//! Crash report ingestion.
//!
//! A real deployment triggers this off a blob-storage "created" event for
//! the report container; there is no cloud SDK wrapper for that trigger
//! here, so this endpoint is the ingestion entrypoint such a trigger would
//! call, taking the container/blob/parsed payload directly.

use axum::extract::State;
use axum::Json;
use onefuzz_core::error::Error;
use onefuzz_runtime::schedule::ScheduledEvent;
use onefuzz_runtime::store::Versioned;
use serde::Deserialize;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct IngestRequest {
    container: String,
    blob: String,
    report: serde_json::Value,
}

pub async fn ingest(State(state): State<AppState>, Json(req): Json<IngestRequest>) -> ApiResult<Json<()>> {
    let outcome = onefuzz_reports::ingest_report(&state.store, &state.config, &req.container, req.report)
        .await
        .map_err(|e| Error::invalid_request(e.to_string()))?;

    for event in &outcome.events {
        state.worker.publish(ScheduledEvent {
            event_type: event.event_type,
            payload: event.payload.clone(),
        });
    }

    // Duplicates raise no webhook event, but every attached notification is
    // still dispatched so its `on_duplicate` rules run against the tracker.
    if outcome.notifications.is_empty() {
        return Ok(Json(()));
    }

    let task = state
        .store
        .tasks()
        .get(outcome.report.task_id)
        .await?
        .ok_or_else(|| Error::invalid_task(format!("no task `{}`", outcome.report.task_id)))?;
    let job = state
        .store
        .jobs()
        .get(outcome.report.job_id)
        .await?
        .ok_or_else(|| Error::invalid_job(format!("no job `{}`", outcome.report.job_id)))?;

    let urls = onefuzz_notify::ReportUrls {
        target_url: String::new(),
        input_url: format!("{}/{}", req.container, outcome.report.input_blob),
        report_url: format!("{}/{}", req.container, req.blob),
    };

    for Versioned { value: notification, .. } in &outcome.notifications {
        match onefuzz_notify::dispatch_notification(
            &state.store,
            &state.http,
            state.secrets.as_ref(),
            notification,
            &outcome.report,
            !outcome.is_new,
            &task.value,
            &job.value,
            &urls,
            state.config.notification_max_attempts,
        )
        .await
        {
            Ok(Some(event)) => state.worker.publish(ScheduledEvent {
                event_type: event.event_type,
                payload: event.payload,
            }),
            Ok(None) => {}
            Err(err) => tracing::error!(error = %err, "failed to dispatch notification"),
        }
    }

    Ok(Json(()))
}
