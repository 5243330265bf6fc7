//! Steps 4-5: dedup against the unique-reports store and raise the
//! downstream events.

use onefuzz_core::events::{self, EventType};
use onefuzz_core::notification::Notification;
use onefuzz_core::report::Report;
use onefuzz_runtime::error::StoreError;
use onefuzz_runtime::schedule::ScheduledEvent;
use onefuzz_runtime::store::{Store, Versioned};
use onefuzz_runtime::Config;

use crate::minimize::minimize;
use crate::parse::{parse_report, UnattributableReport};

/// Result of ingesting one blob-added payload: the webhook-worthy events it
/// raised plus the notification configs attached to the report's container,
/// left for the caller to dispatch (the dispatchers live in their own
/// crate so this one never depends on an HTTP client).
///
/// `notifications` is populated for duplicates too: a duplicate sighting
/// raises no `crash_reported` event but still reaches the bug tracker, where
/// each template's `on_duplicate` rules decide whether to comment, reopen or
/// skip.
pub struct IngestOutcome {
    pub report: Report,
    /// False for a repeat sighting of an already-recorded fingerprint.
    pub is_new: bool,
    pub events: Vec<ScheduledEvent>,
    pub notifications: Vec<Versioned<Notification>>,
}

/// Parse, minimize, fingerprint, dedup and raise events for one report
/// payload.
///
/// Returns `Err` only for a store/database failure or a payload with no
/// recoverable `task_id`/`job_id` -- a malformed crash log never fails the
/// call past that point.
pub async fn ingest_report(
    store: &Store,
    config: &Config,
    container: &str,
    raw: serde_json::Value,
) -> Result<IngestOutcome, IngestError> {
    let mut report = parse_report(raw)?;
    minimize(&mut report, config.minimized_stack_depth);

    let job = store.jobs().get(report.job_id).await?;
    let (project, build) = job
        .as_ref()
        .map(|j| (j.value.config.project.clone(), j.value.config.build.clone()))
        .unwrap_or_default();

    let is_regression_task = match store.tasks().get(report.task_id).await? {
        Some(task) => task.value.config.task.kind.to_ascii_lowercase().contains("regression"),
        None => false,
    };

    let outcome = store
        .unique_reports()
        .record(report.job_id, &project, &build, &report)
        .await?;

    let mut events = Vec::new();
    if outcome.is_new {
        events.push(ScheduledEvent {
            event_type: EventType::CrashReported,
            payload: events::crash_reported(&report),
        });
    } else if is_regression_task {
        events.push(ScheduledEvent {
            event_type: EventType::RegressionReported,
            payload: events::regression_reported(&report),
        });
    } else {
        tracing::debug!(
            task_id = %report.task_id,
            fingerprint = %report.minimized_stack_sha256,
            occurrences = outcome.occurrences,
            "duplicate crash report"
        );
    }

    let notifications = store.notifications().search_by_container(container).await?;

    Ok(IngestOutcome {
        report,
        is_new: outcome.is_new,
        events,
        notifications,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Unattributable(#[from] UnattributableReport),
    #[error(transparent)]
    Store(#[from] StoreError),
}
