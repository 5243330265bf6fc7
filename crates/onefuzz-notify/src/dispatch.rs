//! Orchestrates one notification: dedup against a prior dispatch for the
//! same fingerprint, render+send with retry, and record either the
//! dispatch or a `notification_failed` event.

use std::collections::BTreeMap;

use onefuzz_core::events::{self, EventType};
use onefuzz_core::job::Job;
use onefuzz_core::notification::{Notification, NotificationConfig};
use onefuzz_core::report::Report;
use onefuzz_core::task::Task;
use onefuzz_runtime::error::StoreError;
use onefuzz_runtime::schedule::ScheduledEvent;
use onefuzz_runtime::store::Store;
use serde_json::Value;

use crate::secret::SecretResolver;
use crate::template::{Context, ReportUrls};
use crate::{ado, github, retry, teams};

/// Dispatch a single attached notification for a report.
///
/// A new-unique report files (or updates) a bug tracker item; replays of the
/// same first sighting are suppressed by the per-fingerprint dispatch
/// record. A duplicate sighting (`is_duplicate`) skips that suppression on
/// purpose: it must reach the tracker again so the template's `on_duplicate`
/// rules (comment, reopen, `unless` skip) can run against the existing item.
///
/// Returns a `notification_failed` event on exhausted retries -- the
/// caller's [`Store`] result is the only thing that can fail this call
/// outright; a delivery failure never does.
#[allow(clippy::too_many_arguments)]
pub async fn dispatch_notification(
    store: &Store,
    client: &reqwest::Client,
    secrets: &dyn SecretResolver,
    notification: &Notification,
    report: &Report,
    is_duplicate: bool,
    task: &Task,
    job: &Job,
    urls: &ReportUrls,
    max_attempts: u32,
) -> Result<Option<ScheduledEvent>, StoreError> {
    if !is_duplicate
        && store
            .notifications()
            .already_dispatched(notification.notification_id, &report.minimized_stack_sha256)
            .await?
    {
        return Ok(None);
    }

    let ctx = Context::build(report, task, job, urls);

    let result = retry::retry(max_attempts, |_attempt| {
        send_once(client, secrets, &notification.config, &ctx)
    })
    .await;

    match result {
        Ok(external_id) => {
            store
                .notifications()
                .record_dispatch(
                    notification.notification_id,
                    &report.minimized_stack_sha256,
                    external_id.as_deref(),
                )
                .await?;
            Ok(None)
        }
        Err(err) => {
            tracing::warn!(
                notification_id = %notification.notification_id,
                kind = notification.config.kind(),
                error = %err,
                "notification dispatch exhausted its retry budget"
            );
            Ok(Some(ScheduledEvent {
                event_type: EventType::NotificationFailed,
                payload: events::notification_failed(notification.notification_id, &err.to_string()),
            }))
        }
    }
}

async fn send_once(
    client: &reqwest::Client,
    secrets: &dyn SecretResolver,
    config: &NotificationConfig,
    ctx: &Context,
) -> anyhow::Result<Option<String>> {
    match config {
        NotificationConfig::Ado(template) => {
            let fingerprint = ctx.get("report.minimized_stack_sha256").unwrap_or_default();
            let existing = search_ado(client, secrets, template, fingerprint).await?;
            ado::dispatch(client, secrets, template, ctx, existing).await
        }
        NotificationConfig::GithubIssues(template) => {
            let existing = search_github(client, secrets, template).await?;
            github::dispatch(client, secrets, template, ctx, existing).await
        }
        NotificationConfig::Teams(template) => teams::dispatch(client, secrets, template, ctx).await,
    }
}

async fn search_ado(
    client: &reqwest::Client,
    secrets: &dyn SecretResolver,
    template: &onefuzz_core::notification::AdoTemplate,
    fingerprint: &str,
) -> anyhow::Result<Option<(String, BTreeMap<String, String>)>> {
    let token = secrets.resolve(&template.auth_token_ref).await?;
    let url = format!(
        "{}/{}/_apis/wit/wiql?api-version=7.0",
        template.base_url.trim_end_matches('/'),
        template.project
    );

    let response = client
        .post(url)
        .bearer_auth(&token)
        .json(&serde_json::json!({ "query": ado::search_query(template, fingerprint) }))
        .send()
        .await?
        .error_for_status()?;

    let body: Value = response.json().await?;
    let Some(id) = body["workItems"][0]["id"].as_u64() else {
        return Ok(None);
    };

    let work_item_url = format!(
        "{}/_apis/wit/workitems/{id}?api-version=7.0",
        template.base_url.trim_end_matches('/')
    );
    let work_item: Value = client
        .get(work_item_url)
        .bearer_auth(&token)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let fields = work_item["fields"]
        .as_object()
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default();

    Ok(Some((id.to_string(), fields)))
}

async fn search_github(
    client: &reqwest::Client,
    secrets: &dyn SecretResolver,
    template: &onefuzz_core::notification::GithubIssuesTemplate,
) -> anyhow::Result<Option<github::ExistingIssue>> {
    let token = secrets.resolve(&template.auth_ref).await?;
    let query = format!(
        "repo:{}/{} in:title,body \"{}\"",
        template.organization, template.repository, template.unique_search.str
    );

    let response = client
        .get("https://api.github.com/search/issues")
        .bearer_auth(&token)
        .header("User-Agent", "onefuzz-notify")
        .query(&[("q", query.as_str())])
        .send()
        .await?
        .error_for_status()?;

    let body: Value = response.json().await?;
    let Some(item) = body["items"].get(0) else {
        return Ok(None);
    };

    let issue = github::ExistingIssue {
        number: item["number"].as_u64().unwrap_or_default(),
        title: item["title"].as_str().unwrap_or_default().to_string(),
        body: item["body"].as_str().unwrap_or_default().to_string(),
        labels: item["labels"]
            .as_array()
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|l| l["name"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default(),
        author: item["user"]["login"].as_str().unwrap_or_default().to_string(),
        state: item["state"].as_str().unwrap_or("open").to_string(),
    };

    if github::matches(&template.unique_search, &issue) {
        Ok(Some(issue))
    } else {
        Ok(None)
    }
}
