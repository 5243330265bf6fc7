//! Azure DevOps work item dispatch.
//!
//! A report fingerprint maps to at most one open work item per template: a
//! WIQL search against `unique_search` finds an existing item, which is
//! patched (unless an `unless` clause matches its current field values) or,
//! absent a match, a new item is created.

use std::collections::BTreeMap;

use onefuzz_core::notification::{AdoOnDuplicate, AdoTemplate};
use serde_json::{json, Value};

use crate::secret::SecretResolver;
use crate::template::{render, Context};

/// True if any `unless` clause matches the existing work item -- in which
/// case the duplicate update is skipped entirely. A clause matches only when
/// every field it names carries the clause's value; separate clauses are
/// alternatives.
pub fn suppresses_update(unless: &[BTreeMap<String, String>], existing_fields: &BTreeMap<String, String>) -> bool {
    unless.iter().any(|clause| {
        !clause.is_empty()
            && clause
                .iter()
                .all(|(field, value)| existing_fields.get(field).map(String::as_str) == Some(value.as_str()))
    })
}

fn render_fields(fields: &BTreeMap<String, String>, ctx: &Context) -> BTreeMap<String, String> {
    fields.iter().map(|(k, v)| (k.clone(), render(v, ctx))).collect()
}

/// Build the WIQL query used to look up a pre-existing work item carrying
/// this report's fingerprint. ADO has no dedicated unique-search config
/// (unlike GitHub's `unique_search`), so the fingerprint is matched against
/// the description, which every created item's fields are expected to
/// reference via `{report.minimized_stack_sha256}`.
pub fn search_query(template: &AdoTemplate, fingerprint: &str) -> String {
    format!(
        "SELECT [System.Id] FROM WorkItems WHERE [System.TeamProject] = '{}' AND [System.WorkItemType] = '{}' AND [System.Description] CONTAINS '{}'",
        template.project, template.work_item_type, fingerprint
    )
}

/// Build the JSON-Patch body to create a new work item.
pub fn create_body(template: &AdoTemplate, ctx: &Context) -> Value {
    let mut patch: Vec<Value> = render_fields(&template.fields, ctx)
        .into_iter()
        .map(|(field, value)| json!({ "op": "add", "path": format!("/fields/{field}"), "value": value }))
        .collect();

    if let Some(extra) = &template.ado_fields {
        for (field, value) in render_fields(extra, ctx) {
            patch.push(json!({ "op": "add", "path": format!("/fields/{field}"), "value": value }));
        }
    }

    Value::Array(patch)
}

/// Build the JSON-Patch body to update a pre-existing duplicate, or `None`
/// if `on_duplicate.unless` suppresses the update.
pub fn update_body(
    on_duplicate: &AdoOnDuplicate,
    existing_fields: &BTreeMap<String, String>,
    ctx: &Context,
) -> Option<Value> {
    if suppresses_update(&on_duplicate.unless, existing_fields) {
        return None;
    }

    let mut patch: Vec<Value> = render_fields(&on_duplicate.fields, ctx)
        .into_iter()
        .map(|(field, value)| json!({ "op": "add", "path": format!("/fields/{field}"), "value": value }))
        .collect();

    if let Some(comment) = &on_duplicate.comment {
        patch.push(json!({
            "op": "add",
            "path": "/fields/System.History",
            "value": render(comment, ctx),
        }));
    }

    Some(Value::Array(patch))
}

/// Create or update the ADO work item for one report. Returns the work
/// item's external id, if the API call surfaces one.
pub async fn dispatch(
    client: &reqwest::Client,
    secrets: &dyn SecretResolver,
    template: &AdoTemplate,
    ctx: &Context,
    existing: Option<(String, BTreeMap<String, String>)>,
) -> anyhow::Result<Option<String>> {
    let token = secrets.resolve(&template.auth_token_ref).await?;

    match existing {
        Some((work_item_id, fields)) => {
            let Some(body) = update_body(&template.on_duplicate, &fields, ctx) else {
                return Ok(Some(work_item_id));
            };

            let url = format!(
                "{}/_apis/wit/workitems/{}?api-version=7.0",
                template.base_url.trim_end_matches('/'),
                work_item_id
            );
            client
                .patch(url)
                .bearer_auth(&token)
                .header("Content-Type", "application/json-patch+json")
                .json(&body)
                .send()
                .await?
                .error_for_status()?;

            Ok(Some(work_item_id))
        }
        None => {
            let body = create_body(template, ctx);
            let url = format!(
                "{}/_apis/wit/workitems/${}?api-version=7.0",
                template.base_url.trim_end_matches('/'),
                template.work_item_type
            );
            let response = client
                .post(url)
                .bearer_auth(&token)
                .header("Content-Type", "application/json-patch+json")
                .json(&body)
                .send()
                .await?
                .error_for_status()?;

            let created: Value = response.json().await?;
            Ok(created.get("id").map(|id| id.to_string()))
        }
    }
}
