//! GitHub Issues dispatch.
//!
//! A duplicate match comes from `unique_search`: a title/body substring
//! (`str`) plus an optional `match_list` of labels and an optional
//! `author` the existing issue must have been filed by.

use onefuzz_core::notification::{GithubIssuesTemplate, GithubOnDuplicate, UniqueSearch};
use serde_json::{json, Value};

use crate::secret::SecretResolver;
use crate::template::{render, Context};

/// An already-filed issue, as much as the dedup check needs of it.
pub struct ExistingIssue {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    pub author: String,
    pub state: String,
}

/// True if `issue` matches `search`: its title or body contains `str`, it
/// carries every label in `match_list` (if any), and its author matches
/// `author` (if set).
pub fn matches(search: &UniqueSearch, issue: &ExistingIssue) -> bool {
    let text_matches = issue.title.contains(&search.str) || issue.body.contains(&search.str);
    let labels_match = search
        .match_list
        .iter()
        .all(|label| issue.labels.iter().any(|l| l == label));
    let author_matches = search
        .author
        .as_deref()
        .map_or(true, |author| author == issue.author);

    text_matches && labels_match && author_matches
}

pub fn create_body(template: &GithubIssuesTemplate, ctx: &Context) -> Value {
    json!({
        "title": render(&template.title, ctx),
        "body": render(&template.body, ctx),
        "labels": template.labels,
        "assignees": template.assignees,
    })
}

/// Build the PATCH body to apply `on_duplicate` to an existing issue, or
/// `None` if there's nothing to change.
pub fn update_body(on_duplicate: &GithubOnDuplicate, issue: &ExistingIssue) -> Option<Value> {
    let mut body = json!({});
    let mut changed = false;

    if !on_duplicate.labels.is_empty() {
        let mut labels = issue.labels.clone();
        for label in &on_duplicate.labels {
            if !labels.contains(label) {
                labels.push(label.clone());
            }
        }
        body["labels"] = json!(labels);
        changed = true;
    }

    if on_duplicate.reopen && issue.state != "open" {
        body["state"] = json!("open");
        changed = true;
    }

    changed.then_some(body)
}

pub async fn dispatch(
    client: &reqwest::Client,
    secrets: &dyn SecretResolver,
    template: &GithubIssuesTemplate,
    ctx: &Context,
    existing: Option<ExistingIssue>,
) -> anyhow::Result<Option<String>> {
    let token = secrets.resolve(&template.auth_ref).await?;
    let base = format!(
        "https://api.github.com/repos/{}/{}",
        template.organization, template.repository
    );

    match existing {
        Some(issue) => {
            if let Some(body) = update_body(&template.on_duplicate, &issue) {
                client
                    .patch(format!("{base}/issues/{}", issue.number))
                    .bearer_auth(&token)
                    .header("User-Agent", "onefuzz-notify")
                    .json(&body)
                    .send()
                    .await?
                    .error_for_status()?;
            }

            if let Some(comment) = &template.on_duplicate.comment {
                client
                    .post(format!("{base}/issues/{}/comments", issue.number))
                    .bearer_auth(&token)
                    .header("User-Agent", "onefuzz-notify")
                    .json(&json!({ "body": render(comment, ctx) }))
                    .send()
                    .await?
                    .error_for_status()?;
            }

            Ok(Some(issue.number.to_string()))
        }
        None => {
            let body = create_body(template, ctx);
            let response = client
                .post(format!("{base}/issues"))
                .bearer_auth(&token)
                .header("User-Agent", "onefuzz-notify")
                .json(&body)
                .send()
                .await?
                .error_for_status()?;

            let created: Value = response.json().await?;
            Ok(created.get("number").map(|n| n.to_string()))
        }
    }
}
