//! Microsoft Teams incoming-webhook dispatch. No dedup concept: the Teams
//! template has no `on_duplicate`, so every crash event posts a fresh card.

use onefuzz_core::notification::TeamsTemplate;
use serde_json::json;

use crate::secret::SecretResolver;
use crate::template::Context;

pub fn card(ctx: &Context) -> serde_json::Value {
    let summary = ctx.get("report.crash_type").unwrap_or("crash reported");
    let site = ctx.get("report.crash_site").unwrap_or("");

    json!({
        "@type": "MessageCard",
        "@context": "http://schema.org/extensions",
        "summary": summary,
        "title": summary,
        "text": format!("Crash site: {site}"),
    })
}

pub async fn dispatch(
    client: &reqwest::Client,
    secrets: &dyn SecretResolver,
    template: &TeamsTemplate,
    ctx: &Context,
) -> anyhow::Result<Option<String>> {
    let webhook_url = secrets.resolve(&template.webhook_url_ref).await?;

    client
        .post(webhook_url)
        .json(&card(ctx))
        .send()
        .await?
        .error_for_status()?;

    Ok(None)
}
