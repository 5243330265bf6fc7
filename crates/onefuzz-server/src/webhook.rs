//! Fan-out from the single control-loop event stream to individual webhook
//! subscriptions.
//!
//! Every [`WebhookMessage`] the worker publishes is matched against
//! [`onefuzz_runtime::store::Store::webhooks`] by `event_types`, signed with
//! an HMAC-SHA256 over the JSON body and POSTed independently per
//! subscriber, so one subscriber's outage never blocks another's delivery.

use hmac::{Hmac, Mac};
use onefuzz_core::events::{EventPayload, Webhook, WebhookMessage};
use onefuzz_runtime::{Config, WorkerHandle};
use sha2::Sha256;

use crate::secret::EnvSecretResolver;

type HmacSha256 = Hmac<Sha256>;

pub async fn run(
    handle: std::sync::Arc<WorkerHandle>,
    store: onefuzz_runtime::store::Store,
    config: std::sync::Arc<Config>,
    http: reqwest::Client,
    secrets: std::sync::Arc<EnvSecretResolver>,
) {
    let mut events = handle.subscribe();

    loop {
        let message = match events.recv().await {
            Ok(message) => message,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "webhook delivery loop lagged behind the event stream");
                continue;
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
        };

        let subscribers = match store.webhooks().search_all().await {
            Ok(subscribers) => subscribers,
            Err(err) => {
                tracing::error!(error = %err, "failed to load webhook subscriptions");
                continue;
            }
        };

        for subscriber in subscribers {
            let webhook = subscriber.value;
            if !webhook.event_types.contains(&message.event_type) {
                continue;
            }

            let mut message = message.clone();
            message.webhook_id = webhook.webhook_id;

            if let Err(err) = deliver(&http, &config, secrets.as_ref(), &webhook, &message).await {
                tracing::warn!(
                    webhook_id = %webhook.webhook_id,
                    event_id = %message.event_id,
                    error = %err,
                    "webhook delivery failed"
                );
            }
        }
    }
}

async fn deliver(
    http: &reqwest::Client,
    config: &Config,
    secrets: &EnvSecretResolver,
    webhook: &Webhook,
    message: &WebhookMessage,
) -> anyhow::Result<()> {
    let body = match &message.event {
        EventPayload::Inline(value) if serde_json::to_vec(value)?.len() > config.max_queue_message_bytes => {
            serde_json::to_vec(&WebhookMessage {
                event: EventPayload::BlobRef {
                    container: "events".to_string(),
                    blob: message.event_id.to_string(),
                },
                ..message.clone()
            })?
        }
        _ => serde_json::to_vec(message)?,
    };

    let mut request = http.post(&webhook.url).header("content-type", "application/json");

    if let Some(secret) = &webhook.secret_token_ref {
        use onefuzz_notify::SecretResolver;
        let key = secrets.resolve(secret).await?;
        let mut mac = HmacSha256::new_from_slice(key.as_bytes())?;
        mac.update(&body);
        let signature = hex::encode(mac.finalize().into_bytes());
        request = request.header("x-onefuzz-signature", signature);
    }

    request.body(body).send().await?.error_for_status()?;

    Ok(())
}
