use onefuzz_core::events::{EventType, Webhook};
use onefuzz_core::ids::WebhookId;
use onefuzz_core::secret::SecretRef;

use super::Versioned;
use crate::error::{StoreError, StoreResult};

pub struct WebhookStore<'a>(pub(super) &'a sqlx::PgPool);

struct Row {
    webhook_id: WebhookId,
    name: String,
    url: String,
    event_types: sqlx::types::Json<Vec<EventType>>,
    secret_token_ref: Option<String>,
    version: i64,
}

impl Row {
    fn into_versioned(self) -> Versioned<Webhook> {
        Versioned {
            value: Webhook {
                webhook_id: self.webhook_id,
                name: self.name,
                url: self.url,
                event_types: self.event_types.0,
                secret_token_ref: self.secret_token_ref.map(SecretRef),
            },
            version: self.version,
        }
    }
}

impl<'a> WebhookStore<'a> {
    pub async fn insert(&self, webhook: &Webhook) -> StoreResult<Versioned<Webhook>> {
        let row = sqlx::query_as!(
            Row,
            r#"
            INSERT INTO onefuzz.webhook (webhook_id, name, url, event_types, secret_token_ref)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING
                webhook_id as "webhook_id: WebhookId",
                name, url,
                event_types as "event_types!: sqlx::types::Json<Vec<EventType>>",
                secret_token_ref, version
            "#,
            webhook.webhook_id as WebhookId,
            webhook.name,
            webhook.url,
            sqlx::types::Json(&webhook.event_types) as _,
            webhook.secret_token_ref.as_ref().map(|r| r.0.clone()),
        )
        .fetch_one(self.0)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::AlreadyExists,
            _ => StoreError::Database(e),
        })?;

        Ok(row.into_versioned())
    }

    pub async fn get(&self, webhook_id: WebhookId) -> StoreResult<Option<Versioned<Webhook>>> {
        let row = sqlx::query_as!(
            Row,
            r#"
            SELECT
                webhook_id as "webhook_id: WebhookId",
                name, url,
                event_types as "event_types!: sqlx::types::Json<Vec<EventType>>",
                secret_token_ref, version
            FROM onefuzz.webhook
            WHERE webhook_id = $1
            "#,
            webhook_id as WebhookId,
        )
        .fetch_optional(self.0)
        .await?;

        Ok(row.map(Row::into_versioned))
    }

    /// All registered subscriptions; used by the delivery loop to match each
    /// outbound event against `event_types`.
    pub async fn search_all(&self) -> StoreResult<Vec<Versioned<Webhook>>> {
        let rows = sqlx::query_as!(
            Row,
            r#"
            SELECT
                webhook_id as "webhook_id: WebhookId",
                name, url,
                event_types as "event_types!: sqlx::types::Json<Vec<EventType>>",
                secret_token_ref, version
            FROM onefuzz.webhook
            "#,
        )
        .fetch_all(self.0)
        .await?;

        Ok(rows.into_iter().map(Row::into_versioned).collect())
    }

    pub async fn delete(&self, webhook_id: WebhookId) -> StoreResult<()> {
        sqlx::query!("DELETE FROM onefuzz.webhook WHERE webhook_id = $1", webhook_id as WebhookId)
            .execute(self.0)
            .await?;
        Ok(())
    }
}
