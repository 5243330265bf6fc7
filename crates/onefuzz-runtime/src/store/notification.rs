use onefuzz_core::ids::NotificationId;
use onefuzz_core::notification::{Notification, NotificationConfig};

use super::Versioned;
use crate::error::{StoreError, StoreResult};

pub struct NotificationStore<'a>(pub(super) &'a sqlx::PgPool);

struct Row {
    notification_id: NotificationId,
    container: String,
    config: sqlx::types::Json<NotificationConfig>,
    replace_existing: bool,
    created_at: chrono::DateTime<chrono::Utc>,
    version: i64,
}

impl Row {
    fn into_versioned(self) -> Versioned<Notification> {
        Versioned {
            value: Notification {
                notification_id: self.notification_id,
                container: self.container,
                config: self.config.0,
                replace_existing: self.replace_existing,
                created_at: self.created_at,
            },
            version: self.version,
        }
    }
}

impl<'a> NotificationStore<'a> {
    pub async fn insert(&self, notification: &Notification) -> StoreResult<Versioned<Notification>> {
        let row = sqlx::query_as!(
            Row,
            r#"
            INSERT INTO onefuzz.notification (notification_id, container, config, replace_existing)
            VALUES ($1, $2, $3, $4)
            RETURNING
                notification_id as "notification_id: NotificationId",
                container,
                config as "config!: sqlx::types::Json<NotificationConfig>",
                replace_existing, created_at, version
            "#,
            notification.notification_id as NotificationId,
            notification.container,
            sqlx::types::Json(&notification.config) as _,
            notification.replace_existing,
        )
        .fetch_one(self.0)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::AlreadyExists,
            _ => StoreError::Database(e),
        })?;

        Ok(row.into_versioned())
    }

    pub async fn get(&self, notification_id: NotificationId) -> StoreResult<Option<Versioned<Notification>>> {
        let row = sqlx::query_as!(
            Row,
            r#"
            SELECT
                notification_id as "notification_id: NotificationId",
                container,
                config as "config!: sqlx::types::Json<NotificationConfig>",
                replace_existing, created_at, version
            FROM onefuzz.notification
            WHERE notification_id = $1
            "#,
            notification_id as NotificationId,
        )
        .fetch_optional(self.0)
        .await?;

        Ok(row.map(Row::into_versioned))
    }

    /// Notifications watching a given report container, fanned out to on
    /// every `crash_reported`/`regression_reported` event.
    pub async fn search_by_container(&self, container: &str) -> StoreResult<Vec<Versioned<Notification>>> {
        let rows = sqlx::query_as!(
            Row,
            r#"
            SELECT
                notification_id as "notification_id: NotificationId",
                container,
                config as "config!: sqlx::types::Json<NotificationConfig>",
                replace_existing, created_at, version
            FROM onefuzz.notification
            WHERE container = $1
            "#,
            container,
        )
        .fetch_all(self.0)
        .await?;

        Ok(rows.into_iter().map(Row::into_versioned).collect())
    }

    pub async fn delete(&self, notification_id: NotificationId) -> StoreResult<()> {
        sqlx::query!(
            "DELETE FROM onefuzz.notification WHERE notification_id = $1",
            notification_id as NotificationId,
        )
        .execute(self.0)
        .await?;
        Ok(())
    }

    /// Records that this notification already fired for a given fingerprint,
    /// so a replayed blob event or retry doesn't double-file a bug tracker
    /// item.
    pub async fn record_dispatch(
        &self,
        notification_id: NotificationId,
        minimized_stack_sha256: &str,
        external_item_id: Option<&str>,
    ) -> StoreResult<bool> {
        let result = sqlx::query!(
            r#"
            INSERT INTO onefuzz.notification_dispatch
                (notification_id, minimized_stack_sha256, external_item_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (notification_id, minimized_stack_sha256) DO NOTHING
            "#,
            notification_id as NotificationId,
            minimized_stack_sha256,
            external_item_id,
        )
        .execute(self.0)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn already_dispatched(
        &self,
        notification_id: NotificationId,
        minimized_stack_sha256: &str,
    ) -> StoreResult<bool> {
        let found = sqlx::query_scalar!(
            r#"
            SELECT 1 as "exists!"
            FROM onefuzz.notification_dispatch
            WHERE notification_id = $1 AND minimized_stack_sha256 = $2
            "#,
            notification_id as NotificationId,
            minimized_stack_sha256,
        )
        .fetch_optional(self.0)
        .await?;

        Ok(found.is_some())
    }
}
