use std::collections::BTreeMap;

use onefuzz_core::container::{Container, RetentionTag};

use crate::error::{StoreError, StoreResult};

pub struct ContainerStore<'a>(pub(super) &'a sqlx::PgPool);

struct Row {
    name: String,
    storage_account: String,
    metadata: sqlx::types::Json<BTreeMap<String, String>>,
}

impl Row {
    fn into_container(self) -> Container {
        Container {
            name: self.name,
            storage_account: self.storage_account,
            metadata: self.metadata.0,
        }
    }
}

impl<'a> ContainerStore<'a> {
    pub async fn insert(&self, container: &Container) -> StoreResult<()> {
        sqlx::query!(
            r#"
            INSERT INTO onefuzz.container (name, storage_account, metadata)
            VALUES ($1, $2, $3)
            "#,
            container.name,
            container.storage_account,
            sqlx::types::Json(&container.metadata) as _,
        )
        .execute(self.0)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::AlreadyExists,
            _ => StoreError::Database(e),
        })?;

        Ok(())
    }

    pub async fn get(&self, name: &str) -> StoreResult<Option<Container>> {
        let row = sqlx::query_as!(
            Row,
            r#"
            SELECT name, storage_account, metadata as "metadata!: sqlx::types::Json<BTreeMap<String, String>>"
            FROM onefuzz.container
            WHERE name = $1
            "#,
            name,
        )
        .fetch_optional(self.0)
        .await?;

        Ok(row.map(Row::into_container))
    }

    pub async fn search_all(&self) -> StoreResult<Vec<Container>> {
        let rows = sqlx::query_as!(
            Row,
            r#"
            SELECT name, storage_account, metadata as "metadata!: sqlx::types::Json<BTreeMap<String, String>>"
            FROM onefuzz.container
            ORDER BY name
            "#,
        )
        .fetch_all(self.0)
        .await?;

        Ok(rows.into_iter().map(Row::into_container).collect())
    }

    /// Idempotent: deleting an absent container succeeds (mirrors job/task
    /// delete semantics elsewhere in the store).
    pub async fn delete(&self, name: &str) -> StoreResult<()> {
        sqlx::query!("DELETE FROM onefuzz.container WHERE name = $1", name)
            .execute(self.0)
            .await?;
        sqlx::query!("DELETE FROM onefuzz.retention_tag WHERE container = $1", name)
            .execute(self.0)
            .await?;
        Ok(())
    }

    /// Tags a blob with an expiry date; the retention sweep purges the tag
    /// (and the storage layer the blob) once it passes.
    pub async fn tag_for_retention(&self, tag: &RetentionTag) -> StoreResult<()> {
        sqlx::query!(
            r#"
            INSERT INTO onefuzz.retention_tag (container, blob, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (container, blob) DO UPDATE SET expires_at = EXCLUDED.expires_at
            "#,
            tag.container,
            tag.blob,
            tag.expires_at,
        )
        .execute(self.0)
        .await?;
        Ok(())
    }

    /// Deletes every tag whose expiry has passed, returning how many were
    /// purged.
    pub async fn purge_expired_tags(&self, now: chrono::DateTime<chrono::Utc>) -> StoreResult<u64> {
        let result = sqlx::query!("DELETE FROM onefuzz.retention_tag WHERE expires_at <= $1", now)
            .execute(self.0)
            .await?;
        Ok(result.rows_affected())
    }
}
