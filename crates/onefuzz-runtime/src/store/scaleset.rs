use std::collections::BTreeMap;

use onefuzz_core::ids::{MachineId, PoolName, ScalesetId};
use onefuzz_core::scaleset::{Scaleset, ScalesetAuth, ScalesetState};

use super::Versioned;
use crate::error::{StoreError, StoreResult};

pub struct ScalesetStore<'a>(pub(super) &'a sqlx::PgPool);

struct Row {
    scaleset_id: ScalesetId,
    pool_name: PoolName,
    state: ScalesetState,
    vm_sku: String,
    image: String,
    region: String,
    size: i32,
    min_size: i32,
    max_size: i32,
    spot: bool,
    ephemeral_os: bool,
    needs_config_update: bool,
    tags: sqlx::types::Json<BTreeMap<String, String>>,
    auth: Option<sqlx::types::Json<ScalesetAuth>>,
    client_id: Option<String>,
    error: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    version: i64,
}

impl Row {
    fn into_versioned(self, nodes: Vec<MachineId>) -> Versioned<Scaleset> {
        Versioned {
            value: Scaleset {
                scaleset_id: self.scaleset_id,
                pool_name: self.pool_name,
                state: self.state,
                vm_sku: self.vm_sku,
                image: self.image,
                region: self.region,
                size: self.size as u32,
                min_size: self.min_size as u32,
                max_size: self.max_size as u32,
                spot: self.spot,
                ephemeral_os: self.ephemeral_os,
                needs_config_update: self.needs_config_update,
                tags: self.tags.0,
                auth: self.auth.map(|j| j.0),
                client_id: self.client_id,
                nodes,
                error: self.error,
                created_at: self.created_at,
            },
            version: self.version,
        }
    }
}

impl<'a> ScalesetStore<'a> {
    pub async fn insert(&self, scaleset: &Scaleset) -> StoreResult<Versioned<Scaleset>> {
        let row = sqlx::query_as!(
            Row,
            r#"
            INSERT INTO onefuzz.scaleset
                (scaleset_id, pool_name, state, vm_sku, image, region, size, min_size, max_size,
                 spot, ephemeral_os, needs_config_update, tags, auth, client_id, error)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING
                scaleset_id as "scaleset_id: ScalesetId",
                pool_name as "pool_name: PoolName",
                state as "state: ScalesetState",
                vm_sku, image, region, size, min_size, max_size,
                spot, ephemeral_os, needs_config_update,
                tags as "tags!: sqlx::types::Json<BTreeMap<String, String>>",
                auth as "auth: sqlx::types::Json<ScalesetAuth>",
                client_id, error, created_at, version
            "#,
            scaleset.scaleset_id as ScalesetId,
            scaleset.pool_name.clone() as PoolName,
            scaleset.state as ScalesetState,
            scaleset.vm_sku,
            scaleset.image,
            scaleset.region,
            scaleset.size as i32,
            scaleset.min_size as i32,
            scaleset.max_size as i32,
            scaleset.spot,
            scaleset.ephemeral_os,
            scaleset.needs_config_update,
            sqlx::types::Json(&scaleset.tags) as _,
            scaleset.auth.as_ref().map(sqlx::types::Json) as _,
            scaleset.client_id,
            scaleset.error,
        )
        .fetch_one(self.0)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::AlreadyExists,
            _ => StoreError::Database(e),
        })?;

        let nodes = self.node_ids(scaleset.scaleset_id).await?;
        Ok(row.into_versioned(nodes))
    }

    pub async fn get(&self, scaleset_id: ScalesetId) -> StoreResult<Option<Versioned<Scaleset>>> {
        let row = sqlx::query_as!(
            Row,
            r#"
            SELECT
                scaleset_id as "scaleset_id: ScalesetId",
                pool_name as "pool_name: PoolName",
                state as "state: ScalesetState",
                vm_sku, image, region, size, min_size, max_size,
                spot, ephemeral_os, needs_config_update,
                tags as "tags!: sqlx::types::Json<BTreeMap<String, String>>",
                auth as "auth: sqlx::types::Json<ScalesetAuth>",
                client_id, error, created_at, version
            FROM onefuzz.scaleset
            WHERE scaleset_id = $1
            "#,
            scaleset_id as ScalesetId,
        )
        .fetch_optional(self.0)
        .await?;

        match row {
            Some(row) => {
                let nodes = self.node_ids(scaleset_id).await?;
                Ok(Some(row.into_versioned(nodes)))
            }
            None => Ok(None),
        }
    }

    pub async fn search_by_pool(&self, pool_name: &PoolName) -> StoreResult<Vec<Versioned<Scaleset>>> {
        let rows = sqlx::query_as!(
            Row,
            r#"
            SELECT
                scaleset_id as "scaleset_id: ScalesetId",
                pool_name as "pool_name: PoolName",
                state as "state: ScalesetState",
                vm_sku, image, region, size, min_size, max_size,
                spot, ephemeral_os, needs_config_update,
                tags as "tags!: sqlx::types::Json<BTreeMap<String, String>>",
                auth as "auth: sqlx::types::Json<ScalesetAuth>",
                client_id, error, created_at, version
            FROM onefuzz.scaleset
            WHERE pool_name = $1
            "#,
            pool_name as &PoolName,
        )
        .fetch_all(self.0)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let nodes = self.node_ids(row.scaleset_id).await?;
            out.push(row.into_versioned(nodes));
        }
        Ok(out)
    }

    /// Every scaleset not yet halted, scanned once per autoscaler tick.
    pub async fn search_active(&self) -> StoreResult<Vec<Versioned<Scaleset>>> {
        let rows = sqlx::query_as!(
            Row,
            r#"
            SELECT
                scaleset_id as "scaleset_id: ScalesetId",
                pool_name as "pool_name: PoolName",
                state as "state: ScalesetState",
                vm_sku, image, region, size, min_size, max_size,
                spot, ephemeral_os, needs_config_update,
                tags as "tags!: sqlx::types::Json<BTreeMap<String, String>>",
                auth as "auth: sqlx::types::Json<ScalesetAuth>",
                client_id, error, created_at, version
            FROM onefuzz.scaleset
            WHERE state != 'halt'
            "#,
        )
        .fetch_all(self.0)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let nodes = self.node_ids(row.scaleset_id).await?;
            out.push(row.into_versioned(nodes));
        }
        Ok(out)
    }

    async fn node_ids(&self, scaleset_id: ScalesetId) -> StoreResult<Vec<MachineId>> {
        let rows = sqlx::query_scalar!(
            r#"SELECT machine_id as "machine_id: MachineId" FROM onefuzz.node WHERE scaleset_id = $1"#,
            scaleset_id as ScalesetId,
        )
        .fetch_all(self.0)
        .await?;
        Ok(rows)
    }

    pub async fn replace(&self, scaleset: &Scaleset, expected_version: i64) -> StoreResult<i64> {
        let result = sqlx::query!(
            r#"
            UPDATE onefuzz.scaleset
               SET state = $2, size = $3, needs_config_update = $4, client_id = $5,
                   error = $6, version = version + 1
             WHERE scaleset_id = $1 AND version = $7
            "#,
            scaleset.scaleset_id as ScalesetId,
            scaleset.state as ScalesetState,
            scaleset.size as i32,
            scaleset.needs_config_update,
            scaleset.client_id,
            scaleset.error,
            expected_version,
        )
        .execute(self.0)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict);
        }

        Ok(expected_version + 1)
    }

    pub async fn delete(&self, scaleset_id: ScalesetId) -> StoreResult<()> {
        sqlx::query!(
            "DELETE FROM onefuzz.scaleset WHERE scaleset_id = $1",
            scaleset_id as ScalesetId,
        )
        .execute(self.0)
        .await?;
        Ok(())
    }
}
