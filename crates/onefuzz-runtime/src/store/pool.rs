use onefuzz_core::ids::{PoolId, PoolName};
use onefuzz_core::pool::{Architecture, Os, Pool, PoolState};

use super::Versioned;
use crate::error::{StoreError, StoreResult};

pub struct PoolStore<'a>(pub(super) &'a sqlx::PgPool);

struct Row {
    pool_id: PoolId,
    name: PoolName,
    os: Os,
    arch: Architecture,
    managed: bool,
    state: PoolState,
    created_at: chrono::DateTime<chrono::Utc>,
    version: i64,
}

impl Row {
    fn into_versioned(self) -> Versioned<Pool> {
        Versioned {
            value: Pool {
                pool_id: self.pool_id,
                name: self.name,
                os: self.os,
                arch: self.arch,
                managed: self.managed,
                state: self.state,
                created_at: self.created_at,
            },
            version: self.version,
        }
    }
}

impl<'a> PoolStore<'a> {
    pub async fn insert(&self, pool: &Pool) -> StoreResult<Versioned<Pool>> {
        let row = sqlx::query_as!(
            Row,
            r#"
            INSERT INTO onefuzz.pool (pool_id, name, os, arch, managed, state)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING
                pool_id as "pool_id: PoolId",
                name as "name: PoolName",
                os as "os: Os",
                arch as "arch: Architecture",
                managed,
                state as "state: PoolState",
                created_at,
                version
            "#,
            pool.pool_id as PoolId,
            pool.name.clone() as PoolName,
            pool.os as Os,
            pool.arch as Architecture,
            pool.managed,
            pool.state as PoolState,
        )
        .fetch_one(self.0)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::AlreadyExists,
            _ => StoreError::Database(e),
        })?;

        Ok(row.into_versioned())
    }

    pub async fn get(&self, pool_id: PoolId) -> StoreResult<Option<Versioned<Pool>>> {
        let row = sqlx::query_as!(
            Row,
            r#"
            SELECT
                pool_id as "pool_id: PoolId",
                name as "name: PoolName",
                os as "os: Os",
                arch as "arch: Architecture",
                managed,
                state as "state: PoolState",
                created_at,
                version
            FROM onefuzz.pool
            WHERE pool_id = $1
            "#,
            pool_id as PoolId,
        )
        .fetch_optional(self.0)
        .await?;

        Ok(row.map(Row::into_versioned))
    }

    pub async fn get_by_name(&self, name: &PoolName) -> StoreResult<Option<Versioned<Pool>>> {
        let row = sqlx::query_as!(
            Row,
            r#"
            SELECT
                pool_id as "pool_id: PoolId",
                name as "name: PoolName",
                os as "os: Os",
                arch as "arch: Architecture",
                managed,
                state as "state: PoolState",
                created_at,
                version
            FROM onefuzz.pool
            WHERE name = $1
            "#,
            name as &PoolName,
        )
        .fetch_optional(self.0)
        .await?;

        Ok(row.map(Row::into_versioned))
    }

    pub async fn search_all(&self) -> StoreResult<Vec<Versioned<Pool>>> {
        let rows = sqlx::query_as!(
            Row,
            r#"
            SELECT
                pool_id as "pool_id: PoolId",
                name as "name: PoolName",
                os as "os: Os",
                arch as "arch: Architecture",
                managed,
                state as "state: PoolState",
                created_at,
                version
            FROM onefuzz.pool
            "#,
        )
        .fetch_all(self.0)
        .await?;

        Ok(rows.into_iter().map(Row::into_versioned).collect())
    }

    pub async fn replace(&self, pool: &Pool, expected_version: i64) -> StoreResult<i64> {
        let result = sqlx::query!(
            r#"
            UPDATE onefuzz.pool
               SET state = $2, version = version + 1
             WHERE pool_id = $1 AND version = $3
            "#,
            pool.pool_id as PoolId,
            pool.state as PoolState,
            expected_version,
        )
        .execute(self.0)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict);
        }

        Ok(expected_version + 1)
    }

    /// Only valid once every task assigned to the pool has stopped; callers
    /// are responsible for checking that.
    pub async fn delete(&self, pool_id: PoolId) -> StoreResult<()> {
        sqlx::query!("DELETE FROM onefuzz.pool WHERE pool_id = $1", pool_id as PoolId)
            .execute(self.0)
            .await?;
        Ok(())
    }
}
