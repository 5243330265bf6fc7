use onefuzz_core::ids::{ReproId, TaskId};
use onefuzz_core::job::UserInfo;
use onefuzz_core::pool::Os;
use onefuzz_core::repro::{Repro, ReproConfig, ReproState};
use onefuzz_core::scaleset::ScalesetAuth;

use super::Versioned;
use crate::error::{StoreError, StoreResult};

pub struct ReproStore<'a>(pub(super) &'a sqlx::PgPool);

struct Row {
    vm_id: ReproId,
    task_id: TaskId,
    state: ReproState,
    os: Os,
    config: sqlx::types::Json<ReproConfig>,
    auth: Option<sqlx::types::Json<ScalesetAuth>>,
    ip: Option<String>,
    end_time: Option<chrono::DateTime<chrono::Utc>>,
    user_info: Option<sqlx::types::Json<UserInfo>>,
    error: Option<String>,
    version: i64,
}

impl Row {
    fn into_versioned(self) -> Versioned<Repro> {
        Versioned {
            value: Repro {
                vm_id: self.vm_id,
                task_id: self.task_id,
                state: self.state,
                os: self.os,
                config: self.config.0,
                auth: self.auth.map(|j| j.0),
                ip: self.ip,
                end_time: self.end_time,
                user_info: self.user_info.map(|j| j.0),
                error: self.error,
            },
            version: self.version,
        }
    }
}

impl<'a> ReproStore<'a> {
    pub async fn insert(&self, repro: &Repro) -> StoreResult<Versioned<Repro>> {
        let row = sqlx::query_as!(
            Row,
            r#"
            INSERT INTO onefuzz.repro
                (vm_id, task_id, state, os, config, auth, ip, end_time, user_info, error)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING
                vm_id as "vm_id: ReproId",
                task_id as "task_id: TaskId",
                state as "state: ReproState",
                os as "os: Os",
                config as "config!: sqlx::types::Json<ReproConfig>",
                auth as "auth: sqlx::types::Json<ScalesetAuth>",
                ip, end_time,
                user_info as "user_info: sqlx::types::Json<UserInfo>",
                error, version
            "#,
            repro.vm_id as ReproId,
            repro.task_id as TaskId,
            repro.state as ReproState,
            repro.os as Os,
            sqlx::types::Json(&repro.config) as _,
            repro.auth.as_ref().map(sqlx::types::Json) as _,
            repro.ip,
            repro.end_time,
            repro.user_info.as_ref().map(sqlx::types::Json) as _,
            repro.error,
        )
        .fetch_one(self.0)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::AlreadyExists,
            _ => StoreError::Database(e),
        })?;

        Ok(row.into_versioned())
    }

    pub async fn get(&self, vm_id: ReproId) -> StoreResult<Option<Versioned<Repro>>> {
        let row = sqlx::query_as!(
            Row,
            r#"
            SELECT
                vm_id as "vm_id: ReproId",
                task_id as "task_id: TaskId",
                state as "state: ReproState",
                os as "os: Os",
                config as "config!: sqlx::types::Json<ReproConfig>",
                auth as "auth: sqlx::types::Json<ScalesetAuth>",
                ip, end_time,
                user_info as "user_info: sqlx::types::Json<UserInfo>",
                error, version
            FROM onefuzz.repro
            WHERE vm_id = $1
            "#,
            vm_id as ReproId,
        )
        .fetch_optional(self.0)
        .await?;

        Ok(row.map(Row::into_versioned))
    }

    pub async fn search_non_terminal(&self) -> StoreResult<Vec<Versioned<Repro>>> {
        let rows = sqlx::query_as!(
            Row,
            r#"
            SELECT
                vm_id as "vm_id: ReproId",
                task_id as "task_id: TaskId",
                state as "state: ReproState",
                os as "os: Os",
                config as "config!: sqlx::types::Json<ReproConfig>",
                auth as "auth: sqlx::types::Json<ScalesetAuth>",
                ip, end_time,
                user_info as "user_info: sqlx::types::Json<UserInfo>",
                error, version
            FROM onefuzz.repro
            WHERE state NOT IN ('stopped', 'extensions_failed', 'vm_allocation_failed')
            "#,
        )
        .fetch_all(self.0)
        .await?;

        Ok(rows.into_iter().map(Row::into_versioned).collect())
    }

    pub async fn replace(&self, repro: &Repro, expected_version: i64) -> StoreResult<i64> {
        let result = sqlx::query!(
            r#"
            UPDATE onefuzz.repro
               SET state = $2, auth = $3, ip = $4, end_time = $5, error = $6, version = version + 1
             WHERE vm_id = $1 AND version = $7
            "#,
            repro.vm_id as ReproId,
            repro.state as ReproState,
            repro.auth.as_ref().map(sqlx::types::Json) as _,
            repro.ip,
            repro.end_time,
            repro.error,
            expected_version,
        )
        .execute(self.0)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict);
        }

        Ok(expected_version + 1)
    }

    pub async fn delete(&self, vm_id: ReproId) -> StoreResult<()> {
        sqlx::query!("DELETE FROM onefuzz.repro WHERE vm_id = $1", vm_id as ReproId)
            .execute(self.0)
            .await?;
        Ok(())
    }
}
