use onefuzz_core::ids::{JobId, MachineId, TaskId};
use onefuzz_core::job::UserInfo;
use onefuzz_core::pool::Os;
use onefuzz_core::task::{Task, TaskConfig, TaskError, TaskState};

use super::Versioned;
use crate::error::{StoreError, StoreResult};

pub struct TaskStore<'a>(pub(super) &'a sqlx::PgPool);

struct Row {
    task_id: TaskId,
    job_id: JobId,
    state: TaskState,
    os: Os,
    config: sqlx::types::Json<TaskConfig>,
    error: Option<sqlx::types::Json<TaskError>>,
    heartbeat: Option<chrono::DateTime<chrono::Utc>>,
    end_time: Option<chrono::DateTime<chrono::Utc>>,
    user_info: Option<sqlx::types::Json<UserInfo>>,
    running_on: Option<MachineId>,
    created_at: chrono::DateTime<chrono::Utc>,
    version: i64,
}

impl Row {
    fn into_versioned(self) -> Versioned<Task> {
        Versioned {
            value: Task {
                task_id: self.task_id,
                job_id: self.job_id,
                state: self.state,
                os: self.os,
                config: self.config.0,
                error: self.error.map(|j| j.0),
                heartbeat: self.heartbeat,
                end_time: self.end_time,
                user_info: self.user_info.map(|j| j.0),
                created_at: self.created_at,
                running_on: self.running_on,
            },
            version: self.version,
        }
    }
}

impl<'a> TaskStore<'a> {
    pub async fn insert(&self, task: &Task) -> StoreResult<Versioned<Task>> {
        let row = sqlx::query_as!(
            Row,
            r#"
            INSERT INTO onefuzz.task
                (task_id, job_id, state, os, config, error, heartbeat, end_time, user_info, running_on)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING
                task_id as "task_id: TaskId",
                job_id as "job_id: JobId",
                state as "state: TaskState",
                os as "os: Os",
                config as "config!: sqlx::types::Json<TaskConfig>",
                error as "error: sqlx::types::Json<TaskError>",
                heartbeat,
                end_time,
                user_info as "user_info: sqlx::types::Json<UserInfo>",
                running_on as "running_on: MachineId",
                created_at,
                version
            "#,
            task.task_id as TaskId,
            task.job_id as JobId,
            task.state as TaskState,
            task.os as Os,
            sqlx::types::Json(&task.config) as _,
            task.error.as_ref().map(sqlx::types::Json) as _,
            task.heartbeat,
            task.end_time,
            task.user_info.as_ref().map(sqlx::types::Json) as _,
            task.running_on as Option<MachineId>,
        )
        .fetch_one(self.0)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::AlreadyExists,
            _ => StoreError::Database(e),
        })?;

        Ok(row.into_versioned())
    }

    pub async fn get(&self, task_id: TaskId) -> StoreResult<Option<Versioned<Task>>> {
        let row = sqlx::query_as!(
            Row,
            r#"
            SELECT
                task_id as "task_id: TaskId",
                job_id as "job_id: JobId",
                state as "state: TaskState",
                os as "os: Os",
                config as "config!: sqlx::types::Json<TaskConfig>",
                error as "error: sqlx::types::Json<TaskError>",
                heartbeat,
                end_time,
                user_info as "user_info: sqlx::types::Json<UserInfo>",
                running_on as "running_on: MachineId",
                created_at,
                version
            FROM onefuzz.task
            WHERE task_id = $1
            "#,
            task_id as TaskId,
        )
        .fetch_optional(self.0)
        .await?;

        Ok(row.map(Row::into_versioned))
    }

    pub async fn search_by_job(&self, job_id: JobId) -> StoreResult<Vec<Versioned<Task>>> {
        let rows = sqlx::query_as!(
            Row,
            r#"
            SELECT
                task_id as "task_id: TaskId",
                job_id as "job_id: JobId",
                state as "state: TaskState",
                os as "os: Os",
                config as "config!: sqlx::types::Json<TaskConfig>",
                error as "error: sqlx::types::Json<TaskError>",
                heartbeat,
                end_time,
                user_info as "user_info: sqlx::types::Json<UserInfo>",
                running_on as "running_on: MachineId",
                created_at,
                version
            FROM onefuzz.task
            WHERE job_id = $1
            "#,
            job_id as JobId,
        )
        .fetch_all(self.0)
        .await?;

        Ok(rows.into_iter().map(Row::into_versioned).collect())
    }

    /// Tasks in `waiting`, used by the scheduler's claim pass.
    /// Ordered by `(created_at, task_id)` so replays of the same backlog
    /// schedule deterministically.
    pub async fn search_waiting(&self) -> StoreResult<Vec<Versioned<Task>>> {
        let rows = sqlx::query_as!(
            Row,
            r#"
            SELECT
                task_id as "task_id: TaskId",
                job_id as "job_id: JobId",
                state as "state: TaskState",
                os as "os: Os",
                config as "config!: sqlx::types::Json<TaskConfig>",
                error as "error: sqlx::types::Json<TaskError>",
                heartbeat,
                end_time,
                user_info as "user_info: sqlx::types::Json<UserInfo>",
                running_on as "running_on: MachineId",
                created_at,
                version
            FROM onefuzz.task
            WHERE state = 'waiting'
            ORDER BY created_at, task_id
            "#,
        )
        .fetch_all(self.0)
        .await?;

        Ok(rows.into_iter().map(Row::into_versioned).collect())
    }

    /// Tasks targeting a pool that have not yet stopped; gates pool deletion.
    pub async fn search_active_by_pool(&self, pool_name: &onefuzz_core::ids::PoolName) -> StoreResult<Vec<Versioned<Task>>> {
        let rows = sqlx::query_as!(
            Row,
            r#"
            SELECT
                task_id as "task_id: TaskId",
                job_id as "job_id: JobId",
                state as "state: TaskState",
                os as "os: Os",
                config as "config!: sqlx::types::Json<TaskConfig>",
                error as "error: sqlx::types::Json<TaskError>",
                heartbeat,
                end_time,
                user_info as "user_info: sqlx::types::Json<UserInfo>",
                running_on as "running_on: MachineId",
                created_at,
                version
            FROM onefuzz.task
            WHERE state != 'stopped' AND config #>> '{pool,name}' = $1
            "#,
            pool_name.0,
        )
        .fetch_all(self.0)
        .await?;

        Ok(rows.into_iter().map(Row::into_versioned).collect())
    }

    /// Tasks assigned to a node whose heartbeat has gone silent, used by the
    /// node liveness sweep to re-queue orphaned work.
    pub async fn search_running_on(&self, machine_id: MachineId) -> StoreResult<Vec<Versioned<Task>>> {
        let rows = sqlx::query_as!(
            Row,
            r#"
            SELECT
                task_id as "task_id: TaskId",
                job_id as "job_id: JobId",
                state as "state: TaskState",
                os as "os: Os",
                config as "config!: sqlx::types::Json<TaskConfig>",
                error as "error: sqlx::types::Json<TaskError>",
                heartbeat,
                end_time,
                user_info as "user_info: sqlx::types::Json<UserInfo>",
                running_on as "running_on: MachineId",
                created_at,
                version
            FROM onefuzz.task
            WHERE running_on = $1
            "#,
            machine_id as MachineId,
        )
        .fetch_all(self.0)
        .await?;

        Ok(rows.into_iter().map(Row::into_versioned).collect())
    }

    pub async fn replace(&self, task: &Task, expected_version: i64) -> StoreResult<i64> {
        let result = sqlx::query!(
            r#"
            UPDATE onefuzz.task
               SET state = $2, config = $3, error = $4, heartbeat = $5, end_time = $6,
                   user_info = $7, running_on = $8, version = version + 1
             WHERE task_id = $1 AND version = $9
            "#,
            task.task_id as TaskId,
            task.state as TaskState,
            sqlx::types::Json(&task.config) as _,
            task.error.as_ref().map(sqlx::types::Json) as _,
            task.heartbeat,
            task.end_time,
            task.user_info.as_ref().map(sqlx::types::Json) as _,
            task.running_on as Option<MachineId>,
            expected_version,
        )
        .execute(self.0)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict);
        }

        Ok(expected_version + 1)
    }

    pub async fn delete(&self, task_id: TaskId) -> StoreResult<()> {
        sqlx::query!("DELETE FROM onefuzz.task WHERE task_id = $1", task_id as TaskId)
            .execute(self.0)
            .await?;
        Ok(())
    }
}
