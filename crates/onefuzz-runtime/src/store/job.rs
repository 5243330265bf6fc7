use onefuzz_core::ids::JobId;
use onefuzz_core::job::{Job, JobConfig, JobState, UserInfo};

use super::Versioned;
use crate::error::{StoreError, StoreResult};

pub struct JobStore<'a>(pub(super) &'a sqlx::PgPool);

struct Row {
    job_id: JobId,
    state: JobState,
    config: sqlx::types::Json<JobConfig>,
    user_info: Option<sqlx::types::Json<UserInfo>>,
    error: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    version: i64,
}

impl Row {
    fn into_versioned(self) -> Versioned<Job> {
        Versioned {
            value: Job {
                job_id: self.job_id,
                state: self.state,
                config: self.config.0,
                user_info: self.user_info.map(|j| j.0),
                created_at: self.created_at,
                error: self.error,
            },
            version: self.version,
        }
    }
}

impl<'a> JobStore<'a> {
    pub async fn insert(&self, job: &Job) -> StoreResult<Versioned<Job>> {
        let row = sqlx::query_as!(
            Row,
            r#"
            INSERT INTO onefuzz.job(job_id, state, config, user_info, error)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING
                job_id as "job_id: JobId",
                state as "state: JobState",
                config as "config!: sqlx::types::Json<JobConfig>",
                user_info as "user_info: sqlx::types::Json<UserInfo>",
                error,
                created_at,
                version
            "#,
            job.job_id as JobId,
            job.state as JobState,
            sqlx::types::Json(&job.config) as _,
            job.user_info.as_ref().map(sqlx::types::Json) as _,
            job.error,
        )
        .fetch_one(self.0)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::AlreadyExists,
            _ => StoreError::Database(e),
        })?;

        Ok(row.into_versioned())
    }

    pub async fn get(&self, job_id: JobId) -> StoreResult<Option<Versioned<Job>>> {
        let row = sqlx::query_as!(
            Row,
            r#"
            SELECT
                job_id as "job_id: JobId",
                state as "state: JobState",
                config as "config!: sqlx::types::Json<JobConfig>",
                user_info as "user_info: sqlx::types::Json<UserInfo>",
                error,
                created_at,
                version
            FROM onefuzz.job
            WHERE job_id = $1
            "#,
            job_id as JobId,
        )
        .fetch_optional(self.0)
        .await?;

        Ok(row.map(Row::into_versioned))
    }

    /// Compare-and-swap update. Fails with [`StoreError::Conflict`] if
    /// `expected_version` no longer matches.
    pub async fn replace(&self, job: &Job, expected_version: i64) -> StoreResult<i64> {
        let result = sqlx::query!(
            r#"
            UPDATE onefuzz.job
               SET state = $2, config = $3, user_info = $4, error = $5, version = version + 1
             WHERE job_id = $1 AND version = $6
            "#,
            job.job_id as JobId,
            job.state as JobState,
            sqlx::types::Json(&job.config) as _,
            job.user_info.as_ref().map(sqlx::types::Json) as _,
            job.error,
            expected_version,
        )
        .execute(self.0)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict);
        }

        Ok(expected_version + 1)
    }

    /// All jobs not yet in a terminal state; used by the scheduler tick to
    /// evaluate job-staleness and job-auto-stop.
    pub async fn search_non_terminal(&self) -> StoreResult<Vec<Versioned<Job>>> {
        let rows = sqlx::query_as!(
            Row,
            r#"
            SELECT
                job_id as "job_id: JobId",
                state as "state: JobState",
                config as "config!: sqlx::types::Json<JobConfig>",
                user_info as "user_info: sqlx::types::Json<UserInfo>",
                error,
                created_at,
                version
            FROM onefuzz.job
            WHERE state != 'stopped'
            "#,
        )
        .fetch_all(self.0)
        .await?;

        Ok(rows.into_iter().map(Row::into_versioned).collect())
    }

    /// Idempotent: deleting an absent job succeeds.
    pub async fn delete(&self, job_id: JobId) -> StoreResult<()> {
        sqlx::query!("DELETE FROM onefuzz.job WHERE job_id = $1", job_id as JobId)
            .execute(self.0)
            .await?;
        Ok(())
    }
}
