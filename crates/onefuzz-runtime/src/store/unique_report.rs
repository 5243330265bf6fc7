use onefuzz_core::ids::JobId;
use onefuzz_core::report::Report;

use crate::error::StoreResult;

pub struct UniqueReportStore<'a>(pub(super) &'a sqlx::PgPool);

/// Outcome of recording a fingerprint: `occurrences` is the running total
/// for this `(job, project, build, minimized_stack_sha256)` after the call,
/// `is_new` is true exactly once, on the first sighting.
pub struct RecordOutcome {
    pub is_new: bool,
    pub occurrences: i64,
}

impl<'a> UniqueReportStore<'a> {
    /// Upsert a fingerprint sighting. Uses `xmax = 0` to distinguish the
    /// insert branch of the `ON CONFLICT` from the update branch in a
    /// single round trip, avoiding the race a separate `SELECT` then
    /// `INSERT`/`UPDATE` would have under concurrent dispatch of the same
    /// crash from two task events.
    pub async fn record(
        &self,
        job_id: JobId,
        project: &str,
        build: &str,
        report: &Report,
    ) -> StoreResult<RecordOutcome> {
        let row = sqlx::query!(
            r#"
            INSERT INTO onefuzz.unique_report
                (job_id, project, build, minimized_stack_sha256,
                 minimized_stack_function_lines_sha256, report)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (job_id, project, build, minimized_stack_sha256)
            DO UPDATE SET
                occurrences = onefuzz.unique_report.occurrences + 1,
                last_seen_at = now()
            RETURNING occurrences, (xmax = 0) AS "is_new!"
            "#,
            job_id as JobId,
            project,
            build,
            report.minimized_stack_sha256,
            report.minimized_stack_function_lines_sha256,
            sqlx::types::Json(report) as _,
        )
        .fetch_one(self.0)
        .await?;

        Ok(RecordOutcome {
            is_new: row.is_new,
            occurrences: row.occurrences,
        })
    }

    pub async fn occurrences(
        &self,
        job_id: JobId,
        project: &str,
        build: &str,
        minimized_stack_sha256: &str,
    ) -> StoreResult<Option<i64>> {
        let occurrences = sqlx::query_scalar!(
            r#"
            SELECT occurrences
            FROM onefuzz.unique_report
            WHERE job_id = $1 AND project = $2 AND build = $3 AND minimized_stack_sha256 = $4
            "#,
            job_id as JobId,
            project,
            build,
            minimized_stack_sha256,
        )
        .fetch_optional(self.0)
        .await?;

        Ok(occurrences)
    }
}
