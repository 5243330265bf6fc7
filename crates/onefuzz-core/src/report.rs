use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{JobId, TaskId};

/// A parsed crash, attached to the task and job that produced it.
///
/// `call_stack` and the two minimized fields are populated by the
/// minimization step; a report that failed to parse an `asan_log` still
/// gets a `Report` record (`crash_type` set to [`Report::UNPARSEABLE`],
/// `call_stack` empty) rather than being dropped, since the owning task
/// must never fail on account of a malformed sanitizer log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Report {
    pub task_id: TaskId,
    pub job_id: JobId,
    pub input_blob: String,
    pub executable: String,
    pub crash_type: String,
    pub crash_site: String,
    pub call_stack: Vec<String>,
    pub asan_log: Option<String>,
    pub scariness_score: Option<i32>,
    pub scariness_description: Option<String>,
    pub minimized_stack: Vec<String>,
    pub minimized_stack_sha256: String,
    pub minimized_stack_function_lines: Vec<String>,
    pub minimized_stack_function_lines_sha256: String,
    pub created_at: DateTime<Utc>,
}

impl Report {
    /// `crash_type` sentinel for a log that couldn't be parsed at all.
    pub const UNPARSEABLE: &'static str = "unparseable_crash_log";

    pub fn is_unparseable(&self) -> bool {
        self.crash_type == Self::UNPARSEABLE
    }
}

/// A distinct fingerprint observed for a `(job, project, build)`, with an
/// occurrence counter. The first report to carry a fingerprint is "new
/// unique" and is what triggers `crash_reported`; later ones bump
/// `occurrences` and trigger `regression_reported` only for regression
/// tasks.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UniqueReport {
    pub job_id: JobId,
    pub project: String,
    pub build: String,
    pub minimized_stack_sha256: String,
    pub minimized_stack_function_lines_sha256: String,
    pub report: Report,
    pub occurrences: i64,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}
