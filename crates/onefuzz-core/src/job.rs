use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::JobId;

/// Lifecycle of a [`Job`]. Declaration order is the monotonic state index:
/// `init -> enabled -> stopping -> stopped`.
#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "job_state", rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Init,
    Enabled,
    Stopping,
    Stopped,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobConfig {
    pub project: String,
    pub name: String,
    pub build: String,
    pub duration: u32,
    #[serde(default)]
    pub logs: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UserInfo {
    pub application_id: Option<String>,
    pub object_id: Option<String>,
    pub upn: Option<String>,
}

/// User-submitted fuzzing engagement comprising one or more Tasks.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub state: JobState,
    pub config: JobConfig,
    #[serde(default)]
    pub user_info: Option<UserInfo>,
    pub created_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl Job {
    /// Jobs not moved to `enabled` within 30 days of creation auto-stop.
    pub const STALE_AFTER: chrono::Duration = chrono::Duration::days(30);

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Init && now.signed_duration_since(self.created_at) > Self::STALE_AFTER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_past_thirty_days_in_init_is_stale() {
        let job = Job {
            job_id: JobId::new(),
            state: JobState::Init,
            config: JobConfig {
                project: "p".into(),
                name: "n".into(),
                build: "1".into(),
                duration: 3600,
                logs: None,
            },
            user_info: None,
            created_at: Utc::now() - chrono::Duration::days(31),
            error: None,
        };
        assert!(job.is_stale(Utc::now()));
    }

    #[test]
    fn enabled_job_never_goes_stale() {
        let job = Job {
            job_id: JobId::new(),
            state: JobState::Enabled,
            config: JobConfig {
                project: "p".into(),
                name: "n".into(),
                build: "1".into(),
                duration: 3600,
                logs: None,
            },
            user_info: None,
            created_at: Utc::now() - chrono::Duration::days(365),
            error: None,
        };
        assert!(!job.is_stale(Utc::now()));
    }
}
