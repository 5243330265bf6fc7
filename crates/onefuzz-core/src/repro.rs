use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ReproId, TaskId};
use crate::pool::Os;

/// Lifecycle of a [`Repro`] debug VM. Declaration order is the monotonic
/// state index for the happy path; `extensions_failed` and
/// `vm_allocation_failed` are terminal siblings of `running` reached from
/// `extensions_launch`.
#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "repro_state", rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum ReproState {
    Init,
    ExtensionsLaunch,
    ExtensionsFailed,
    VmAllocationFailed,
    Running,
    Stopping,
    Stopped,
}

impl ReproState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ReproState::Stopped | ReproState::ExtensionsFailed | ReproState::VmAllocationFailed
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReproConfig {
    pub container: String,
    pub path: String,
    pub duration: u32,
}

/// A short-lived VM that replays a specific crashing input under a debugger.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Repro {
    pub vm_id: ReproId,
    pub task_id: TaskId,
    pub state: ReproState,
    pub os: Os,
    pub config: ReproConfig,
    pub auth: Option<crate::scaleset::ScalesetAuth>,
    pub ip: Option<String>,
    pub end_time: Option<DateTime<Utc>>,
    pub user_info: Option<crate::job::UserInfo>,
    pub error: Option<String>,
}

impl Repro {
    /// Deletion is idempotent: a repro that is already `stopped` with no VM
    /// present is not an error.
    pub fn delete_is_noop(&self) -> bool {
        self.state == ReproState::Stopped && self.ip.is_none()
    }
}
