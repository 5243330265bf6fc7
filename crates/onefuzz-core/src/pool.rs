use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{PoolId, PoolName};

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "os_kind", rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Linux,
    Windows,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "arch_kind", rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    X86_64,
    Arm64,
}

/// Lifecycle of a [`Pool`]. Declaration order is the monotonic state index.
#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "pool_state", rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum PoolState {
    Init,
    Running,
    Shutdown,
    Halt,
}

/// A named group of workers sharing `(os, arch, managed)`. Owns exactly one
/// work queue; pool deletion cascades to that queue only once every task
/// assigned to it has stopped.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Pool {
    pub pool_id: PoolId,
    pub name: PoolName,
    pub os: Os,
    pub arch: Architecture,
    pub managed: bool,
    pub state: PoolState,
    pub created_at: DateTime<Utc>,
}

impl Pool {
    /// Pools accept scheduling only while running.
    pub fn accepts_work(&self) -> bool {
        self.state == PoolState::Running
    }

    /// Whether work built for `os` may be placed on this pool: the pool must
    /// be running and its platform must match. `arch` and `managed` are
    /// fixed attributes of the pool a task names, so resolving the name pins
    /// those.
    pub fn accepts_task(&self, os: Os) -> bool {
        self.accepts_work() && self.os == os
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_state_is_monotonic_in_declaration_order() {
        assert!(PoolState::Init < PoolState::Running);
        assert!(PoolState::Running < PoolState::Shutdown);
        assert!(PoolState::Shutdown < PoolState::Halt);
    }

    #[test]
    fn pools_only_accept_tasks_for_their_own_platform() {
        let pool = Pool {
            pool_id: PoolId::new(),
            name: "linux-pool".into(),
            os: Os::Linux,
            arch: Architecture::X86_64,
            managed: true,
            state: PoolState::Running,
            created_at: Utc::now(),
        };

        assert!(pool.accepts_task(Os::Linux));
        assert!(!pool.accepts_task(Os::Windows));

        let halted = Pool {
            state: PoolState::Halt,
            ..pool
        };
        assert!(!halted.accepts_task(Os::Linux));
    }
}
