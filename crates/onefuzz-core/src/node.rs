use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{MachineId, PoolId, PoolName, ScalesetId};

/// Lifecycle of a [`Node`]. Declaration order is the monotonic state index:
/// `init -> ready -> busy -> done -> {ready|halt}`.
///
/// `done -> ready` is the one transition that moves the index backwards (a
/// node that finished a task and has no pending reimage/delete request is
/// recycled). Callers that need to assert monotonicity should compare
/// against the node's *generation* rather than raw state index across that
/// particular edge.
#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "node_state", rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Init,
    Ready,
    Busy,
    Done,
    Halt,
}

/// A single VM running the agent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Node {
    pub machine_id: MachineId,
    pub pool_name: PoolName,
    pub pool_id: PoolId,
    pub scaleset_id: Option<ScalesetId>,
    pub version: String,
    pub state: NodeState,
    pub initialized_at: Option<DateTime<Utc>>,
    pub heartbeat: Option<DateTime<Utc>>,
    pub reimage_requested: bool,
    pub delete_requested: bool,
    pub debug_keep_node: bool,
}

impl Node {
    /// A node with no heartbeat for longer than `timeout` is considered dead.
    pub fn is_heartbeat_expired(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        match self.heartbeat {
            Some(hb) => now.signed_duration_since(hb) > timeout,
            // A node that has never reported in is only "dead" once it has had a
            // chance to register at all; the caller is expected to also check
            // against a startup grace period.
            None => false,
        }
    }

    /// Nodes older than 7 days are reimaged even if otherwise healthy, unless
    /// `debug_keep_node` suppresses it -- but never past the hard cap.
    pub fn is_past_max_age(&self, now: DateTime<Utc>) -> bool {
        match self.initialized_at {
            Some(created) => now.signed_duration_since(created) > Self::max_age(),
            None => false,
        }
    }

    pub fn max_age() -> chrono::Duration {
        chrono::Duration::days(7)
    }

    /// `debug_keep_node` suppresses reimage up to the 7-day hard cap, which is
    /// always authoritative.
    pub fn should_reimage(&self, now: DateTime<Utc>, heartbeat_timeout: chrono::Duration) -> bool {
        if self.is_heartbeat_expired(now, heartbeat_timeout) {
            return true;
        }

        if self.debug_keep_node {
            return false;
        }

        self.is_past_max_age(now)
    }

    /// A `done` node with a pending reimage or delete request must continue on
    /// to `halt` rather than being recycled back to `ready`.
    pub fn done_destination(&self) -> NodeState {
        if self.reimage_requested || self.delete_requested {
            NodeState::Halt
        } else {
            NodeState::Ready
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(overrides: impl FnOnce(&mut Node)) -> Node {
        let mut node = Node {
            machine_id: MachineId::new(),
            pool_name: "linux-pool".into(),
            pool_id: PoolId::new(),
            scaleset_id: None,
            version: "1.0.0".into(),
            state: NodeState::Ready,
            initialized_at: Some(Utc::now()),
            heartbeat: Some(Utc::now()),
            reimage_requested: false,
            delete_requested: false,
            debug_keep_node: false,
        };
        overrides(&mut node);
        node
    }

    #[test]
    fn node_with_pending_reimage_halts_instead_of_recycling() {
        let n = node(|n| n.reimage_requested = true);
        assert_eq!(n.done_destination(), NodeState::Halt);
    }

    #[test]
    fn node_with_no_pending_work_recycles_to_ready() {
        let n = node(|_| {});
        assert_eq!(n.done_destination(), NodeState::Ready);
    }

    #[test]
    fn debug_keep_node_is_overridden_by_the_seven_day_hard_cap() {
        let old = Utc::now() - chrono::Duration::days(8);
        let n = node(|n| {
            n.debug_keep_node = true;
            n.initialized_at = Some(old);
        });
        assert!(n.should_reimage(Utc::now(), chrono::Duration::seconds(120)));
    }

    #[test]
    fn debug_keep_node_suppresses_reimage_before_the_cap() {
        let recent = Utc::now() - chrono::Duration::days(2);
        let n = node(|n| {
            n.debug_keep_node = true;
            n.initialized_at = Some(recent);
        });
        assert!(!n.should_reimage(Utc::now(), chrono::Duration::seconds(120)));
    }

    #[test]
    fn missing_heartbeat_past_timeout_forces_reimage() {
        let stale = Utc::now() - chrono::Duration::seconds(600);
        let n = node(|n| n.heartbeat = Some(stale));
        assert!(n.should_reimage(Utc::now(), chrono::Duration::seconds(120)));
    }
}
