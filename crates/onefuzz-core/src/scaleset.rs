use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{MachineId, PoolName, ScalesetId};

/// Lifecycle of a [`Scaleset`]. Declaration order is the monotonic state
/// index: `init -> setup -> running -> {resize|shutdown} -> halt`.
///
/// `resize` and `shutdown` are incomparable siblings reached from `running`;
/// both outrank `running` and are outranked by `halt` so that the overall
/// index still only moves forward.
#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "scaleset_state", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum ScalesetState {
    Init,
    Setup,
    Running,
    Resize,
    Shutdown,
    Halt,
}

impl ScalesetState {
    /// Scalesets in shutdown (or past it) never scale out, even if demand
    /// exists.
    pub fn accepts_scale_out(self) -> bool {
        matches!(self, ScalesetState::Running | ScalesetState::Resize)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScalesetAuth {
    pub password_ref: Option<String>,
    pub public_key: Option<String>,
}

/// A cloud VM fleet belonging to exactly one pool.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scaleset {
    pub scaleset_id: ScalesetId,
    pub pool_name: PoolName,
    pub state: ScalesetState,
    pub vm_sku: String,
    pub image: String,
    pub region: String,
    pub size: u32,
    /// Floor for the autoscaler. Defaults to 0 so an idle scaleset
    /// can scale all the way in and the next launch gets a fresh image.
    pub min_size: u32,
    pub max_size: u32,
    pub spot: bool,
    pub ephemeral_os: bool,
    pub needs_config_update: bool,
    pub tags: BTreeMap<String, String>,
    pub auth: Option<ScalesetAuth>,
    pub client_id: Option<String>,
    pub nodes: Vec<MachineId>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Scaleset {
    pub fn is_terminal(&self) -> bool {
        self.state == ScalesetState::Halt
    }
}
