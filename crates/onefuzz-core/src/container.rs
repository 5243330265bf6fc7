use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A cloud storage container. Namespacing isolates test prefixes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    pub storage_account: String,
    pub metadata: BTreeMap<String, String>,
}

/// A retention-tag policy entry: blobs tagged with an expiry date are purged
/// by the retention sweep.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetentionTag {
    pub container: String,
    pub blob: String,
    pub expires_at: DateTime<Utc>,
}

impl RetentionTag {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
