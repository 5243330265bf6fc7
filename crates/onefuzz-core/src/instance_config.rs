use std::collections::BTreeSet;

/// Singleton record of tenant-wide knobs. The only process-wide state in the
/// system; cached read-through with a 5-minute TTL and explicit invalidation
/// on write (see `onefuzz_runtime::store::ConfigCache`).
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct InstanceConfig {
    pub admins: BTreeSet<String>,
    pub default_image: String,
    pub proxy_vm_sku: String,
    pub feature_flags: BTreeSet<String>,
    /// Default retention period, in days, for blobs with no explicit
    /// retention tag.
    pub default_retention_days: u32,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            admins: BTreeSet::new(),
            default_image: "Canonical:UbuntuServer:20.04-LTS:latest".into(),
            proxy_vm_sku: "Standard_B2s".into(),
            feature_flags: BTreeSet::new(),
            default_retention_days: 30,
        }
    }
}

impl InstanceConfig {
    pub fn is_admin(&self, principal: &str) -> bool {
        self.admins.contains(principal)
    }

    pub fn has_feature(&self, flag: &str) -> bool {
        self.feature_flags.contains(flag)
    }
}
