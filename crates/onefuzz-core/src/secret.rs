use serde::{Deserialize, Serialize};

/// A reference into an external secret store.
///
/// Notification payloads that used to embed tokens directly are migrated to
/// carry only this reference; resolving it to a real secret is the
/// responsibility of whatever secret-store client the dispatcher is
/// configured with. Deleting the owning notification accompanies deleting
/// the reference.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretRef(pub String);

impl SecretRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl std::fmt::Display for SecretRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "secret:{}", self.0)
    }
}
