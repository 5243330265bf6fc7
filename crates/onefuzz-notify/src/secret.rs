//! Resolving a [`SecretRef`] into its value is a Key Vault concern (a cloud
//! SDK wrapper, out of scope); dispatchers take a resolver at the seam
//! instead of reaching for a concrete secret store themselves.

use async_trait::async_trait;
use onefuzz_core::secret::SecretRef;

#[async_trait]
pub trait SecretResolver: Send + Sync {
    async fn resolve(&self, secret: &SecretRef) -> anyhow::Result<String>;
}
