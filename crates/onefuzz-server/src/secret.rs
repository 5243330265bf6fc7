//! Resolves a [`onefuzz_core::secret::SecretRef`] by environment lookup.
//!
//! A real deployment would back this with a cloud key vault client, which is
//! the kind of cloud SDK wrapper the workspace's Non-goals exclude; this
//! resolver is the minimal real implementation the notification dispatcher
//! needs to be exercised end to end.

use async_trait::async_trait;
use onefuzz_core::secret::SecretRef;
use onefuzz_notify::SecretResolver;

pub struct EnvSecretResolver;

#[async_trait]
impl SecretResolver for EnvSecretResolver {
    async fn resolve(&self, secret: &SecretRef) -> anyhow::Result<String> {
        let var = format!("ONEFUZZ_SECRET_{}", secret.0.to_uppercase().replace(['-', ' '], "_"));
        std::env::var(&var).map_err(|_| anyhow::anyhow!("secret `{}` is not set (${var})", secret.0))
    }
}
