use std::time::{Duration, Instant};

use onefuzz_core::instance_config::InstanceConfig;

use super::{Store, Versioned};
use crate::error::{StoreError, StoreResult};

/// Singleton row (`id` is a one-value boolean key). Reads default to
/// [`InstanceConfig::default`] when the row has never been written.
pub struct InstanceConfigStore<'a>(pub(super) &'a sqlx::PgPool);

impl<'a> InstanceConfigStore<'a> {
    pub async fn get(&self) -> StoreResult<Versioned<InstanceConfig>> {
        let row = sqlx::query!(
            r#"SELECT config as "config!: sqlx::types::Json<InstanceConfig>", version FROM onefuzz.instance_config WHERE id"#,
        )
        .fetch_optional(self.0)
        .await?;

        Ok(match row {
            Some(row) => Versioned {
                value: row.config.0,
                version: row.version,
            },
            None => Versioned {
                value: InstanceConfig::default(),
                version: 0,
            },
        })
    }

    /// Upserts the singleton row. `expected_version` of `0` means "create if
    /// absent"; any other value is a compare-and-swap against the current row.
    pub async fn replace(&self, config: &InstanceConfig, expected_version: i64) -> StoreResult<i64> {
        if expected_version == 0 {
            let result = sqlx::query!(
                r#"
                INSERT INTO onefuzz.instance_config (id, config, version)
                VALUES (true, $1, 1)
                ON CONFLICT (id) DO NOTHING
                "#,
                sqlx::types::Json(config) as _,
            )
            .execute(self.0)
            .await?;

            if result.rows_affected() == 0 {
                return Err(StoreError::Conflict);
            }

            return Ok(1);
        }

        let result = sqlx::query!(
            r#"
            UPDATE onefuzz.instance_config
               SET config = $1, version = version + 1
             WHERE id AND version = $2
            "#,
            sqlx::types::Json(config) as _,
            expected_version,
        )
        .execute(self.0)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict);
        }

        Ok(expected_version + 1)
    }
}

/// Read-through cache over the singleton [`InstanceConfig`] row.
///
/// The instance config is the only process-wide state in the system, read on
/// hot paths (admin checks, feature flags) but written rarely; reads are
/// served from memory for up to [`ConfigCache::DEFAULT_TTL`] and a write
/// through [`ConfigCache::set`] refreshes the cache immediately.
pub struct ConfigCache {
    store: Store,
    ttl: Duration,
    cached: parking_lot::Mutex<Option<(Instant, Versioned<InstanceConfig>)>>,
}

impl ConfigCache {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

    pub fn new(store: Store) -> Self {
        Self::with_ttl(store, Self::DEFAULT_TTL)
    }

    pub fn with_ttl(store: Store, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            cached: parking_lot::Mutex::new(None),
        }
    }

    pub async fn get(&self) -> StoreResult<Versioned<InstanceConfig>> {
        if let Some((fetched_at, config)) = &*self.cached.lock() {
            if fetched_at.elapsed() < self.ttl {
                return Ok(config.clone());
            }
        }

        let config = self.store.instance_config().get().await?;
        *self.cached.lock() = Some((Instant::now(), config.clone()));
        Ok(config)
    }

    /// Write-through update; the cache is refreshed with the written value
    /// rather than waiting out its TTL.
    pub async fn set(&self, config: &InstanceConfig, expected_version: i64) -> StoreResult<i64> {
        let version = self.store.instance_config().replace(config, expected_version).await?;
        *self.cached.lock() = Some((
            Instant::now(),
            Versioned {
                value: config.clone(),
                version,
            },
        ));
        Ok(version)
    }

    pub fn invalidate(&self) {
        *self.cached.lock() = None;
    }
}
