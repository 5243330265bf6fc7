//! Database migrations for the onefuzz entity store.

/// Apply every migration under `migrations/` that has not yet run.
///
/// This is a thin wrapper around `sqlx::migrate!` so callers don't need to
/// depend on `sqlx::migrate::Migrator` directly. Safe to call on every
/// startup: already-applied migrations are skipped.
pub async fn migrate(pool: &sqlx::PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
