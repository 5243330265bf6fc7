//! Entity store semantics: insert/replace/delete contracts, optimistic
//! concurrency, the unique-report dedup upsert and the instance-config cache.

use onefuzz_core::instance_config::InstanceConfig;
use onefuzz_core::job::JobState;
use onefuzz_core::report::Report;
use onefuzz_runtime::error::StoreError;
use onefuzz_runtime::store::{ConfigCache, Store};

use crate::{seed_job, seed_pool, seed_task};

#[sqlx::test]
async fn insert_fails_when_the_key_is_occupied(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    let job = seed_job(&store, JobState::Init).await;

    let result = store.jobs().insert(&job).await;
    assert!(matches!(result, Err(StoreError::AlreadyExists)));
}

#[sqlx::test]
async fn replace_with_a_stale_version_conflicts(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    let job = seed_job(&store, JobState::Init).await;

    let first = store.jobs().get(job.job_id).await.unwrap().unwrap();

    let mut updated = first.value.clone();
    updated.state = JobState::Enabled;
    store.jobs().replace(&updated, first.version).await.unwrap();

    // A second writer still holding the original version loses the race.
    let mut racer = first.value;
    racer.state = JobState::Stopping;
    let result = store.jobs().replace(&racer, first.version).await;
    assert!(matches!(result, Err(StoreError::Conflict)));

    let stored = store.jobs().get(job.job_id).await.unwrap().unwrap();
    assert_eq!(stored.value.state, JobState::Enabled);
}

#[sqlx::test]
async fn delete_is_idempotent(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    let job = seed_job(&store, JobState::Stopped).await;

    store.jobs().delete(job.job_id).await.unwrap();
    store.jobs().delete(job.job_id).await.unwrap();
    assert!(store.jobs().get(job.job_id).await.unwrap().is_none());
}

fn report(job_id: onefuzz_core::ids::JobId, task_id: onefuzz_core::ids::TaskId, fingerprint: &str) -> Report {
    Report {
        task_id,
        job_id,
        input_blob: "crashes/input".into(),
        executable: "fuzz_target".into(),
        crash_type: "heap-buffer-overflow".into(),
        crash_site: "foo_bar+0x10".into(),
        call_stack: vec!["foo_bar+0x10".into()],
        asan_log: None,
        scariness_score: None,
        scariness_description: None,
        minimized_stack: vec!["foo_bar+0x10".into()],
        minimized_stack_sha256: fingerprint.into(),
        minimized_stack_function_lines: vec!["foo_bar:0x10".into()],
        minimized_stack_function_lines_sha256: format!("fl-{fingerprint}"),
        created_at: chrono::Utc::now(),
    }
}

#[sqlx::test]
async fn a_fingerprint_is_new_exactly_once_per_job(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    seed_pool(&store, "pool-a").await;
    let job = seed_job(&store, JobState::Enabled).await;
    let task = seed_task(&store, &job, "pool-a", onefuzz_core::task::TaskState::Running).await;

    let r = report(job.job_id, task.task_id, "abc123");

    let first = store.unique_reports().record(job.job_id, "proj", "1", &r).await.unwrap();
    assert!(first.is_new);
    assert_eq!(first.occurrences, 1);

    let second = store.unique_reports().record(job.job_id, "proj", "1", &r).await.unwrap();
    assert!(!second.is_new);
    assert_eq!(second.occurrences, 2);

    // The same fingerprint under a different job is its own unique report.
    let other_job = seed_job(&store, JobState::Enabled).await;
    let r = report(other_job.job_id, task.task_id, "abc123");
    let elsewhere = store.unique_reports().record(other_job.job_id, "proj", "1", &r).await.unwrap();
    assert!(elsewhere.is_new);
}

#[sqlx::test]
async fn notification_dispatch_is_recorded_once_per_fingerprint(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    let id = onefuzz_core::ids::NotificationId::new();

    assert!(!store.notifications().already_dispatched(id, "abc123").await.unwrap());
    assert!(store.notifications().record_dispatch(id, "abc123", Some("42")).await.unwrap());
    assert!(!store.notifications().record_dispatch(id, "abc123", Some("42")).await.unwrap());
    assert!(store.notifications().already_dispatched(id, "abc123").await.unwrap());
}

#[sqlx::test]
async fn instance_config_defaults_until_written(pool: sqlx::PgPool) {
    let store = Store::new(pool);

    let config = store.instance_config().get().await.unwrap();
    assert_eq!(config.version, 0);
    assert!(config.value.admins.is_empty());

    let mut updated = config.value.clone();
    updated.admins.insert("admin@example.com".into());
    let version = store.instance_config().replace(&updated, config.version).await.unwrap();

    let config = store.instance_config().get().await.unwrap();
    assert_eq!(config.version, version);
    assert!(config.value.is_admin("admin@example.com"));
}

#[sqlx::test]
async fn config_cache_serves_writes_through_immediately(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    let cache = ConfigCache::new(store.clone());

    let cached = cache.get().await.unwrap();
    assert!(!cached.value.has_feature("new-scheduler"));

    let mut updated = cached.value.clone();
    updated.feature_flags.insert("new-scheduler".into());
    cache.set(&updated, cached.version).await.unwrap();

    // Within the TTL the cache still answers, now with the written value.
    let cached = cache.get().await.unwrap();
    assert!(cached.value.has_feature("new-scheduler"));
}

#[sqlx::test]
async fn config_cache_invalidation_forces_a_re_read(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    let cache = ConfigCache::new(store.clone());
    cache.get().await.unwrap();

    // A write that bypasses the cache is only visible after invalidation.
    let current = store.instance_config().get().await.unwrap();
    let mut updated = current.value.clone();
    updated.feature_flags.insert("bypassed".into());
    store.instance_config().replace(&updated, current.version).await.unwrap();

    assert!(!cache.get().await.unwrap().value.has_feature("bypassed"));
    cache.invalidate();
    assert!(cache.get().await.unwrap().value.has_feature("bypassed"));
}

#[sqlx::test]
async fn instance_config_default_version_write_is_create_only(pool: sqlx::PgPool) {
    let store = Store::new(pool);

    let config = InstanceConfig::default();
    store.instance_config().replace(&config, 0).await.unwrap();

    let result = store.instance_config().replace(&config, 0).await;
    assert!(matches!(result, Err(StoreError::Conflict)));
}
