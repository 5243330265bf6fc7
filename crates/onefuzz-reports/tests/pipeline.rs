//! End-to-end ingestion tests: a blob-added payload flows through parse,
//! minimize, fingerprint and dedup against a real entity store.

use chrono::Utc;
use onefuzz_core::events::EventType;
use onefuzz_core::ids::{JobId, PoolId, TaskId};
use onefuzz_core::job::{Job, JobConfig, JobState};
use onefuzz_core::task::{PoolRef, Task, TaskConfig, TaskDetails, TaskState};
use onefuzz_runtime::store::Store;
use onefuzz_runtime::Config;

async fn seed_job_and_task(store: &Store, task_kind: &str) -> (JobId, TaskId) {
    let job = Job {
        job_id: JobId::new(),
        state: JobState::Enabled,
        config: JobConfig {
            project: "proj".into(),
            name: "fuzz-me".into(),
            build: "1".into(),
            duration: 24,
            logs: None,
        },
        user_info: None,
        created_at: Utc::now(),
        error: None,
    };
    store.jobs().insert(&job).await.unwrap();

    let pool = onefuzz_core::pool::Pool {
        pool_id: PoolId::new(),
        name: "pool-a".into(),
        os: onefuzz_core::pool::Os::Linux,
        arch: onefuzz_core::pool::Architecture::X86_64,
        managed: true,
        state: onefuzz_core::pool::PoolState::Running,
        created_at: Utc::now(),
    };
    let _ = store.pools().insert(&pool).await;

    let task = Task {
        task_id: TaskId::new(),
        job_id: job.job_id,
        state: TaskState::Running,
        os: onefuzz_core::pool::Os::Linux,
        config: TaskConfig {
            prereq_tasks: vec![],
            containers: vec![],
            pool: PoolRef {
                count: 1,
                name: "pool-a".into(),
            },
            task: TaskDetails {
                kind: task_kind.into(),
                duration: 1,
                target_exe: None,
                target_options: vec![],
            },
            colocate: false,
            target_count: None,
        },
        error: None,
        heartbeat: None,
        end_time: None,
        user_info: None,
        created_at: Utc::now(),
        running_on: None,
    };
    store.tasks().insert(&task).await.unwrap();

    (job.job_id, task.task_id)
}

fn payload(job_id: JobId, task_id: TaskId) -> serde_json::Value {
    serde_json::json!({
        "task_id": task_id,
        "job_id": job_id,
        "input_blob": "crashes/poc-1",
        "executable": "fuzz_target",
        "crash_type": "heap-buffer-overflow",
        "crash_site": "foo_bar+0x10",
        "call_stack": ["__asan_report_error+0x0", "foo_bar+0x10", "main+0x20"],
    })
}

async fn attach_teams_notification(store: &Store, container: &str) {
    store
        .notifications()
        .insert(&onefuzz_core::notification::Notification {
            notification_id: onefuzz_core::ids::NotificationId::new(),
            container: container.into(),
            config: onefuzz_core::notification::NotificationConfig::Teams(
                onefuzz_core::notification::TeamsTemplate {
                    webhook_url_ref: onefuzz_core::secret::SecretRef::new("teams-hook"),
                },
            ),
            replace_existing: false,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
}

#[sqlx::test(migrations = "../onefuzz-runtime/migrations")]
async fn duplicate_reports_fire_exactly_one_crash_reported(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    let config = Config::default();
    let (job_id, task_id) = seed_job_and_task(&store, "libfuzzer_fuzz").await;
    attach_teams_notification(&store, "crashes").await;

    let first = onefuzz_reports::ingest_report(&store, &config, "crashes", payload(job_id, task_id))
        .await
        .unwrap();
    assert!(first.is_new);
    assert_eq!(first.events.len(), 1);
    assert_eq!(first.events[0].event_type, EventType::CrashReported);
    assert_eq!(first.notifications.len(), 1);

    let second = onefuzz_reports::ingest_report(&store, &config, "crashes", payload(job_id, task_id))
        .await
        .unwrap();
    assert!(!second.is_new);
    assert!(second.events.is_empty(), "a duplicate fingerprint raises no event");
    assert_eq!(
        second.notifications.len(),
        1,
        "duplicates still reach the dispatcher so on_duplicate rules can run"
    );
}

#[sqlx::test(migrations = "../onefuzz-runtime/migrations")]
async fn duplicate_on_a_regression_task_reports_a_regression(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    let config = Config::default();
    let (job_id, task_id) = seed_job_and_task(&store, "libfuzzer_regression").await;

    onefuzz_reports::ingest_report(&store, &config, "crashes", payload(job_id, task_id))
        .await
        .unwrap();
    let second = onefuzz_reports::ingest_report(&store, &config, "crashes", payload(job_id, task_id))
        .await
        .unwrap();

    assert_eq!(second.events.len(), 1);
    assert_eq!(second.events[0].event_type, EventType::RegressionReported);
}

#[sqlx::test(migrations = "../onefuzz-runtime/migrations")]
async fn fingerprints_ignore_sanitizer_frames(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    let config = Config::default();
    let (job_id, task_id) = seed_job_and_task(&store, "libfuzzer_fuzz").await;

    let first = onefuzz_reports::ingest_report(&store, &config, "crashes", payload(job_id, task_id))
        .await
        .unwrap();

    // Same crash, different sanitizer entry frame: same fingerprint.
    let mut raw = payload(job_id, task_id);
    raw["call_stack"] = serde_json::json!(["__asan_memcpy+0x4", "foo_bar+0x10", "main+0x20"]);
    let second = onefuzz_reports::ingest_report(&store, &config, "crashes", raw).await.unwrap();

    assert_eq!(
        first.report.minimized_stack_sha256,
        second.report.minimized_stack_sha256
    );
    assert!(second.events.is_empty());
}

#[sqlx::test(migrations = "../onefuzz-runtime/migrations")]
async fn a_payload_with_no_task_attribution_is_rejected(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    let config = Config::default();

    let result = onefuzz_reports::ingest_report(
        &store,
        &config,
        "crashes",
        serde_json::json!({ "input_blob": "crashes/poc-2" }),
    )
    .await;

    assert!(matches!(result, Err(onefuzz_reports::IngestError::Unattributable(_))));
}
