//! Worker control-loop tests: startup, leader tick, clean shutdown.

use std::sync::Arc;
use std::time::Duration;

use onefuzz_runtime::sim::RecordingScheduler;
use onefuzz_runtime::WorkerBuilder;

use crate::test_config;

#[sqlx::test]
async fn worker_shuts_down_promptly_when_asked(pool: sqlx::PgPool) -> anyhow::Result<()> {
    let mut worker = WorkerBuilder::new(pool.clone())
        .config(test_config())
        .validate_database(false)
        .build()
        .await?;
    let handle = worker.handle();

    let run = tokio::spawn(async move { worker.run().await });

    tokio::time::sleep(Duration::from_secs(1)).await;
    handle.shutdown();

    match tokio::time::timeout(Duration::from_secs(5), run).await {
        Ok(result) => result??,
        Err(_) => panic!("worker did not shut down within 5s"),
    }

    let workers: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM onefuzz.worker")
        .fetch_one(&pool)
        .await?;
    assert_eq!(workers, 0, "the worker row is removed on clean shutdown");

    Ok(())
}

#[sqlx::test]
async fn a_lone_worker_elects_itself_leader_and_ticks(pool: sqlx::PgPool) -> anyhow::Result<()> {
    let scheduler = Arc::new(RecordingScheduler::new());
    let mut worker = WorkerBuilder::new(pool)
        .config(test_config())
        .validate_database(false)
        .scheduler(scheduler.clone())
        .build()
        .await?;
    let handle = worker.handle();

    let run = tokio::spawn(async move { worker.run().await });

    tokio::time::sleep(Duration::from_secs(2)).await;
    handle.shutdown();
    tokio::time::timeout(Duration::from_secs(5), run).await???;

    let acquires = scheduler.acquires();
    assert!(
        acquires
            .iter()
            .any(|c| matches!(c, onefuzz_runtime::sim::Component::SchedulerTick { .. })),
        "the leader loop ran at least one scheduler tick"
    );

    Ok(())
}
