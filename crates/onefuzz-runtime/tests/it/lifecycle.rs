//! Timer-driven sweep tests: job staleness and auto-stop, node liveness,
//! scaleset drain, pool drain, the autoscaler and the retention sweep.

use chrono::Utc;
use onefuzz_core::error::ErrorCode;
use onefuzz_core::events::EventType;
use onefuzz_core::job::JobState;
use onefuzz_core::node::NodeState;
use onefuzz_core::node_message::NodeCommand;
use onefuzz_core::scaleset::{Scaleset, ScalesetState};
use onefuzz_core::task::TaskState;
use onefuzz_runtime::lifecycle;
use onefuzz_runtime::store::Store;

use crate::{seed_job, seed_node, seed_pool, seed_task, test_config};

async fn age_job(store: &Store, job_id: onefuzz_core::ids::JobId, days: i64) {
    sqlx::query("UPDATE onefuzz.job SET created_at = $1 WHERE job_id = $2")
        .bind(Utc::now() - chrono::Duration::days(days))
        .bind(job_id.as_uuid())
        .execute(store.pool())
        .await
        .unwrap();
}

async fn age_task(store: &Store, task_id: onefuzz_core::ids::TaskId, seconds: i64) {
    sqlx::query("UPDATE onefuzz.task SET created_at = $1 WHERE task_id = $2")
        .bind(Utc::now() - chrono::Duration::seconds(seconds))
        .bind(task_id.as_uuid())
        .execute(store.pool())
        .await
        .unwrap();
}

async fn age_node_heartbeat(store: &Store, machine_id: onefuzz_core::ids::MachineId, seconds: i64) {
    sqlx::query("UPDATE onefuzz.node SET heartbeat = $1 WHERE machine_id = $2")
        .bind(Utc::now() - chrono::Duration::seconds(seconds))
        .bind(machine_id.as_uuid())
        .execute(store.pool())
        .await
        .unwrap();
}

async fn seed_scaleset(store: &Store, pool_name: &str, state: ScalesetState, size: u32, max_size: u32) -> Scaleset {
    let scaleset = Scaleset {
        scaleset_id: onefuzz_core::ids::ScalesetId::new(),
        pool_name: pool_name.into(),
        state,
        vm_sku: "Standard_D2s_v3".into(),
        image: "Canonical:UbuntuServer:20.04-LTS:latest".into(),
        region: "eastus".into(),
        size,
        min_size: 0,
        max_size,
        spot: false,
        ephemeral_os: false,
        needs_config_update: false,
        tags: Default::default(),
        auth: None,
        client_id: None,
        nodes: Vec::new(),
        error: None,
        created_at: Utc::now(),
    };
    store.scalesets().insert(&scaleset).await.unwrap();
    scaleset
}

#[sqlx::test]
async fn stale_init_job_is_auto_stopped(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    let job = seed_job(&store, JobState::Init).await;
    age_job(&store, job.job_id, 31).await;

    let events = lifecycle::job_tick(&store).await.unwrap();

    let stored = store.jobs().get(job.job_id).await.unwrap().unwrap();
    assert_eq!(stored.value.state, JobState::Stopped);
    assert!(events.iter().any(|e| e.event_type == EventType::JobStopped));
}

#[sqlx::test]
async fn stopping_job_with_only_stopped_tasks_finishes(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    let p = seed_pool(&store, "pool-a").await;
    let _ = p;
    let job = seed_job(&store, JobState::Stopping).await;
    seed_task(&store, &job, "pool-a", TaskState::Stopped).await;

    lifecycle::job_tick(&store).await.unwrap();

    let stored = store.jobs().get(job.job_id).await.unwrap().unwrap();
    assert_eq!(stored.value.state, JobState::Stopped);
}

#[sqlx::test]
async fn stopping_job_with_a_live_task_keeps_waiting(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    seed_pool(&store, "pool-a").await;
    let job = seed_job(&store, JobState::Stopping).await;
    seed_task(&store, &job, "pool-a", TaskState::Running).await;

    lifecycle::job_tick(&store).await.unwrap();

    let stored = store.jobs().get(job.job_id).await.unwrap().unwrap();
    assert_eq!(stored.value.state, JobState::Stopping);
}

#[sqlx::test]
async fn stopping_task_with_no_node_work_left_finishes(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    seed_pool(&store, "pool-a").await;
    let job = seed_job(&store, JobState::Enabled).await;
    let task = seed_task(&store, &job, "pool-a", TaskState::Stopping).await;

    let events = lifecycle::task_stop_tick(&store).await.unwrap();

    let stored = store.tasks().get(task.task_id).await.unwrap().unwrap();
    assert_eq!(stored.value.state, TaskState::Stopped);
    assert!(events.iter().any(|e| e.event_type == EventType::TaskStopped));
}

#[sqlx::test]
async fn stopping_task_still_on_a_node_is_asked_to_stop_once(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    let p = seed_pool(&store, "pool-a").await;
    let node = seed_node(&store, &p, NodeState::Busy).await;
    let job = seed_job(&store, JobState::Enabled).await;
    let task = seed_task(&store, &job, "pool-a", TaskState::Stopping).await;

    store
        .node_tasks()
        .put(&onefuzz_core::node_task::NodeTask {
            machine_id: node.machine_id,
            task_id: task.task_id,
            state: onefuzz_core::node_task::NodeTaskState::Running,
        })
        .await
        .unwrap();

    lifecycle::task_stop_tick(&store).await.unwrap();
    lifecycle::task_stop_tick(&store).await.unwrap();

    // The task waits for the node to free it, and the stop request is not
    // duplicated across ticks.
    let stored = store.tasks().get(task.task_id).await.unwrap().unwrap();
    assert_eq!(stored.value.state, TaskState::Stopping);

    let queued = store.node_messages().peek(node.machine_id, 100).await.unwrap();
    let stop_tasks = queued
        .iter()
        .filter(|m| matches!(m.command, NodeCommand::StopTask { .. }))
        .count();
    assert_eq!(stop_tasks, 1);
}

#[sqlx::test]
async fn stopping_job_cascades_to_its_tasks(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    seed_pool(&store, "pool-a").await;
    let job = seed_job(&store, JobState::Stopping).await;
    let task = seed_task(&store, &job, "pool-a", TaskState::Waiting).await;

    // First tick cascades the stop and, with no node work to wait for,
    // finishes the task; the job then stops on its own tick.
    lifecycle::task_stop_tick(&store).await.unwrap();
    lifecycle::job_tick(&store).await.unwrap();

    let stored = store.tasks().get(task.task_id).await.unwrap().unwrap();
    assert_eq!(stored.value.state, TaskState::Stopped);

    let stored = store.jobs().get(job.job_id).await.unwrap().unwrap();
    assert_eq!(stored.value.state, JobState::Stopped);
}

#[sqlx::test]
async fn scheduled_task_whose_node_never_arrived_is_cancelled(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    seed_pool(&store, "pool-a").await;
    let job = seed_job(&store, JobState::Enabled).await;
    let task = seed_task(&store, &job, "pool-a", TaskState::Scheduled).await;
    age_task(&store, task.task_id, 3600).await;

    let events = lifecycle::task_assignment_sweep(&store, &test_config()).await.unwrap();

    let stored = store.tasks().get(task.task_id).await.unwrap().unwrap();
    assert_eq!(stored.value.state, TaskState::Stopping);
    assert_eq!(stored.value.error.unwrap().code, ErrorCode::TaskCancelled);
    assert!(events.iter().any(|e| e.event_type == EventType::TaskFailed));
}

#[sqlx::test]
async fn freshly_scheduled_task_is_left_alone(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    seed_pool(&store, "pool-a").await;
    let job = seed_job(&store, JobState::Enabled).await;
    let task = seed_task(&store, &job, "pool-a", TaskState::Scheduled).await;

    lifecycle::task_assignment_sweep(&store, &test_config()).await.unwrap();

    let stored = store.tasks().get(task.task_id).await.unwrap().unwrap();
    assert_eq!(stored.value.state, TaskState::Scheduled);
}

#[sqlx::test]
async fn lapsed_heartbeat_first_asks_the_node_to_stop(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    let p = seed_pool(&store, "pool-a").await;
    let node = seed_node(&store, &p, NodeState::Ready).await;
    age_node_heartbeat(&store, node.machine_id, 180).await;

    lifecycle::node_liveness_sweep(&store, &test_config()).await.unwrap();

    let stored = store.nodes().get(node.machine_id).await.unwrap().unwrap();
    assert!(stored.value.reimage_requested);
    assert_ne!(stored.value.state, NodeState::Halt);

    let pending = store.node_messages().peek(node.machine_id, 1).await.unwrap();
    assert!(matches!(pending[0].command, NodeCommand::Stop));
}

#[sqlx::test]
async fn unresponsive_node_is_force_halted_and_its_work_cancelled(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    let p = seed_pool(&store, "pool-a").await;
    let node = seed_node(&store, &p, NodeState::Busy).await;
    let job = seed_job(&store, JobState::Enabled).await;

    let mut task = seed_task(&store, &job, "pool-a", TaskState::Running).await;
    let current = store.tasks().get(task.task_id).await.unwrap().unwrap();
    task = current.value;
    task.running_on = Some(node.machine_id);
    store.tasks().replace(&task, current.version).await.unwrap();

    store
        .node_tasks()
        .put(&onefuzz_core::node_task::NodeTask {
            machine_id: node.machine_id,
            task_id: task.task_id,
            state: onefuzz_core::node_task::NodeTaskState::Running,
        })
        .await
        .unwrap();

    // Past heartbeat_timeout * force_reimage_multiplier.
    age_node_heartbeat(&store, node.machine_id, 600).await;

    let events = lifecycle::node_liveness_sweep(&store, &test_config()).await.unwrap();

    let stored = store.nodes().get(node.machine_id).await.unwrap().unwrap();
    assert_eq!(stored.value.state, NodeState::Halt);

    let stored = store.tasks().get(task.task_id).await.unwrap().unwrap();
    assert_eq!(stored.value.state, TaskState::Stopping);
    assert_eq!(stored.value.error.unwrap().code, ErrorCode::TaskCancelled);

    assert!(store.node_tasks().search_by_machine(node.machine_id).await.unwrap().is_empty());
    assert!(events.iter().any(|e| e.event_type == EventType::NodeStateUpdated));
}

#[sqlx::test]
async fn force_halt_leaves_finished_tasks_untouched(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    let p = seed_pool(&store, "pool-a").await;
    let node = seed_node(&store, &p, NodeState::Busy).await;
    let job = seed_job(&store, JobState::Enabled).await;

    // A task that already completed on this machine, still carrying its
    // node binding.
    let mut task = seed_task(&store, &job, "pool-a", TaskState::Stopped).await;
    let current = store.tasks().get(task.task_id).await.unwrap().unwrap();
    task = current.value;
    task.running_on = Some(node.machine_id);
    store.tasks().replace(&task, current.version).await.unwrap();

    age_node_heartbeat(&store, node.machine_id, 600).await;

    let events = lifecycle::node_liveness_sweep(&store, &test_config()).await.unwrap();

    let stored = store.tasks().get(task.task_id).await.unwrap().unwrap();
    assert_eq!(stored.value.state, TaskState::Stopped);
    assert!(stored.value.error.is_none());

    let stored = store.nodes().get(node.machine_id).await.unwrap().unwrap();
    assert_eq!(stored.value.state, NodeState::Halt);
    assert!(!events.iter().any(|e| e.event_type == EventType::TaskFailed));
}

#[sqlx::test]
async fn a_stopped_task_releases_its_node_binding(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    let p = seed_pool(&store, "pool-a").await;
    let node = seed_node(&store, &p, NodeState::Ready).await;
    let job = seed_job(&store, JobState::Enabled).await;

    let mut task = seed_task(&store, &job, "pool-a", TaskState::Stopping).await;
    let current = store.tasks().get(task.task_id).await.unwrap().unwrap();
    task = current.value;
    task.running_on = Some(node.machine_id);
    store.tasks().replace(&task, current.version).await.unwrap();

    lifecycle::task_stop_tick(&store).await.unwrap();

    let stored = store.tasks().get(task.task_id).await.unwrap().unwrap();
    assert_eq!(stored.value.state, TaskState::Stopped);
    assert!(stored.value.running_on.is_none());
}

#[sqlx::test]
async fn drained_shutdown_scaleset_halts(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    seed_pool(&store, "pool-a").await;
    let scaleset = seed_scaleset(&store, "pool-a", ScalesetState::Shutdown, 0, 10).await;

    let events = lifecycle::scaleset_drain_tick(&store).await.unwrap();

    let stored = store.scalesets().get(scaleset.scaleset_id).await.unwrap().unwrap();
    assert_eq!(stored.value.state, ScalesetState::Halt);
    assert!(events.iter().any(|e| e.event_type == EventType::ScalesetStateUpdated));
}

#[sqlx::test]
async fn shutdown_scaleset_with_nodes_keeps_draining(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    let p = seed_pool(&store, "pool-a").await;
    let scaleset = seed_scaleset(&store, "pool-a", ScalesetState::Shutdown, 1, 10).await;

    let mut node = seed_node(&store, &p, NodeState::Busy).await;
    let current = store.nodes().get(node.machine_id).await.unwrap().unwrap();
    node = current.value;
    node.scaleset_id = Some(scaleset.scaleset_id);
    store.nodes().replace(&node, current.version).await.unwrap();

    lifecycle::scaleset_drain_tick(&store).await.unwrap();

    let stored = store.scalesets().get(scaleset.scaleset_id).await.unwrap().unwrap();
    assert_eq!(stored.value.state, ScalesetState::Shutdown);
}

#[sqlx::test]
async fn drained_shutdown_pool_is_deleted(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    let p = seed_pool(&store, "pool-a").await;

    let current = store.pools().get(p.pool_id).await.unwrap().unwrap();
    let mut shutdown = current.value;
    shutdown.state = onefuzz_core::pool::PoolState::Shutdown;
    store.pools().replace(&shutdown, current.version).await.unwrap();

    lifecycle::pool_drain_tick(&store).await.unwrap();

    assert!(store.pools().get(p.pool_id).await.unwrap().is_none());
}

#[sqlx::test]
async fn shutdown_pool_with_an_active_task_is_kept(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    let p = seed_pool(&store, "pool-a").await;
    let job = seed_job(&store, JobState::Enabled).await;
    seed_task(&store, &job, "pool-a", TaskState::Running).await;

    let current = store.pools().get(p.pool_id).await.unwrap().unwrap();
    let mut shutdown = current.value;
    shutdown.state = onefuzz_core::pool::PoolState::Shutdown;
    store.pools().replace(&shutdown, current.version).await.unwrap();

    lifecycle::pool_drain_tick(&store).await.unwrap();

    assert!(store.pools().get(p.pool_id).await.unwrap().is_some());
}

#[sqlx::test]
async fn autoscaler_sizes_a_scaleset_to_demand(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    seed_pool(&store, "pool-a").await;
    let scaleset = seed_scaleset(&store, "pool-a", ScalesetState::Running, 0, 10).await;

    let job = seed_job(&store, JobState::Enabled).await;
    for _ in 0..3 {
        seed_task(&store, &job, "pool-a", TaskState::Waiting).await;
    }

    let events = onefuzz_runtime::autoscale::autoscaler_tick(&store, &test_config()).await.unwrap();

    let stored = store.scalesets().get(scaleset.scaleset_id).await.unwrap().unwrap();
    assert_eq!(stored.value.size, 3);
    assert_eq!(stored.value.state, ScalesetState::Resize);
    assert!(events.iter().any(|e| e.event_type == EventType::ScalesetResizeScheduled));
}

#[sqlx::test]
async fn autoscaler_clamps_demand_to_max_size(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    seed_pool(&store, "pool-a").await;
    let scaleset = seed_scaleset(&store, "pool-a", ScalesetState::Running, 0, 2).await;

    let job = seed_job(&store, JobState::Enabled).await;
    for _ in 0..5 {
        seed_task(&store, &job, "pool-a", TaskState::Waiting).await;
    }

    onefuzz_runtime::autoscale::autoscaler_tick(&store, &test_config()).await.unwrap();

    let stored = store.scalesets().get(scaleset.scaleset_id).await.unwrap().unwrap();
    assert_eq!(stored.value.size, 2);
}

#[sqlx::test]
async fn shutdown_scaleset_never_scales_out(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    seed_pool(&store, "pool-a").await;
    let scaleset = seed_scaleset(&store, "pool-a", ScalesetState::Shutdown, 1, 10).await;

    let job = seed_job(&store, JobState::Enabled).await;
    seed_task(&store, &job, "pool-a", TaskState::Waiting).await;

    lifecycle::scaleset_drain_tick(&store).await.unwrap();
    onefuzz_runtime::autoscale::autoscaler_tick(&store, &test_config()).await.unwrap();

    let stored = store.scalesets().get(scaleset.scaleset_id).await.unwrap().unwrap();
    assert_eq!(stored.value.size, 1);
}

async fn seed_repro(store: &Store, state: onefuzz_core::repro::ReproState, end_time: Option<chrono::DateTime<Utc>>) -> onefuzz_core::repro::Repro {
    seed_pool(store, "repro-pool").await;
    let job = seed_job(store, JobState::Enabled).await;
    let task = seed_task(store, &job, "repro-pool", TaskState::Running).await;

    let repro = onefuzz_core::repro::Repro {
        vm_id: onefuzz_core::ids::ReproId::new(),
        task_id: task.task_id,
        state,
        os: onefuzz_core::pool::Os::Linux,
        config: onefuzz_core::repro::ReproConfig {
            container: "crashes".into(),
            path: "poc-1".into(),
            duration: 1,
        },
        auth: None,
        ip: None,
        end_time,
        user_info: None,
        error: None,
    };
    store.repros().insert(&repro).await.unwrap();
    repro
}

#[sqlx::test]
async fn new_repro_requests_its_extensions(pool: sqlx::PgPool) {
    use onefuzz_core::repro::ReproState;

    let store = Store::new(pool);
    let repro = seed_repro(&store, ReproState::Init, Some(Utc::now() + chrono::Duration::hours(1))).await;

    lifecycle::repro_tick(&store).await.unwrap();

    let stored = store.repros().get(repro.vm_id).await.unwrap().unwrap();
    assert_eq!(stored.value.state, ReproState::ExtensionsLaunch);
}

#[sqlx::test]
async fn running_repro_past_its_duration_is_stopped(pool: sqlx::PgPool) {
    use onefuzz_core::repro::ReproState;

    let store = Store::new(pool);
    let repro = seed_repro(&store, ReproState::Running, Some(Utc::now() - chrono::Duration::hours(1))).await;

    // First tick requests the stop, the second observes no VM left and
    // finishes.
    lifecycle::repro_tick(&store).await.unwrap();
    lifecycle::repro_tick(&store).await.unwrap();

    let stored = store.repros().get(repro.vm_id).await.unwrap().unwrap();
    assert_eq!(stored.value.state, ReproState::Stopped);
}

#[sqlx::test]
async fn retention_sweep_purges_only_expired_tags(pool: sqlx::PgPool) {
    let store = Store::new(pool);

    store
        .containers()
        .insert(&onefuzz_core::container::Container {
            name: "crashes".into(),
            storage_account: "onefuzz".into(),
            metadata: Default::default(),
        })
        .await
        .unwrap();

    store
        .containers()
        .tag_for_retention(&onefuzz_core::container::RetentionTag {
            container: "crashes".into(),
            blob: "old-input".into(),
            expires_at: Utc::now() - chrono::Duration::days(1),
        })
        .await
        .unwrap();
    store
        .containers()
        .tag_for_retention(&onefuzz_core::container::RetentionTag {
            container: "crashes".into(),
            blob: "fresh-input".into(),
            expires_at: Utc::now() + chrono::Duration::days(1),
        })
        .await
        .unwrap();

    lifecycle::retention_sweep(&store).await.unwrap();

    let remaining = store.containers().purge_expired_tags(Utc::now() + chrono::Duration::days(2)).await.unwrap();
    assert_eq!(remaining, 1, "only the fresh tag survived the sweep");
}
