//! Scheduler tick tests: matching `waiting` tasks against `ready` nodes,
//! prerequisite ordering and colocation bundling.

use onefuzz_core::error::ErrorCode;
use onefuzz_core::events::EventType;
use onefuzz_core::job::JobState;
use onefuzz_core::node::NodeState;
use onefuzz_core::task::{TaskError, TaskState};
use onefuzz_runtime::schedule::scheduler_tick;
use onefuzz_runtime::store::Store;

use crate::{seed_job, seed_node, seed_pool, seed_task, test_config};

#[sqlx::test]
async fn waiting_task_is_assigned_to_a_ready_node(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    let p = seed_pool(&store, "pool-a").await;
    let node = seed_node(&store, &p, NodeState::Ready).await;
    let job = seed_job(&store, JobState::Enabled).await;
    let task = seed_task(&store, &job, "pool-a", TaskState::Waiting).await;

    let events = scheduler_tick(&store, &test_config()).await.unwrap();

    let stored = store.tasks().get(task.task_id).await.unwrap().unwrap();
    assert_eq!(stored.value.state, TaskState::Scheduled);

    let node_tasks = store.node_tasks().search_by_machine(node.machine_id).await.unwrap();
    assert_eq!(node_tasks.len(), 1);

    assert!(events.iter().any(|e| e.event_type == EventType::TaskScheduled));
}

#[sqlx::test]
async fn nothing_is_scheduled_without_a_ready_node(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    seed_pool(&store, "pool-a").await;
    let job = seed_job(&store, JobState::Enabled).await;
    let task = seed_task(&store, &job, "pool-a", TaskState::Waiting).await;

    let events = scheduler_tick(&store, &test_config()).await.unwrap();

    let stored = store.tasks().get(task.task_id).await.unwrap().unwrap();
    assert_eq!(stored.value.state, TaskState::Waiting);
    assert!(events.is_empty());
}

#[sqlx::test]
async fn one_node_is_never_claimed_by_two_tasks_in_a_tick(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    let p = seed_pool(&store, "pool-a").await;
    seed_node(&store, &p, NodeState::Ready).await;
    let job = seed_job(&store, JobState::Enabled).await;
    let a = seed_task(&store, &job, "pool-a", TaskState::Waiting).await;
    let b = seed_task(&store, &job, "pool-a", TaskState::Waiting).await;

    scheduler_tick(&store, &test_config()).await.unwrap();

    let a = store.tasks().get(a.task_id).await.unwrap().unwrap().value.state;
    let b = store.tasks().get(b.task_id).await.unwrap().unwrap().value.state;

    let scheduled = [a, b].iter().filter(|s| **s == TaskState::Scheduled).count();
    assert_eq!(scheduled, 1, "exactly one of the two tasks may claim the node");
}

#[sqlx::test]
async fn task_with_an_unstopped_prerequisite_stays_waiting(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    let p = seed_pool(&store, "pool-a").await;
    seed_node(&store, &p, NodeState::Ready).await;
    let job = seed_job(&store, JobState::Enabled).await;
    let prereq = seed_task(&store, &job, "pool-a", TaskState::Running).await;

    let mut dependent = seed_task(&store, &job, "pool-a", TaskState::Waiting).await;
    let current = store.tasks().get(dependent.task_id).await.unwrap().unwrap();
    dependent = current.value;
    dependent.config.prereq_tasks = vec![prereq.task_id];
    store.tasks().replace(&dependent, current.version).await.unwrap();

    scheduler_tick(&store, &test_config()).await.unwrap();

    let stored = store.tasks().get(dependent.task_id).await.unwrap().unwrap();
    assert_eq!(stored.value.state, TaskState::Waiting);
}

#[sqlx::test]
async fn failed_prerequisite_cascades_to_the_dependent_task(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    let p = seed_pool(&store, "pool-a").await;
    seed_node(&store, &p, NodeState::Ready).await;
    let job = seed_job(&store, JobState::Enabled).await;

    let mut prereq = seed_task(&store, &job, "pool-a", TaskState::Stopped).await;
    let current = store.tasks().get(prereq.task_id).await.unwrap().unwrap();
    prereq = current.value;
    prereq.error = Some(TaskError {
        code: ErrorCode::TaskFailed,
        message: "fuzzer crashed on startup".into(),
        stderr_tail: None,
        stdout_tail: None,
    });
    store.tasks().replace(&prereq, current.version).await.unwrap();

    let mut dependent = seed_task(&store, &job, "pool-a", TaskState::Waiting).await;
    let current = store.tasks().get(dependent.task_id).await.unwrap().unwrap();
    dependent = current.value;
    dependent.config.prereq_tasks = vec![prereq.task_id];
    store.tasks().replace(&dependent, current.version).await.unwrap();

    let events = scheduler_tick(&store, &test_config()).await.unwrap();

    let stored = store.tasks().get(dependent.task_id).await.unwrap().unwrap();
    assert_eq!(stored.value.state, TaskState::Stopping);
    assert_eq!(stored.value.error.unwrap().code, ErrorCode::TaskFailed);
    assert!(events.iter().any(|e| e.event_type == EventType::TaskFailed));
}

#[sqlx::test]
async fn colocated_siblings_land_on_the_same_node(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    let p = seed_pool(&store, "pool-a").await;
    let node = seed_node(&store, &p, NodeState::Ready).await;
    let job = seed_job(&store, JobState::Enabled).await;

    for _ in 0..2 {
        let mut task = seed_task(&store, &job, "pool-a", TaskState::Waiting).await;
        let current = store.tasks().get(task.task_id).await.unwrap().unwrap();
        task = current.value;
        task.config.colocate = true;
        store.tasks().replace(&task, current.version).await.unwrap();
    }

    scheduler_tick(&store, &test_config()).await.unwrap();

    let node_tasks = store.node_tasks().search_by_machine(node.machine_id).await.unwrap();
    assert_eq!(node_tasks.len(), 2, "both colocated tasks bundle onto the one node");

    for task in store.tasks().search_by_job(job.job_id).await.unwrap() {
        assert_eq!(task.value.state, TaskState::Scheduled);
        assert_eq!(task.value.running_on, Some(node.machine_id));
    }
}

#[sqlx::test]
async fn a_task_never_lands_on_a_pool_for_the_wrong_platform(pool: sqlx::PgPool) {
    let store = Store::new(pool);

    let windows_pool = onefuzz_core::pool::Pool {
        pool_id: onefuzz_core::ids::PoolId::new(),
        name: "win-pool".into(),
        os: onefuzz_core::pool::Os::Windows,
        arch: onefuzz_core::pool::Architecture::X86_64,
        managed: true,
        state: onefuzz_core::pool::PoolState::Running,
        created_at: chrono::Utc::now(),
    };
    store.pools().insert(&windows_pool).await.unwrap();

    let node = crate::seed_node(&store, &windows_pool, NodeState::Ready).await;
    let job = seed_job(&store, JobState::Enabled).await;
    // The seeded task is a linux task naming the windows pool.
    let task = seed_task(&store, &job, "win-pool", TaskState::Waiting).await;

    scheduler_tick(&store, &test_config()).await.unwrap();

    let stored = store.tasks().get(task.task_id).await.unwrap().unwrap();
    assert_eq!(stored.value.state, TaskState::Waiting);
    assert!(store.node_tasks().search_by_machine(node.machine_id).await.unwrap().is_empty());
}

#[sqlx::test]
async fn pools_not_running_accept_no_work(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    let p = seed_pool(&store, "pool-a").await;
    seed_node(&store, &p, NodeState::Ready).await;
    let job = seed_job(&store, JobState::Enabled).await;
    let task = seed_task(&store, &job, "pool-a", TaskState::Waiting).await;

    let current = store.pools().get(p.pool_id).await.unwrap().unwrap();
    let mut shutdown = current.value;
    shutdown.state = onefuzz_core::pool::PoolState::Shutdown;
    store.pools().replace(&shutdown, current.version).await.unwrap();

    scheduler_tick(&store, &test_config()).await.unwrap();

    let stored = store.tasks().get(task.task_id).await.unwrap().unwrap();
    assert_eq!(stored.value.state, TaskState::Waiting);
}
