//! Agent-protocol handler tests: a worker event arrives over
//! `POST /api/agent_events` and the entity store transitions accordingly.

use onefuzz_core::error::ErrorCode;
use onefuzz_core::job::JobState;
use onefuzz_core::node::NodeState;
use onefuzz_core::node_message::NodeCommand;
use onefuzz_core::node_task::NodeTaskState;
use onefuzz_core::task::TaskState;
use onefuzz_runtime::protocol::{self, ExitStatus, RegisterRequest, WorkerEvent};
use onefuzz_runtime::store::Store;

use crate::{seed_job, seed_node, seed_pool, seed_task, test_config};

fn success() -> ExitStatus {
    ExitStatus {
        code: Some(0),
        signal: Some(0),
        success: true,
    }
}

async fn send_done(
    store: &Store,
    machine_id: onefuzz_core::ids::MachineId,
    task_id: onefuzz_core::ids::TaskId,
    exit_status: ExitStatus,
    stdout: &str,
    stderr: &str,
) {
    protocol::worker_event(
        store,
        machine_id,
        WorkerEvent::Done {
            task_id,
            exit_status,
            stdout: stdout.into(),
            stderr: stderr.into(),
        },
        test_config().tail_truncate_bytes,
    )
    .await
    .unwrap();
}

#[sqlx::test]
async fn done_before_running_cancels_the_task(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    let p = seed_pool(&store, "pool-a").await;
    let node = seed_node(&store, &p, NodeState::Ready).await;
    let job = seed_job(&store, JobState::Enabled).await;
    let task = seed_task(&store, &job, "pool-a", TaskState::Scheduled).await;

    send_done(&store, node.machine_id, task.task_id, success(), "", "").await;

    let task = store.tasks().get(task.task_id).await.unwrap().unwrap();
    assert_eq!(task.value.state, TaskState::Stopping);
    assert_eq!(task.value.error.unwrap().code, ErrorCode::TaskCancelled);
}

#[sqlx::test]
async fn done_with_success_stops_the_task_cleanly(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    let p = seed_pool(&store, "pool-a").await;
    let node = seed_node(&store, &p, NodeState::Busy).await;
    let job = seed_job(&store, JobState::Enabled).await;
    let task = seed_task(&store, &job, "pool-a", TaskState::Running).await;

    send_done(&store, node.machine_id, task.task_id, success(), "", "").await;

    let task = store.tasks().get(task.task_id).await.unwrap().unwrap();
    assert_eq!(task.value.state, TaskState::Stopping);
    assert!(task.value.error.is_none());
    assert!(task.value.end_time.is_some());
}

#[sqlx::test]
async fn done_with_failure_records_the_stderr_tail(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    let p = seed_pool(&store, "pool-a").await;
    let node = seed_node(&store, &p, NodeState::Busy).await;
    let job = seed_job(&store, JobState::Enabled).await;
    let task = seed_task(&store, &job, "pool-a", TaskState::Running).await;

    let failed = ExitStatus {
        code: Some(1),
        signal: None,
        success: false,
    };
    send_done(&store, node.machine_id, task.task_id, failed, "", "boom").await;

    let task = store.tasks().get(task.task_id).await.unwrap().unwrap();
    assert_eq!(task.value.state, TaskState::Stopping);

    let error = task.value.error.unwrap();
    assert_eq!(error.code, ErrorCode::TaskFailed);
    assert_eq!(error.stderr_tail.as_deref(), Some("boom"));
}

#[sqlx::test]
async fn running_propagates_to_node_and_node_task(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    let p = seed_pool(&store, "pool-a").await;
    let node = seed_node(&store, &p, NodeState::Ready).await;
    let job = seed_job(&store, JobState::Enabled).await;
    let task = seed_task(&store, &job, "pool-a", TaskState::Scheduled).await;

    protocol::worker_event(
        &store,
        node.machine_id,
        WorkerEvent::Running { task_id: task.task_id },
        test_config().tail_truncate_bytes,
    )
    .await
    .unwrap();

    let stored = store.tasks().get(task.task_id).await.unwrap().unwrap();
    assert_eq!(stored.value.state, TaskState::Running);
    assert_eq!(stored.value.running_on, Some(node.machine_id));

    let stored = store.nodes().get(node.machine_id).await.unwrap().unwrap();
    assert_eq!(stored.value.state, NodeState::Busy);

    let node_tasks = store.node_tasks().search_by_machine(node.machine_id).await.unwrap();
    assert_eq!(node_tasks.len(), 1);
    assert_eq!(node_tasks[0].task_id, task.task_id);
    assert_eq!(node_tasks[0].state, NodeTaskState::Running);

    let events = store.task_events().search_by_task(task.task_id).await.unwrap();
    assert_eq!(events.len(), 1);
}

#[sqlx::test]
async fn done_frees_the_node_back_to_ready(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    let p = seed_pool(&store, "pool-a").await;
    let node = seed_node(&store, &p, NodeState::Ready).await;
    let job = seed_job(&store, JobState::Enabled).await;
    let task = seed_task(&store, &job, "pool-a", TaskState::Scheduled).await;

    protocol::worker_event(
        &store,
        node.machine_id,
        WorkerEvent::Running { task_id: task.task_id },
        test_config().tail_truncate_bytes,
    )
    .await
    .unwrap();
    send_done(&store, node.machine_id, task.task_id, success(), "", "").await;

    let stored = store.nodes().get(node.machine_id).await.unwrap().unwrap();
    assert_eq!(stored.value.state, NodeState::Ready);
    assert!(store.node_tasks().search_by_machine(node.machine_id).await.unwrap().is_empty());
}

#[sqlx::test]
async fn done_on_a_node_flagged_for_reimage_halts_it(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    let p = seed_pool(&store, "pool-a").await;
    let mut node = seed_node(&store, &p, NodeState::Ready).await;
    let job = seed_job(&store, JobState::Enabled).await;
    let task = seed_task(&store, &job, "pool-a", TaskState::Scheduled).await;

    protocol::worker_event(
        &store,
        node.machine_id,
        WorkerEvent::Running { task_id: task.task_id },
        test_config().tail_truncate_bytes,
    )
    .await
    .unwrap();

    let current = store.nodes().get(node.machine_id).await.unwrap().unwrap();
    node = current.value;
    node.reimage_requested = true;
    store.nodes().replace(&node, current.version).await.unwrap();

    send_done(&store, node.machine_id, task.task_id, success(), "", "").await;

    let stored = store.nodes().get(node.machine_id).await.unwrap().unwrap();
    assert_eq!(stored.value.state, NodeState::Halt);

    let pending = protocol::pending_command(&store, node.machine_id).await.unwrap();
    assert!(matches!(pending.unwrap().command, NodeCommand::Stop));
}

#[sqlx::test]
async fn registration_against_a_missing_pool_is_rejected(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    let machine_id = onefuzz_core::ids::MachineId::new();

    let result = protocol::register(
        &store,
        RegisterRequest {
            machine_id,
            pool_name: "no-such-pool".into(),
            scaleset_id: None,
            version: "1.0.0".into(),
        },
    )
    .await;

    assert_eq!(result.unwrap_err().code(), ErrorCode::InvalidRequest);
    assert!(store.nodes().get(machine_id).await.unwrap().is_none());
}

#[sqlx::test]
async fn registration_creates_a_node_and_returns_its_urls(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    let p = seed_pool(&store, "pool-a").await;
    let machine_id = onefuzz_core::ids::MachineId::new();

    let response = protocol::register(
        &store,
        RegisterRequest {
            machine_id,
            pool_name: p.name.clone(),
            scaleset_id: None,
            version: "1.0.0".into(),
        },
    )
    .await
    .unwrap();

    assert_eq!(response.node.state, NodeState::Init);
    assert!(response.work_queue_url.contains(&machine_id.to_string()));
    assert!(response.commands_url.contains(&machine_id.to_string()));
    assert!(response.events_url.contains(&machine_id.to_string()));

    // Replaying the registration replaces rather than duplicates.
    protocol::register(
        &store,
        RegisterRequest {
            machine_id,
            pool_name: p.name.clone(),
            scaleset_id: None,
            version: "1.0.1".into(),
        },
    )
    .await
    .unwrap();

    let node = store.nodes().get(machine_id).await.unwrap().unwrap();
    assert_eq!(node.value.version, "1.0.1");
}

#[sqlx::test]
async fn heartbeat_for_an_unknown_node_is_a_silent_noop(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    protocol::heartbeat(&store, onefuzz_core::ids::MachineId::new()).await.unwrap();
}

#[sqlx::test]
async fn first_heartbeat_moves_node_to_ready_and_task_to_setting_up(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    let p = seed_pool(&store, "pool-a").await;
    let node = seed_node(&store, &p, NodeState::Init).await;
    let job = seed_job(&store, JobState::Enabled).await;

    let mut task = seed_task(&store, &job, "pool-a", TaskState::Scheduled).await;
    let current = store.tasks().get(task.task_id).await.unwrap().unwrap();
    task = current.value;
    task.running_on = Some(node.machine_id);
    store.tasks().replace(&task, current.version).await.unwrap();

    protocol::heartbeat(&store, node.machine_id).await.unwrap();

    let stored = store.nodes().get(node.machine_id).await.unwrap().unwrap();
    assert_eq!(stored.value.state, NodeState::Ready);
    assert!(stored.value.heartbeat.is_some());

    let stored = store.tasks().get(task.task_id).await.unwrap().unwrap();
    assert_eq!(stored.value.state, TaskState::SettingUp);

    let node_tasks = store.node_tasks().search_by_machine(node.machine_id).await.unwrap();
    assert_eq!(node_tasks.len(), 1);
    assert_eq!(node_tasks[0].state, NodeTaskState::SettingUp);
}

#[sqlx::test]
async fn commands_are_delivered_in_fifo_order_with_ack(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    let p = seed_pool(&store, "pool-a").await;
    let node = seed_node(&store, &p, NodeState::Ready).await;

    protocol::add_ssh_key(&store, node.machine_id, "ssh-ed25519 AAAA...".into()).await.unwrap();
    store
        .node_messages()
        .enqueue(node.machine_id, &NodeCommand::Stop)
        .await
        .unwrap();

    let first = protocol::pending_command(&store, node.machine_id).await.unwrap().unwrap();
    assert!(matches!(first.command, NodeCommand::AddSshKey { .. }));

    // Without an ack the same message stays pending.
    let peeked = protocol::pending_command(&store, node.machine_id).await.unwrap().unwrap();
    assert_eq!(peeked.message_id, first.message_id);

    protocol::ack_command(&store, node.machine_id, first.message_id).await.unwrap();

    let second = protocol::pending_command(&store, node.machine_id).await.unwrap().unwrap();
    assert!(matches!(second.command, NodeCommand::Stop));
}

#[sqlx::test]
async fn worker_events_for_stopped_tasks_never_move_them_backwards(pool: sqlx::PgPool) {
    let store = Store::new(pool);
    let p = seed_pool(&store, "pool-a").await;
    let node = seed_node(&store, &p, NodeState::Ready).await;
    let job = seed_job(&store, JobState::Enabled).await;
    let task = seed_task(&store, &job, "pool-a", TaskState::Stopped).await;

    protocol::worker_event(
        &store,
        node.machine_id,
        WorkerEvent::Running { task_id: task.task_id },
        test_config().tail_truncate_bytes,
    )
    .await
    .unwrap();

    let stored = store.tasks().get(task.task_id).await.unwrap().unwrap();
    assert_eq!(stored.value.state, TaskState::Stopped);

    // The event is still appended to the log.
    let events = store.task_events().search_by_task(task.task_id).await.unwrap();
    assert_eq!(events.len(), 1);
}
