//! Integration tests for the scheduling core, run against a real postgres
//! database provisioned per-test by `#[sqlx::test]`.

use chrono::Utc;
use onefuzz_core::ids::{JobId, PoolId, TaskId};
use onefuzz_core::job::{Job, JobConfig, JobState};
use onefuzz_core::node::{Node, NodeState};
use onefuzz_core::pool::{Architecture, Os, Pool, PoolState};
use onefuzz_core::task::{ContainerRef, PoolRef, Task, TaskConfig, TaskDetails, TaskState};
use onefuzz_runtime::store::Store;
use onefuzz_runtime::Config;

mod lifecycle;
mod protocol;
mod schedule;
mod store;
mod worker;

pub fn test_config() -> Config {
    Config {
        node_assignment_grace: std::time::Duration::from_secs(60),
        heartbeat_timeout: std::time::Duration::from_secs(120),
        ..Config::default()
    }
}

pub async fn seed_pool(store: &Store, name: &str) -> Pool {
    let pool = Pool {
        pool_id: PoolId::new(),
        name: name.into(),
        os: Os::Linux,
        arch: Architecture::X86_64,
        managed: true,
        state: PoolState::Running,
        created_at: Utc::now(),
    };
    store.pools().insert(&pool).await.unwrap();
    pool
}

pub async fn seed_node(store: &Store, pool: &Pool, state: NodeState) -> Node {
    let node = Node {
        machine_id: onefuzz_core::ids::MachineId::new(),
        pool_name: pool.name.clone(),
        pool_id: pool.pool_id,
        scaleset_id: None,
        version: "1.0.0".into(),
        state,
        initialized_at: Some(Utc::now()),
        heartbeat: Some(Utc::now()),
        reimage_requested: false,
        delete_requested: false,
        debug_keep_node: false,
    };
    store.nodes().insert(&node).await.unwrap();
    node
}

pub async fn seed_job(store: &Store, state: JobState) -> Job {
    let job = Job {
        job_id: JobId::new(),
        state,
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
    job
}

pub fn task_config(pool_name: &str) -> TaskConfig {
    TaskConfig {
        prereq_tasks: vec![],
        containers: vec![ContainerRef {
            name: "crashes".into(),
            kind: "crashes".into(),
        }],
        pool: PoolRef {
            count: 1,
            name: pool_name.into(),
        },
        task: TaskDetails {
            kind: "libfuzzer_fuzz".into(),
            duration: 1,
            target_exe: None,
            target_options: vec![],
        },
        colocate: false,
        target_count: None,
    }
}

pub async fn seed_task(store: &Store, job: &Job, pool_name: &str, state: TaskState) -> Task {
    let task = Task {
        task_id: TaskId::new(),
        job_id: job.job_id,
        state,
        os: Os::Linux,
        config: task_config(pool_name),
        error: None,
        heartbeat: None,
        end_time: None,
        user_info: None,
        created_at: Utc::now(),
        running_on: None,
    };
    store.tasks().insert(&task).await.unwrap();
    task
}
