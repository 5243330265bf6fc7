//! The scheduler.
//!
//! One tick matches `waiting` tasks against `ready` nodes. Ticks run
//! leader-only, jittered by [`crate::config::Config::scheduler_jitter`].
//! A tick never blocks on another tick: every assignment is an
//! independent `get -> mutate -> replace(version)` cycle, so a conflict on
//! one task or node only costs that one assignment a retry, not the batch.

use std::collections::{HashMap, HashSet};

use onefuzz_core::events::EventType;
use onefuzz_core::ids::MachineId;
use onefuzz_core::node::{Node, NodeState};
use onefuzz_core::node_task::{NodeTask, NodeTaskState};
use onefuzz_core::task::{ColocationKey, Task, TaskError, TaskState};

use crate::config::Config;
use crate::error::StoreError;
use crate::store::{retry_on_conflict, Store};

const RETRY_ATTEMPTS: u32 = 5;

/// A webhook-worthy event raised by a tick, left for the caller to stamp with
/// an `event_id`/`instance_id` and fan out.
pub struct ScheduledEvent {
    pub event_type: EventType,
    pub payload: serde_json::Value,
}

/// Runs one scheduling pass and returns the events it raised.
pub async fn scheduler_tick(store: &Store, config: &Config) -> Result<Vec<ScheduledEvent>, StoreError> {
    let mut events = Vec::new();
    let mut claimed: HashSet<MachineId> = HashSet::new();

    let waiting = store.tasks().search_waiting().await?;
    let (groups, singles) = partition_colocated(waiting);

    for group in groups {
        schedule_group(store, config, group, &mut claimed, &mut events).await?;
    }
    for task in singles {
        schedule_one(store, config, task, &mut claimed, &mut events).await?;
    }

    Ok(events)
}

/// Splits waiting tasks into colocation groups (same job, same
/// [`ColocationKey`], `colocate = true`) and everything else, which is
/// scheduled independently.
fn partition_colocated(waiting: Vec<crate::store::Versioned<Task>>) -> (Vec<Vec<crate::store::Versioned<Task>>>, Vec<crate::store::Versioned<Task>>) {
    let mut groups: HashMap<(onefuzz_core::ids::JobId, String, ColocationKey), Vec<crate::store::Versioned<Task>>> =
        HashMap::new();
    let mut singles = Vec::new();

    for task in waiting {
        if task.value.config.colocate {
            let key = (
                task.value.job_id,
                task.value.config.pool.name.to_string(),
                ColocationKey {
                    os: Some(task.value.os),
                    pool: Some(task.value.config.pool.name.to_string()),
                },
            );
            groups.entry(key).or_default().push(task);
        } else {
            singles.push(task);
        }
    }

    (groups.into_values().collect(), singles)
}

async fn schedule_one(
    store: &Store,
    config: &Config,
    task: crate::store::Versioned<Task>,
    claimed: &mut HashSet<MachineId>,
    events: &mut Vec<ScheduledEvent>,
) -> Result<(), StoreError> {
    if let Some(failure) = prerequisite_failure(store, &task.value).await? {
        fail_task(store, task, failure, events).await?;
        return Ok(());
    }
    if !prerequisites_satisfied(store, &task.value).await? {
        return Ok(());
    }

    if oversized(config, &task.value) {
        fail_task(
            store,
            task,
            TaskError {
                code: onefuzz_core::error::ErrorCode::TaskFailed,
                message: "work-set message exceeds the configured size limit".into(),
                stderr_tail: None,
                stdout_tail: None,
            },
            events,
        )
        .await?;
        return Ok(());
    }

    let Some(pool) = store.pools().get_by_name(&task.value.config.pool.name).await? else {
        return Ok(());
    };
    if !pool.value.accepts_task(task.value.os) {
        return Ok(());
    }

    let candidates = store.nodes().search_ready_in_pool(&pool.value.name).await?;
    let Some(node) = candidates.into_iter().find(|n| !claimed.contains(&n.value.machine_id)) else {
        return Ok(());
    };

    assign(store, task, node, claimed, events).await
}

async fn schedule_group(
    store: &Store,
    config: &Config,
    group: Vec<crate::store::Versioned<Task>>,
    claimed: &mut HashSet<MachineId>,
    events: &mut Vec<ScheduledEvent>,
) -> Result<(), StoreError> {
    let mut ready = Vec::with_capacity(group.len());
    for task in group {
        if let Some(failure) = prerequisite_failure(store, &task.value).await? {
            fail_task(store, task, failure, events).await?;
            continue;
        }
        if prerequisites_satisfied(store, &task.value).await? {
            ready.push(task);
        }
    }
    if ready.is_empty() {
        return Ok(());
    }

    let pool_name = ready[0].value.config.pool.name.clone();
    let Some(pool) = store.pools().get_by_name(&pool_name).await? else {
        return Ok(());
    };
    // Colocation groups are keyed on os, so the first member speaks for all.
    if !pool.value.accepts_task(ready[0].value.os) {
        return Ok(());
    }

    let candidates = store.nodes().search_ready_in_pool(&pool_name).await?;
    let Some(node) = candidates.into_iter().find(|n| !claimed.contains(&n.value.machine_id)) else {
        return Ok(());
    };

    claimed.insert(node.value.machine_id);
    let mut node_version = node.version;
    let machine_id = node.value.machine_id;

    for task in ready {
        if oversized(config, &task.value) {
            fail_task(
                store,
                task,
                TaskError {
                    code: onefuzz_core::error::ErrorCode::TaskFailed,
                    message: "work-set message exceeds the configured size limit".into(),
                    stderr_tail: None,
                    stdout_tail: None,
                },
                events,
            )
            .await?;
            continue;
        }
        node_version = assign_task_to(store, task, machine_id, node_version, events).await?;
    }

    Ok(())
}

async fn assign(
    store: &Store,
    task: crate::store::Versioned<Task>,
    node: crate::store::Versioned<Node>,
    claimed: &mut HashSet<MachineId>,
    events: &mut Vec<ScheduledEvent>,
) -> Result<(), StoreError> {
    claimed.insert(node.value.machine_id);
    assign_task_to(store, task, node.value.machine_id, node.version, events).await?;
    Ok(())
}

async fn assign_task_to(
    store: &Store,
    task: crate::store::Versioned<Task>,
    machine_id: MachineId,
    node_version: i64,
    events: &mut Vec<ScheduledEvent>,
) -> Result<i64, StoreError> {
    let task_id = task.value.task_id;
    let job_id = task.value.job_id;

    retry_on_conflict(RETRY_ATTEMPTS, || async {
        let current = store.tasks().get(task_id).await?.unwrap_or_else(|| task.clone());
        if current.value.state != TaskState::Waiting {
            return Ok(());
        }
        let mut t = current.value;
        t.state = TaskState::Scheduled;
        t.running_on = Some(machine_id);
        store.tasks().replace(&t, current.version).await?;
        Ok(())
    })
    .await?;

    let new_node_version = retry_on_conflict(RETRY_ATTEMPTS, || async {
        let Some(current) = store.nodes().get(machine_id).await? else {
            return Ok(node_version);
        };
        let mut n = current.value;
        n.state = NodeState::Busy;
        Ok(store.nodes().replace(&n, current.version).await?)
    })
    .await?;

    store
        .node_tasks()
        .put(&NodeTask {
            machine_id,
            task_id,
            state: NodeTaskState::Init,
        })
        .await?;

    events.push(ScheduledEvent {
        event_type: EventType::TaskScheduled,
        payload: onefuzz_core::events::task_scheduled(task_id, job_id),
    });

    Ok(new_node_version)
}

async fn fail_task(
    store: &Store,
    task: crate::store::Versioned<Task>,
    error: TaskError,
    events: &mut Vec<ScheduledEvent>,
) -> Result<(), StoreError> {
    let task_id = task.value.task_id;
    let job_id = task.value.job_id;

    retry_on_conflict(RETRY_ATTEMPTS, || async {
        let current = store.tasks().get(task_id).await?.unwrap_or_else(|| task.clone());
        let mut t = current.value;
        t.state = TaskState::Stopping;
        t.error = Some(error.clone());
        t.end_time = Some(chrono::Utc::now());
        store.tasks().replace(&t, current.version).await?;
        Ok(())
    })
    .await?;

    events.push(ScheduledEvent {
        event_type: EventType::TaskFailed,
        payload: onefuzz_core::events::task_failed(task_id, job_id, &error),
    });

    Ok(())
}

/// `Some` if any prerequisite has already stopped with an error: the
/// dependent task cascades to failure rather than waiting forever.
async fn prerequisite_failure(store: &Store, task: &Task) -> Result<Option<TaskError>, StoreError> {
    for prereq_id in &task.config.prereq_tasks {
        let Some(prereq) = store.tasks().get(*prereq_id).await? else {
            continue;
        };
        if prereq.value.state == TaskState::Stopped && prereq.value.error.is_some() {
            return Ok(Some(TaskError {
                code: onefuzz_core::error::ErrorCode::TaskFailed,
                message: format!("prerequisite task {prereq_id} failed"),
                stderr_tail: None,
                stdout_tail: None,
            }));
        }
    }
    Ok(None)
}

async fn prerequisites_satisfied(store: &Store, task: &Task) -> Result<bool, StoreError> {
    for prereq_id in &task.config.prereq_tasks {
        match store.tasks().get(*prereq_id).await? {
            Some(prereq) if prereq.value.state == TaskState::Stopped => continue,
            _ => return Ok(false),
        }
    }
    Ok(true)
}

fn oversized(config: &Config, task: &Task) -> bool {
    serde_json::to_vec(&task.config)
        .map(|bytes| bytes.len() > config.max_queue_message_bytes)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_checks_serialized_config_size() {
        let config = Config {
            max_queue_message_bytes: 10,
            ..Config::default()
        };
        let task = Task {
            task_id: onefuzz_core::ids::TaskId::new(),
            job_id: onefuzz_core::ids::JobId::new(),
            state: TaskState::Waiting,
            os: onefuzz_core::pool::Os::Linux,
            config: onefuzz_core::task::TaskConfig {
                prereq_tasks: vec![],
                containers: vec![],
                pool: onefuzz_core::task::PoolRef {
                    count: 1,
                    name: "pool".into(),
                },
                task: onefuzz_core::task::TaskDetails {
                    kind: "fuzz".into(),
                    duration: 60,
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
            created_at: chrono::Utc::now(),
            running_on: None,
        };
        assert!(oversized(&config, &task));
    }
}
