//! Timer-driven lifecycle sweeps.
//!
//! Transitions here are time-driven rather than event-driven: a job going
//! stale, a node's heartbeat lapsing, a task stuck in `scheduled` past its
//! assignment grace. Each sweep is its own `get -> mutate -> replace`
//! cycle per record, same as [`crate::schedule`].

use onefuzz_core::events::EventType;
use onefuzz_core::job::JobState;
use onefuzz_core::node::NodeState;
use onefuzz_core::node_message::NodeCommand;
use onefuzz_core::task::{TaskError, TaskState};

use crate::config::Config;
use crate::error::StoreError;
use crate::schedule::ScheduledEvent;
use crate::store::{retry_on_conflict, Store};

const RETRY_ATTEMPTS: u32 = 5;

/// Moves jobs that have sat in `init` past [`onefuzz_core::job::Job::STALE_AFTER`]
/// into `stopping`, and finishes jobs in `stopping` once no non-terminal
/// task remains under them.
pub async fn job_tick(store: &Store) -> Result<Vec<ScheduledEvent>, StoreError> {
    let mut events = Vec::new();
    let now = chrono::Utc::now();

    for job in store.jobs().search_non_terminal().await? {
        let job_id = job.value.job_id;
        let stale = job.value.is_stale(now);

        if stale {
            retry_on_conflict(RETRY_ATTEMPTS, || async {
                let Some(current) = store.jobs().get(job_id).await? else {
                    return Ok(());
                };
                if current.value.state >= JobState::Stopping {
                    return Ok(());
                }
                let mut j = current.value;
                j.state = JobState::Stopping;
                store.jobs().replace(&j, current.version).await?;
                Ok(())
            })
            .await?;
        }

        if job.value.state != JobState::Stopping && !stale {
            continue;
        }

        let tasks = store.tasks().search_by_job(job_id).await?;
        if !tasks.iter().all(|t| t.value.state.is_terminal()) {
            continue;
        }

        retry_on_conflict(RETRY_ATTEMPTS, || async {
            let Some(current) = store.jobs().get(job_id).await? else {
                return Ok(());
            };
            if current.value.state == JobState::Stopped {
                return Ok(());
            }
            let mut j = current.value;
            j.state = JobState::Stopped;
            store.jobs().replace(&j, current.version).await?;
            Ok(())
        })
        .await?;

        events.push(ScheduledEvent {
            event_type: EventType::JobStopped,
            payload: onefuzz_core::events::job_stopped(job_id),
        });
    }

    Ok(events)
}

/// Drives stopping tasks to `stopped`.
///
/// A job in `stopping` first cascades to its tasks. A task in `stopping`
/// that still has NodeTask associations gets a cooperative `stop_task`
/// command sent to each of its nodes (once; re-sends are suppressed while
/// one is queued) and moves to `stopped` only after the node has freed it,
/// so a stopped task never leaves a running NodeTask behind.
pub async fn task_stop_tick(store: &Store) -> Result<Vec<ScheduledEvent>, StoreError> {
    let mut events = Vec::new();
    let now = chrono::Utc::now();

    for job in store.jobs().search_non_terminal().await? {
        let job_stopping = job.value.state == JobState::Stopping;

        for task in store.tasks().search_by_job(job.value.job_id).await? {
            let task_id = task.value.task_id;
            let mut state = task.value.state;

            if state == TaskState::Stopped {
                continue;
            }

            if job_stopping && state < TaskState::Stopping {
                retry_on_conflict(RETRY_ATTEMPTS, || async {
                    let Some(current) = store.tasks().get(task_id).await? else {
                        return Ok(());
                    };
                    if current.value.state >= TaskState::Stopping {
                        return Ok(());
                    }
                    let mut t = current.value;
                    t.state = TaskState::Stopping;
                    t.end_time = Some(now);
                    store.tasks().replace(&t, current.version).await?;
                    Ok(())
                })
                .await?;
                state = TaskState::Stopping;
            }

            if state != TaskState::Stopping {
                continue;
            }

            let assigned = store.node_tasks().search_by_task(task_id).await?;
            if assigned.is_empty() {
                retry_on_conflict(RETRY_ATTEMPTS, || async {
                    let Some(current) = store.tasks().get(task_id).await? else {
                        return Ok(());
                    };
                    if current.value.state != TaskState::Stopping {
                        return Ok(());
                    }
                    let mut t = current.value;
                    t.state = TaskState::Stopped;
                    // Release the node binding so liveness sweeps over this
                    // machine no longer see a finished task.
                    t.running_on = None;
                    store.tasks().replace(&t, current.version).await?;
                    Ok(())
                })
                .await?;

                events.push(ScheduledEvent {
                    event_type: EventType::TaskStopped,
                    payload: onefuzz_core::events::task_stopped(task_id, job.value.job_id),
                });
                continue;
            }

            for node_task in assigned {
                let queued = store.node_messages().peek(node_task.machine_id, 100).await?;
                let already_asked = queued.iter().any(|m| {
                    matches!(&m.command, NodeCommand::StopTask { task_id: queued_task } if *queued_task == task_id)
                });
                if !already_asked {
                    store
                        .node_messages()
                        .enqueue(node_task.machine_id, &NodeCommand::StopTask { task_id })
                        .await?;
                }
            }
        }
    }

    Ok(events)
}

/// Fails tasks that reached `scheduled` but whose assigned node never
/// heartbeated within [`Config::node_assignment_grace`].
pub async fn task_assignment_sweep(store: &Store, config: &Config) -> Result<Vec<ScheduledEvent>, StoreError> {
    let mut events = Vec::new();
    let now = chrono::Utc::now();
    let grace = chrono::Duration::from_std(config.node_assignment_grace).unwrap_or(chrono::Duration::seconds(0));

    for job in store.jobs().search_non_terminal().await? {
        for task in store.tasks().search_by_job(job.value.job_id).await? {
            if task.value.state != TaskState::Scheduled {
                continue;
            }
            if now.signed_duration_since(task.value.created_at) <= grace {
                continue;
            }

            let task_id = task.value.task_id;
            let job_id = task.value.job_id;
            let error = TaskError {
                code: onefuzz_core::error::ErrorCode::TaskCancelled,
                message: "assigned node never heartbeated within the assignment grace period".into(),
                stderr_tail: None,
                stdout_tail: None,
            };

            retry_on_conflict(RETRY_ATTEMPTS, || async {
                let Some(current) = store.tasks().get(task_id).await? else {
                    return Ok(());
                };
                if current.value.state != TaskState::Scheduled {
                    return Ok(());
                }
                let mut t = current.value;
                t.state = TaskState::Stopping;
                t.error = Some(error.clone());
                t.end_time = Some(now);
                store.tasks().replace(&t, current.version).await?;
                Ok(())
            })
            .await?;

            events.push(ScheduledEvent {
                event_type: EventType::TaskFailed,
                payload: onefuzz_core::events::task_failed(task_id, job_id, &error),
            });
        }
    }

    Ok(events)
}

/// Sweeps every non-halted node, reimaging ones past their heartbeat timeout
/// or max age. A node that had in-flight work gets it re-queued so the
/// scheduler can re-assign it rather than losing the task silently.
pub async fn node_liveness_sweep(store: &Store, config: &Config) -> Result<Vec<ScheduledEvent>, StoreError> {
    let mut events = Vec::new();
    let now = chrono::Utc::now();
    let heartbeat_timeout = chrono::Duration::from_std(config.heartbeat_timeout).unwrap_or(chrono::Duration::seconds(0));
    let force_timeout = heartbeat_timeout * config.force_reimage_multiplier as i32;

    for node in store.nodes().search_not_halted().await? {
        if !node.value.should_reimage(now, heartbeat_timeout) {
            continue;
        }

        let machine_id = node.value.machine_id;
        let forced = node
            .value
            .heartbeat
            .map(|hb| now.signed_duration_since(hb) > force_timeout)
            .unwrap_or(false);

        if forced {
            // Past the hard deadline: stop waiting for a graceful stop ack and
            // cancel in-flight work outright. Tasks that already reached
            // `stopping` keep their recorded outcome.
            for task in store.tasks().search_running_on(machine_id).await? {
                if task.value.state >= TaskState::Stopping {
                    continue;
                }

                let task_id = task.value.task_id;
                let job_id = task.value.job_id;
                let error = TaskError {
                    code: onefuzz_core::error::ErrorCode::TaskCancelled,
                    message: "node went unresponsive and was force-reimaged".into(),
                    stderr_tail: None,
                    stdout_tail: None,
                };
                retry_on_conflict(RETRY_ATTEMPTS, || async {
                    let Some(current) = store.tasks().get(task_id).await? else {
                        return Ok(());
                    };
                    if current.value.state >= TaskState::Stopping {
                        return Ok(());
                    }
                    let mut t = current.value;
                    t.state = TaskState::Stopping;
                    t.error = Some(error.clone());
                    t.end_time = Some(now);
                    store.tasks().replace(&t, current.version).await?;
                    Ok(())
                })
                .await?;
                events.push(ScheduledEvent {
                    event_type: EventType::TaskFailed,
                    payload: onefuzz_core::events::task_failed(task_id, job_id, &error),
                });
            }
            store.node_tasks().delete_by_machine(machine_id).await?;

            retry_on_conflict(RETRY_ATTEMPTS, || async {
                let Some(current) = store.nodes().get(machine_id).await? else {
                    return Ok(());
                };
                let mut n = current.value;
                n.state = NodeState::Halt;
                store.nodes().replace(&n, current.version).await?;
                Ok(())
            })
            .await?;

            events.push(ScheduledEvent {
                event_type: EventType::NodeStateUpdated,
                payload: onefuzz_core::events::node_state_updated(machine_id, NodeState::Halt),
            });
        } else {
            // Soft path: ask the agent to stop, give it until `force_timeout`
            // to ack before the hard path above kicks in.
            store.node_messages().enqueue(machine_id, &NodeCommand::Stop).await?;

            retry_on_conflict(RETRY_ATTEMPTS, || async {
                let Some(current) = store.nodes().get(machine_id).await? else {
                    return Ok(());
                };
                if current.value.reimage_requested {
                    return Ok(());
                }
                let mut n = current.value;
                n.reimage_requested = true;
                store.nodes().replace(&n, current.version).await?;
                Ok(())
            })
            .await?;
        }
    }

    Ok(events)
}

/// Drains scalesets in `shutdown`: once every node has gone, the scaleset can
/// proceed to `halt`.
pub async fn scaleset_drain_tick(store: &Store) -> Result<Vec<ScheduledEvent>, StoreError> {
    use onefuzz_core::scaleset::ScalesetState;

    let mut events = Vec::new();
    for scaleset in store.scalesets().search_active().await? {
        if scaleset.value.state != ScalesetState::Shutdown || !scaleset.value.nodes.is_empty() {
            continue;
        }

        let scaleset_id = scaleset.value.scaleset_id;
        retry_on_conflict(RETRY_ATTEMPTS, || async {
            let Some(current) = store.scalesets().get(scaleset_id).await? else {
                return Ok(());
            };
            let mut s = current.value;
            s.state = ScalesetState::Halt;
            store.scalesets().replace(&s, current.version).await?;
            Ok(())
        })
        .await?;

        events.push(ScheduledEvent {
            event_type: EventType::ScalesetStateUpdated,
            payload: onefuzz_core::events::scaleset_state_updated(scaleset_id, ScalesetState::Halt),
        });
    }

    Ok(events)
}

/// Deletes pools in `shutdown` once nothing references them any more: the
/// pool's work queue goes away only after every task assigned to it has
/// stopped and every scaleset under it has halted.
pub async fn pool_drain_tick(store: &Store) -> Result<(), StoreError> {
    use onefuzz_core::pool::PoolState;

    for pool in store.pools().search_all().await? {
        if pool.value.state != PoolState::Shutdown {
            continue;
        }

        let active_tasks = store.tasks().search_active_by_pool(&pool.value.name).await?;
        if !active_tasks.is_empty() {
            continue;
        }

        let scalesets = store.scalesets().search_by_pool(&pool.value.name).await?;
        if scalesets.iter().any(|s| !s.value.is_terminal()) {
            continue;
        }

        tracing::info!(pool = %pool.value.name, "pool drained, deleting it and its queue");
        store.pools().delete(pool.value.pool_id).await?;
    }

    Ok(())
}

/// Advances repro debug VMs through their lifecycle.
///
/// `init` repros move to `extensions_launch` (the provisioning layer owns
/// the actual VM create and later reports `running`/`extensions_failed`/
/// `vm_allocation_failed`); live repros past their recorded `end_time` are
/// asked to stop; a stopping repro with no VM address left is finished.
pub async fn repro_tick(store: &Store) -> Result<(), StoreError> {
    use onefuzz_core::repro::ReproState;

    let now = chrono::Utc::now();

    for repro in store.repros().search_non_terminal().await? {
        let vm_id = repro.value.vm_id;
        let expired = repro.value.end_time.is_some_and(|end| end <= now);

        let target = match repro.value.state {
            ReproState::Init => Some(ReproState::ExtensionsLaunch),
            ReproState::ExtensionsLaunch | ReproState::Running if expired => Some(ReproState::Stopping),
            ReproState::Stopping if repro.value.ip.is_none() => Some(ReproState::Stopped),
            _ => None,
        };
        let Some(target) = target else {
            continue;
        };

        retry_on_conflict(RETRY_ATTEMPTS, || async {
            let Some(current) = store.repros().get(vm_id).await? else {
                return Ok(());
            };
            if current.value.state != repro.value.state {
                return Ok(());
            }
            let mut r = current.value;
            r.state = target;
            if target == ReproState::Stopped {
                r.end_time = Some(now);
            }
            store.repros().replace(&r, current.version).await?;
            Ok(())
        })
        .await?;
    }

    Ok(())
}

/// Purges expired retention tags. Deleting the tagged blob itself belongs to
/// the storage layer; this sweep retires the tags that drove it.
pub async fn retention_sweep(store: &Store) -> Result<(), StoreError> {
    let purged = store.containers().purge_expired_tags(chrono::Utc::now()).await?;
    if purged > 0 {
        tracing::info!(purged, "retention sweep purged expired blob tags");
    }
    Ok(())
}
