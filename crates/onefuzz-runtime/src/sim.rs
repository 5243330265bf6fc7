//! Scheduler trait for deterministic simulation testing (DST).
//!
//! [`Scheduler`] lets tests control the interleaving of concurrent worker
//! loops. In production the default [`NoopScheduler`] is used and never
//! blocks; a DST harness can gate each component behind a permit so it can
//! deterministically replay interleavings between the heartbeat loop, leader
//! election, the scheduler tick and the autoscaler tick -- where the
//! concurrent-state-transition bugs in a system like this actually live.

use std::borrow::Cow;
use std::fmt;

use onefuzz_core::ids::{MachineId, ScalesetId, TaskId};

/// Identifies a worker component that is requesting permission to proceed.
#[derive(Clone, Debug)]
pub enum Component {
    /// The heartbeat loop is about to update this worker's liveness row.
    Heartbeat { worker_id: i64 },

    /// The dead-worker sweep is about to expire inactive workers.
    ValidateWorkers { worker_id: i64 },

    /// The leader is about to run a scheduler tick.
    SchedulerTick { worker_id: i64 },

    /// The leader is about to run an autoscaler tick for one scaleset.
    AutoscalerTick {
        worker_id: i64,
        scaleset_id: ScalesetId,
    },

    /// The node liveness sweep is about to reimage a dead node.
    NodeLivenessSweep { worker_id: i64 },

    /// A node transaction (agent-protocol handler) is entering or exiting.
    NodeTransaction {
        machine_id: MachineId,
        label: Cow<'static, str>,
    },

    /// A user-defined component for downstream extensions of this crate.
    Custom(Cow<'static, str>),
}

/// Events emitted by the runtime at key state transitions, delivered to the
/// scheduler for logging, assertions and DST decisions.
#[derive(Clone, Debug)]
pub enum ScheduleEvent {
    WorkerRegistered { worker_id: i64 },
    WorkerDeleted { worker_id: i64 },
    LeaderChanged { new_leader: i64 },
    TaskScheduled { task_id: TaskId, pool: String },
    TaskCompleted { task_id: TaskId, success: bool },
    NodeReimaged { machine_id: MachineId },
    ScalesetResized { scaleset_id: ScalesetId, target: u32 },
}

/// RAII guard returned by [`Scheduler::acquire`]. Dropping it signals that the
/// gated step completed.
pub struct ScheduleGuard {
    _inner: Option<Box<dyn FnOnce() + Send>>,
}

impl ScheduleGuard {
    pub fn noop() -> Self {
        Self { _inner: None }
    }

    pub fn on_drop(f: impl FnOnce() + Send + 'static) -> Self {
        Self {
            _inner: Some(Box::new(f)),
        }
    }
}

impl Drop for ScheduleGuard {
    fn drop(&mut self) {
        if let Some(f) = self._inner.take() {
            f();
        }
    }
}

impl fmt::Debug for ScheduleGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleGuard")
            .field("has_callback", &self._inner.is_some())
            .finish()
    }
}

/// Controls the execution order of worker loops. Production always uses
/// [`NoopScheduler`].
#[async_trait::async_trait]
pub trait Scheduler: Send + Sync {
    async fn acquire(&self, component: Component) -> ScheduleGuard;

    fn notify(&self, event: ScheduleEvent);
}

/// A no-op scheduler that never blocks and ignores all events.
pub struct NoopScheduler;

#[async_trait::async_trait]
impl Scheduler for NoopScheduler {
    async fn acquire(&self, _component: Component) -> ScheduleGuard {
        ScheduleGuard::noop()
    }

    fn notify(&self, _event: ScheduleEvent) {}
}

/// A scheduler for simulation tests: never blocks, but records every acquire
/// and every notified event so a harness can assert on the interleaving a
/// run actually produced.
#[derive(Default)]
pub struct RecordingScheduler {
    acquires: parking_lot::Mutex<Vec<Component>>,
    events: parking_lot::Mutex<Vec<ScheduleEvent>>,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquires(&self) -> Vec<Component> {
        self.acquires.lock().clone()
    }

    pub fn events(&self) -> Vec<ScheduleEvent> {
        self.events.lock().clone()
    }
}

#[async_trait::async_trait]
impl Scheduler for RecordingScheduler {
    async fn acquire(&self, component: Component) -> ScheduleGuard {
        self.acquires.lock().push(component);
        ScheduleGuard::noop()
    }

    fn notify(&self, event: ScheduleEvent) {
        self.events.lock().push(event);
    }
}
