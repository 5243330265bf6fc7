use async_trait::async_trait;

mod events;

pub use self::events::*;

/// An in-process signal that something changed in the entity store.
///
/// Delivered via Postgres `LISTEN`/`NOTIFY` so every runtime worker reacts to
/// writes without polling; workers coordinate exclusively through the
/// entity store.
#[derive(Clone, Debug)]
pub enum Event {
    /// A task was inserted, or an active task had its `running_on` cleared
    /// (the owning worker died and the task needs to be re-claimed).
    Task(Task),

    /// A node's row changed: heartbeat, state transition, or deletion.
    Node(Node),

    /// An entry was inserted into or deleted from `onefuzz.worker`. Used to
    /// detect cluster leader changes.
    Worker(Worker),

    /// Emitted whenever there is a possibility an event was lost (listener
    /// reconnect, buffer overflow). Forces a full re-scan.
    Lagged,
}

#[async_trait]
pub trait EventSource: Send {
    async fn next(&mut self) -> anyhow::Result<Event>;
}
