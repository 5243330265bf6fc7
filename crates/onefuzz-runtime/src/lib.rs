//! Entity store, scheduler, node agent protocol, lifecycle state machines and
//! autoscaler for the onefuzz core.
//!
//! [`store`] is the single source of truth; everything else is a
//! control loop or request handler reading and CAS-updating it.
//! [`worker::Worker`] ties the loops together and is what a binary crate
//! actually runs.

#[macro_use]
extern crate serde;

pub mod autoscale;
mod config;
pub mod error;
pub mod event;
pub mod flag;
pub mod lifecycle;
mod migrate;
pub mod protocol;
pub mod schedule;
pub mod sim;
pub mod store;
mod worker;

pub use self::config::Config;
pub use self::worker::{PgEventSource, Worker, WorkerBuilder, WorkerHandle};
