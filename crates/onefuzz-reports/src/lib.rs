//! The crash report pipeline.
//!
//! Fired on "blob added" events for report containers. [`parse`] turns the
//! raw payload into a [`onefuzz_core::report::Report`], [`minimize`] applies
//! the deterministic denylist-filtered call-stack reduction and computes the
//! fingerprint pair, and [`pipeline::ingest_report`] dedups the fingerprint
//! against [`onefuzz_runtime::store::Store::unique_reports`] and raises the
//! events the notification dispatcher reacts to.

pub mod minimize;
pub mod parse;
pub mod pipeline;

pub use self::parse::{parse_report, UnattributableReport};
pub use self::pipeline::{ingest_report, IngestError, IngestOutcome};
