//! The notification dispatcher.
//!
//! Invoked by the report pipeline for every
//! [`onefuzz_core::notification::Notification`]
//! attached to a report's container. Renders the template's
//! [`onefuzz_core::notification::NotificationConfig`] variant, dispatches it
//! with a capped retry budget, and records either a successful dispatch
//! (dedup'd against the report fingerprint) or a `notification_failed`
//! event -- a delivery failure never fails the task or job that produced
//! the report.

pub mod ado;
pub mod dispatch;
pub mod github;
pub mod retry;
pub mod secret;
pub mod teams;
pub mod template;

pub use self::dispatch::dispatch_notification;
pub use self::secret::SecretResolver;
pub use self::template::{Context, ReportUrls};
