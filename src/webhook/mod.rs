//! Event Pipeline (C8): authenticated webhook ingress, a bounded queue,
//! and a worker pool that turns events into targeted reconciliation
//! actions via [`crate::orchestrator::Orchestrator::apply_event`].

pub mod model;
pub mod parse;
pub mod queue;
pub mod signature;

pub use self::queue::{EventPipeline, WebhookConfig};
