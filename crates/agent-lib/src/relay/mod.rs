//! Delivery of snapshots to the management server
//!
//! This module provides:
//! - The bounded delivery queue between collectors and the sender
//! - The relay sender that posts queued snapshots one at a time
//! - The one-shot registration handshake that issues the agent key

mod queue;
mod register;
mod sender;

#[cfg(test)]
mod tests;

pub use queue::{delivery_queue, QueueConsumer, QueueProducer, DEFAULT_QUEUE_CAPACITY};
pub use register::register;
pub use sender::{RelaySender, SenderStats, DEFAULT_REQUEST_TIMEOUT};
