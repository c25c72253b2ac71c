//! Bounded delivery queue between the collectors and the relay sender
//!
//! A thin wrapper over a bounded `tokio::sync::mpsc` channel: producers wait
//! for a free slot instead of dropping units, and the single consumer sees
//! units in the order they were accepted.

use crate::models::RelayUnit;
use anyhow::{bail, Result};
use tokio::sync::mpsc;

/// Default number of units that may wait for delivery
///
/// One tick produces a container unit and an image unit, so two slots hold
/// a full tick before collectors start blocking.
pub const DEFAULT_QUEUE_CAPACITY: usize = 2;

/// Create a delivery queue holding at most `capacity` pending units
pub fn delivery_queue(capacity: usize) -> Result<(QueueProducer, QueueConsumer)> {
    if capacity == 0 {
        bail!("Delivery queue capacity must be at least 1");
    }

    let (tx, rx) = mpsc::channel(capacity);
    Ok((QueueProducer { tx }, QueueConsumer { rx }))
}

/// Producer side, cloned into every collector task
#[derive(Debug, Clone)]
pub struct QueueProducer {
    tx: mpsc::Sender<RelayUnit>,
}

impl QueueProducer {
    /// Enqueue a unit, waiting while the queue is full
    pub async fn enqueue(&self, unit: RelayUnit) -> Result<()> {
        self.tx
            .send(unit)
            .await
            .map_err(|_| anyhow::anyhow!("Delivery queue closed"))
    }

    /// Number of units currently waiting for delivery
    pub(crate) fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// Consumer side, owned by the relay sender
#[derive(Debug)]
pub struct QueueConsumer {
    rx: mpsc::Receiver<RelayUnit>,
}

impl QueueConsumer {
    /// Wait for the next unit
    ///
    /// Returns `None` once every producer is dropped and the queue is empty.
    pub async fn dequeue(&mut self) -> Option<RelayUnit> {
        self.rx.recv().await
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
