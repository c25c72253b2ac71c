//! One-shot inventory collectors
//!
//! Each invocation takes one snapshot from the runtime and enqueues exactly
//! one relay unit. A failed listing call aborts the invocation. A failed
//! inspection only drops that container from the snapshot.

use crate::error::RuntimeError;
use crate::models::{ContainerSnapshot, ImageSummary, RelayUnit};
use crate::observability::AgentMetrics;
use crate::relay::QueueProducer;
use crate::runtime::RuntimeClient;
use anyhow::{Context, Result};
use std::fmt;
use tokio::time::Instant;
use tracing::{debug, warn};

/// The two kinds of snapshot taken every tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorKind {
    Containers,
    Images,
}

impl CollectorKind {
    pub const ALL: [CollectorKind; 2] = [CollectorKind::Containers, CollectorKind::Images];

    pub fn as_str(&self) -> &'static str {
        match self {
            CollectorKind::Containers => "containers",
            CollectorKind::Images => "images",
        }
    }
}

impl fmt::Display for CollectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot every container, stopped ones included, with its inspection detail
///
/// Containers whose inspection fails (typically removed since the listing)
/// are skipped; the rest keep the runtime's listing order.
pub async fn collect_containers(
    runtime: &dyn RuntimeClient,
) -> Result<Vec<ContainerSnapshot>, RuntimeError> {
    let metrics = AgentMetrics::new();
    let summaries = runtime.list_containers(true).await?;
    let mut snapshots = Vec::with_capacity(summaries.len());

    for summary in summaries {
        match runtime.inspect_container(&summary.id).await {
            Ok(detail) => snapshots.push(ContainerSnapshot { summary, detail }),
            Err(e) => {
                warn!(
                    container_id = %summary.id,
                    error = %e,
                    "Skipping container, inspection failed"
                );
                metrics.inc_inspection_skips();
            }
        }
    }

    Ok(snapshots)
}

/// Snapshot the top-level image listing as returned by the runtime
pub async fn collect_images(runtime: &dyn RuntimeClient) -> Result<Vec<ImageSummary>, RuntimeError> {
    runtime.list_images(false).await
}

/// Take one snapshot of `kind` and enqueue it
///
/// Waits for room in the queue when it is full. Returns the number of
/// entries in the enqueued snapshot.
pub async fn run_collector(
    kind: CollectorKind,
    runtime: &dyn RuntimeClient,
    producer: &QueueProducer,
) -> Result<usize> {
    let metrics = AgentMetrics::new();
    let start = Instant::now();

    let collected = match kind {
        CollectorKind::Containers => collect_containers(runtime).await.map(RelayUnit::containers),
        CollectorKind::Images => collect_images(runtime).await.map(RelayUnit::images),
    };
    metrics.observe_collection_latency(start.elapsed().as_secs_f64());

    let unit = collected
        .inspect_err(|_| metrics.inc_collection_errors())
        .with_context(|| format!("Failed to collect {}", kind))?;
    let items = unit.payload().len();

    producer.enqueue(unit).await?;
    metrics.set_queue_depth(producer.len() as i64);
    debug!(collector = %kind, items = items, "Snapshot enqueued");

    Ok(items)
}
