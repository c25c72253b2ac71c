//! Snapshot scheduler
//!
//! Fires on a fixed interval and launches one container collector and one
//! image collector per tick without waiting for earlier ticks to finish.
//! Overlapping collectors are throttled only by the delivery queue.

use super::tasks::{run_collector, CollectorKind};
use crate::health::{components, HealthRegistry};
use crate::relay::QueueProducer;
use crate::runtime::RuntimeClient;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Configuration for the snapshot scheduler
#[derive(Debug, Clone)]
pub struct CollectionConfig {
    /// Time between ticks (default: 5 seconds)
    pub interval: Duration,
    /// How long shutdown waits for in-flight collectors (default: 10 seconds)
    pub drain_timeout: Duration,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(10),
        }
    }
}

/// Counters reported when the scheduler stops
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoopStats {
    pub ticks: u64,
    pub completed: u64,
    pub failed: u64,
    pub aborted: u64,
}

/// Periodic scheduler owning every collector task it starts
pub struct CollectionLoop {
    runtime: Arc<dyn RuntimeClient>,
    producer: QueueProducer,
    config: CollectionConfig,
    health: Option<HealthRegistry>,
    tasks: JoinSet<Result<usize>>,
    stats: LoopStats,
}

impl CollectionLoop {
    /// Create a new scheduler feeding `producer`
    pub fn new(
        runtime: Arc<dyn RuntimeClient>,
        producer: QueueProducer,
        config: CollectionConfig,
    ) -> Self {
        Self {
            runtime,
            producer,
            config,
            health: None,
            tasks: JoinSet::new(),
            stats: LoopStats::default(),
        }
    }

    /// Run until `shutdown` fires, then drain in-flight collectors
    ///
    /// The queue producer is dropped on return so the relay sender can finish.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> LoopStats {
        info!(
            interval_secs = self.config.interval.as_secs_f64(),
            "Starting snapshot scheduler"
        );

        if let Some(health) = &self.health {
            health.set_healthy(components::SCHEDULER).await;
        }

        // First tick one period after start; late ticks are not caught up
        let mut ticker = interval_at(Instant::now() + self.config.interval, self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.reap_finished();
                    self.spawn_tick();
                }
                _ = shutdown.recv() => {
                    info!("Shutting down snapshot scheduler");
                    break;
                }
            }
        }

        self.drain().await;
        if let Some(health) = &self.health {
            health.set_degraded(components::SCHEDULER, "stopped").await;
        }
        self.stats
    }

    /// Launch one collector of each kind
    fn spawn_tick(&mut self) {
        self.stats.ticks += 1;
        debug!(tick = self.stats.ticks, in_flight = self.tasks.len(), "Tick");

        for kind in CollectorKind::ALL {
            let runtime = Arc::clone(&self.runtime);
            let producer = self.producer.clone();
            self.tasks.spawn(async move {
                let result = run_collector(kind, runtime.as_ref(), &producer).await;
                if let Err(e) = &result {
                    warn!(
                        collector = %kind,
                        error = %format!("{:#}", e),
                        "Collection aborted for this tick"
                    );
                }
                result
            });
        }
    }

    fn reap_finished(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            self.record(joined);
        }
    }

    fn record(&mut self, joined: Result<Result<usize>, tokio::task::JoinError>) {
        match joined {
            Ok(Ok(_)) => self.stats.completed += 1,
            // Logged by the collector task when it failed
            Ok(Err(_)) => self.stats.failed += 1,
            Err(e) if e.is_cancelled() => self.stats.aborted += 1,
            Err(e) => {
                self.stats.failed += 1;
                error!(error = %e, "Collector task panicked");
            }
        }
    }

    /// Wait for in-flight collectors, aborting whatever outlives the drain timeout
    async fn drain(&mut self) {
        let deadline = Instant::now() + self.config.drain_timeout;

        loop {
            match tokio::time::timeout_at(deadline, self.tasks.join_next()).await {
                Ok(Some(joined)) => self.record(joined),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        remaining = self.tasks.len(),
                        "Drain timeout reached, aborting collectors"
                    );
                    self.tasks.abort_all();
                    while let Some(joined) = self.tasks.join_next().await {
                        self.record(joined);
                    }
                    break;
                }
            }
        }

        info!(
            ticks = self.stats.ticks,
            completed = self.stats.completed,
            failed = self.stats.failed,
            aborted = self.stats.aborted,
            "Snapshot scheduler stopped"
        );
    }
}

/// Builder for creating the scheduler
pub struct CollectionLoopBuilder {
    runtime: Option<Arc<dyn RuntimeClient>>,
    producer: Option<QueueProducer>,
    health: Option<HealthRegistry>,
    config: CollectionConfig,
}

impl CollectionLoopBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            runtime: None,
            producer: None,
            health: None,
            config: CollectionConfig::default(),
        }
    }

    /// Set the runtime client the collectors query
    pub fn runtime(mut self, runtime: Arc<dyn RuntimeClient>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Set the delivery queue the collectors feed
    pub fn producer(mut self, producer: QueueProducer) -> Self {
        self.producer = Some(producer);
        self
    }

    /// Set the tick interval
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    /// Set the shutdown drain timeout
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.drain_timeout = timeout;
        self
    }

    /// Report scheduler state to the health registry
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Build the scheduler
    pub fn build(self) -> Result<CollectionLoop> {
        let runtime = self
            .runtime
            .ok_or_else(|| anyhow::anyhow!("Runtime client is required"))?;
        let producer = self
            .producer
            .ok_or_else(|| anyhow::anyhow!("Queue producer is required"))?;
        if self.config.interval.is_zero() {
            anyhow::bail!("Collection interval must be greater than zero");
        }

        let mut collection_loop = CollectionLoop::new(runtime, producer, self.config);
        collection_loop.health = self.health;
        Ok(collection_loop)
    }
}

impl Default for CollectionLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
