//! Relay sender
//!
//! The single consumer of the delivery queue. Every unit becomes exactly one
//! authenticated POST to the management server, issued one at a time in
//! queue order. Failed deliveries are logged and dropped.

use super::queue::QueueConsumer;
use crate::endpoint;
use crate::error::RelayError;
use crate::health::{components, HealthRegistry};
use crate::models::{Credential, RelayUnit};
use crate::observability::{AgentMetrics, StructuredLogger};
use anyhow::{Context, Result};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

/// Default timeout for a single relay request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Delivery statistics
#[derive(Debug, Default, Clone)]
pub struct SenderStats {
    pub sent: u64,
    pub failed: u64,
    pub last_error: Option<String>,
}

/// Long-lived task draining the delivery queue into the management server
pub struct RelaySender {
    client: Client,
    base_url: Url,
    credential: Arc<Credential>,
    consumer: QueueConsumer,
    stats: Arc<RwLock<SenderStats>>,
    metrics: AgentMetrics,
    logger: StructuredLogger,
    health: Option<HealthRegistry>,
}

impl RelaySender {
    /// Create a sender posting to `base_url`, signing with `credential`
    pub fn new(
        base_url: Url,
        credential: Arc<Credential>,
        request_timeout: Duration,
        consumer: QueueConsumer,
        logger: StructuredLogger,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to create relay HTTP client")?;

        Ok(Self {
            client,
            base_url,
            credential,
            consumer,
            stats: Arc::new(RwLock::new(SenderStats::default())),
            metrics: AgentMetrics::new(),
            logger,
            health: None,
        })
    }

    /// Report delivery outcomes to the health registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn stats_handle(&self) -> Arc<RwLock<SenderStats>> {
        Arc::clone(&self.stats)
    }

    /// Run until the queue is closed and drained
    pub async fn run(mut self) -> SenderStats {
        info!(base_url = %self.base_url, "Starting relay sender");

        while let Some(unit) = self.consumer.dequeue().await {
            self.metrics.set_queue_depth(self.consumer.len() as i64);
            self.process(unit).await;
        }

        let stats = self.stats.read().await.clone();
        info!(
            sent = stats.sent,
            failed = stats.failed,
            "Delivery queue closed, relay sender stopped"
        );
        stats
    }

    async fn process(&self, unit: RelayUnit) {
        match self.deliver(&unit).await {
            Ok(()) => {
                debug!(
                    path = %unit.destination_path(),
                    items = unit.payload().len(),
                    "Relayed snapshot"
                );
                self.metrics.inc_relay_sent();

                let mut stats = self.stats.write().await;
                stats.sent += 1;
                stats.last_error = None;
                drop(stats);

                if let Some(health) = &self.health {
                    health.set_healthy(components::RELAY_SENDER).await;
                }
            }
            Err(e) => {
                self.logger.log_relay_failure(unit.destination_path(), &e.to_string());
                self.metrics.inc_relay_failures();

                let mut stats = self.stats.write().await;
                stats.failed += 1;
                stats.last_error = Some(e.to_string());
                drop(stats);

                if let Some(health) = &self.health {
                    health
                        .set_degraded(components::RELAY_SENDER, e.to_string())
                        .await;
                }
            }
        }
    }

    /// POST one unit to its destination
    pub async fn deliver(&self, unit: &RelayUnit) -> Result<(), RelayError> {
        let url = endpoint::join(&self.base_url, unit.destination_path())?;
        let body = serde_json::to_vec(unit.payload())?;

        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, self.credential.authorization())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::Status {
                status: status.as_u16(),
                path: unit.destination_path().to_string(),
            });
        }

        Ok(())
    }
}
