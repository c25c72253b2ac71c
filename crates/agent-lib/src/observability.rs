//! Observability infrastructure for the relay agent
//!
//! Provides:
//! - Prometheus metrics (collection latency and errors, relay outcomes,
//!   queue depth, proxy traffic)
//! - Structured logging of agent lifecycle events with tracing

use axum::http::Method;
use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter,
    IntGauge,
};
use std::net::IpAddr;
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for runtime snapshot latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();

struct AgentMetricsInner {
    collection_latency_seconds: Histogram,
    collection_errors: IntCounter,
    inspection_skips: IntCounter,
    relay_sent: IntCounter,
    relay_failures: IntCounter,
    queue_depth: IntGauge,
    proxied_requests: IntCounter,
    proxy_errors: IntCounter,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            collection_latency_seconds: register_histogram!(
                "relay_agent_collection_latency_seconds",
                "Time spent taking one snapshot from the runtime",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register collection_latency_seconds"),

            collection_errors: register_int_counter!(
                "relay_agent_collection_errors_total",
                "Snapshots abandoned because a runtime listing call failed"
            )
            .expect("Failed to register collection_errors"),

            inspection_skips: register_int_counter!(
                "relay_agent_inspection_skips_total",
                "Containers left out of a snapshot because inspection failed"
            )
            .expect("Failed to register inspection_skips"),

            relay_sent: register_int_counter!(
                "relay_agent_relay_sent_total",
                "Snapshots delivered to the management server"
            )
            .expect("Failed to register relay_sent"),

            relay_failures: register_int_counter!(
                "relay_agent_relay_failures_total",
                "Snapshots dropped after a failed delivery"
            )
            .expect("Failed to register relay_failures"),

            queue_depth: register_int_gauge!(
                "relay_agent_queue_depth",
                "Snapshots waiting in the delivery queue"
            )
            .expect("Failed to register queue_depth"),

            proxied_requests: register_int_counter!(
                "relay_agent_proxied_requests_total",
                "Requests forwarded to the runtime API"
            )
            .expect("Failed to register proxied_requests"),

            proxy_errors: register_int_counter!(
                "relay_agent_proxy_errors_total",
                "Proxied requests answered with an error by the agent"
            )
            .expect("Failed to register proxy_errors"),
        }
    }
}

/// Agent metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct AgentMetrics {
    _private: (),
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AgentMetricsInner {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new)
    }

    pub fn observe_collection_latency(&self, duration_secs: f64) {
        self.inner().collection_latency_seconds.observe(duration_secs);
    }

    pub fn inc_collection_errors(&self) {
        self.inner().collection_errors.inc();
    }

    pub fn inc_inspection_skips(&self) {
        self.inner().inspection_skips.inc();
    }

    pub fn inc_relay_sent(&self) {
        self.inner().relay_sent.inc();
    }

    pub fn inc_relay_failures(&self) {
        self.inner().relay_failures.inc();
    }

    pub fn set_queue_depth(&self, depth: i64) {
        self.inner().queue_depth.set(depth);
    }

    pub fn inc_proxied_requests(&self) {
        self.inner().proxied_requests.inc();
    }

    pub fn inc_proxy_errors(&self) {
        self.inner().proxy_errors.inc();
    }
}

/// Structured logger for agent events
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    host: String,
}

impl StructuredLogger {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn log_startup(&self, version: &str, manager_url: &str, proxy_port: u16, interval_secs: u64) {
        info!(
            event = "agent_started",
            host = %self.host,
            agent_version = %version,
            manager_url = %manager_url,
            proxy_port = proxy_port,
            interval_secs = interval_secs,
            "Relay agent started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            host = %self.host,
            reason = %reason,
            "Relay agent shutting down"
        );
    }

    pub fn log_registered(&self, manager_url: &str) {
        info!(
            event = "agent_registered",
            host = %self.host,
            manager_url = %manager_url,
            "Registered with management server"
        );
    }

    /// A snapshot could not be delivered and is dropped
    pub fn log_relay_failure(&self, path: &str, error: &str) {
        warn!(
            event = "relay_failed",
            host = %self.host,
            path = %path,
            error = %error,
            "Snapshot delivery failed, dropping"
        );
    }

    /// An inbound request is about to be forwarded to the runtime
    pub fn log_proxy_request(&self, source: &IpAddr, method: &Method, path: &str) {
        info!(
            event = "proxy_request",
            source = %source,
            method = %method,
            path = %path,
            "Request from {}: {}",
            source,
            path
        );
    }
}
