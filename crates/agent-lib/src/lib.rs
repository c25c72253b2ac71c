//! Agent library for proxying and relaying container runtime state
//!
//! This crate provides the core functionality for:
//! - Inventory collection from a container runtime (containers, images)
//! - A bounded delivery queue and a serialized relay to the management server
//! - Agent registration
//! - A reverse proxy in front of the runtime API
//! - Health checks and observability

pub mod collector;
pub mod endpoint;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod proxy;
pub mod relay;
pub mod runtime;

pub use error::{RelayError, RuntimeError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{AgentMetrics, StructuredLogger};
