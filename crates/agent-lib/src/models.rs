//! Core data models for the relay agent
//!
//! Runtime listings are modelled with the fields the agent reads and a
//! flattened map for everything else, so a snapshot re-serializes without
//! losing fields the management server may rely on.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Management server path receiving container snapshots
pub const CONTAINERS_PATH: &str = "/agent/containers/";

/// Management server path receiving image listings
pub const IMAGES_PATH: &str = "/agent/images/";

/// Management server path for agent registration
pub const REGISTER_PATH: &str = "/agent/register";

/// Entry of the runtime's container listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSummary {
    pub id: String,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub created: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Result of inspecting a single container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerDetail {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: Value,
    #[serde(default)]
    pub config: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Entry of the runtime's image listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageSummary {
    pub id: String,
    #[serde(default)]
    pub repo_tags: Option<Vec<String>>,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub size: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A container listing entry paired with its inspection detail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSnapshot {
    #[serde(rename = "Container")]
    pub summary: ContainerSummary,
    #[serde(rename = "Meta")]
    pub detail: ContainerDetail,
}

/// Body of a relay request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RelayPayload {
    Containers(Vec<ContainerSnapshot>),
    Images(Vec<ImageSummary>),
}

impl RelayPayload {
    /// Number of snapshot entries carried by the payload
    pub fn len(&self) -> usize {
        match self {
            RelayPayload::Containers(items) => items.len(),
            RelayPayload::Images(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One snapshot plus the management endpoint it is delivered to
#[derive(Debug, Clone, PartialEq)]
pub struct RelayUnit {
    destination_path: String,
    payload: RelayPayload,
}

impl RelayUnit {
    pub fn new(destination_path: impl Into<String>, payload: RelayPayload) -> Self {
        Self {
            destination_path: destination_path.into(),
            payload,
        }
    }

    pub fn containers(snapshots: Vec<ContainerSnapshot>) -> Self {
        Self::new(CONTAINERS_PATH, RelayPayload::Containers(snapshots))
    }

    pub fn images(images: Vec<ImageSummary>) -> Self {
        Self::new(IMAGES_PATH, RelayPayload::Images(images))
    }

    pub fn destination_path(&self) -> &str {
        &self.destination_path
    }

    pub fn payload(&self) -> &RelayPayload {
        &self.payload
    }
}

/// Agent key issued by the management server at registration
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Credential {
    key: String,
}

impl Credential {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Value of the `Authorization` header sent with every relay request
    pub fn authorization(&self) -> String {
        format!("AgentKey:{}", self.key)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential").field("key", &"<redacted>").finish()
    }
}
