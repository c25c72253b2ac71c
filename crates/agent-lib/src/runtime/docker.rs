//! Docker Engine HTTP API client

use super::{async_trait, RuntimeClient};
use crate::endpoint;
use crate::error::RuntimeError;
use crate::models::{ContainerDetail, ContainerSummary, ImageSummary};
use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Runtime client for a Docker-compatible engine reachable over HTTP
pub struct DockerClient {
    client: Client,
    base_url: Url,
}

impl DockerClient {
    /// Create a new client for the engine at `base_url`
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to create runtime HTTP client")?;

        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid runtime URL: {}", base_url))?;

        Ok(Self { client, base_url })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, RuntimeError> {
        let url = endpoint::join(&self.base_url, path)?;
        debug!(url = %url, "Querying runtime");

        let response = self.client.get(url).query(query).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RuntimeError::Status {
                status: status.as_u16(),
                path: path.to_string(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}

fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

#[async_trait]
impl RuntimeClient for DockerClient {
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>, RuntimeError> {
        self.get_json("/containers/json", &[("all", flag(all))]).await
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetail, RuntimeError> {
        let path = format!("/containers/{}/json", id);
        match self.get_json(&path, &[]).await {
            Err(RuntimeError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Err(RuntimeError::NotFound(id.to_string()))
            }
            other => other,
        }
    }

    async fn list_images(&self, all: bool) -> Result<Vec<ImageSummary>, RuntimeError> {
        self.get_json("/images/json", &[("all", flag(all))]).await
    }
}
