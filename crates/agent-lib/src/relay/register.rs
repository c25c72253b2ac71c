//! One-shot registration with the management server

use crate::endpoint;
use crate::error::RelayError;
use crate::models::{Credential, REGISTER_PATH};
use reqwest::Client;
use std::time::Duration;
use tracing::info;
use url::Url;

/// Register this host and obtain its agent key
///
/// Sends `name` and the proxy `port` as a form and expects `{"key": "..."}`.
pub async fn register(
    base_url: &Url,
    name: &str,
    port: u16,
    timeout: Duration,
) -> Result<Credential, RelayError> {
    let url = endpoint::join(base_url, REGISTER_PATH)?;
    info!(url = %url, name = %name, "Registering agent");

    let client = Client::builder().timeout(timeout).build()?;
    let port = port.to_string();
    let response = client
        .post(url)
        .form(&[("name", name), ("port", port.as_str())])
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(RelayError::Status {
            status: status.as_u16(),
            path: REGISTER_PATH.to_string(),
        });
    }

    Ok(response.json::<Credential>().await?)
}
