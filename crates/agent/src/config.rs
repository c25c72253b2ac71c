//! Agent configuration
//!
//! Values are layered: built-in defaults, then an optional config file, then
//! `AGENT_*` environment variables, then command-line flags. The result is
//! one immutable `AgentConfig` handed to every component at startup.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

const DEFAULT_RUNTIME_URL: &str = "http://127.0.0.1:4243";

/// Host agent proxying a container runtime and relaying its inventory
#[derive(Debug, Parser)]
#[command(name = "relay-agent")]
#[command(version, about = "Container runtime proxy and inventory relay agent", long_about = None)]
pub struct Cli {
    /// Container runtime API URL
    #[arg(long = "host", env = "AGENT_HOST")]
    pub runtime_url: Option<String>,

    /// Management server URL
    #[arg(long = "url", env = "AGENT_URL")]
    pub manager_url: Option<String>,

    /// Agent key issued by the management server (registers when absent)
    #[arg(long, env = "AGENT_KEY", hide_env_values = true)]
    pub key: Option<String>,

    /// Seconds between inventory snapshots
    #[arg(long, env = "AGENT_INTERVAL")]
    pub interval: Option<u64>,

    /// Proxy listen port
    #[arg(long, env = "AGENT_PORT")]
    pub port: Option<u16>,

    /// Health and metrics port (0 disables)
    #[arg(long, env = "AGENT_STATUS_PORT")]
    pub status_port: Option<u16>,

    /// Name reported at registration (defaults to the hostname)
    #[arg(long, env = "AGENT_NAME")]
    pub name: Option<String>,

    /// Register with the management server, print the key and exit
    #[arg(long)]
    pub register: bool,

    /// Optional configuration file (TOML, YAML or JSON)
    #[arg(long, env = "AGENT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log output format
    #[arg(long, env = "AGENT_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

impl LogFormat {
    fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Json => "json",
            LogFormat::Text => "text",
        }
    }
}

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Container runtime API base URL
    pub runtime_url: Url,

    /// Management server base URL
    pub manager_url: Url,

    /// Agent key; registration runs at startup when missing
    #[serde(default)]
    pub key: Option<String>,

    /// Name reported at registration
    #[serde(default = "default_name")]
    pub name: String,

    /// Snapshot interval in seconds
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Proxy listen port
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Health/metrics port, 0 to disable
    #[serde(default = "default_status_port")]
    pub status_port: u16,

    /// Snapshots allowed to wait for delivery
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Timeout for runtime and management server requests
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Time allowed at shutdown for in-flight snapshots
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,

    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_name() -> String {
    let name = gethostname::gethostname().to_string_lossy().trim().to_string();
    if name.is_empty() {
        "unknown".to_string()
    } else {
        name
    }
}

fn default_interval() -> u64 {
    5
}

fn default_listen_port() -> u16 {
    4500
}

fn default_status_port() -> u16 {
    4501
}

fn default_queue_capacity() -> usize {
    relay_agent_lib::relay::DEFAULT_QUEUE_CAPACITY
}

fn default_request_timeout() -> u64 {
    relay_agent_lib::relay::DEFAULT_REQUEST_TIMEOUT.as_secs()
}

fn default_drain_timeout() -> u64 {
    10
}

impl AgentConfig {
    /// Load configuration from defaults, the optional file, environment and flags
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut builder = config::Config::builder().set_default("runtime_url", DEFAULT_RUNTIME_URL)?;

        if let Some(path) = &cli.config {
            builder = builder.add_source(config::File::from(path.as_path()));
        }

        let config = builder
            .add_source(config::Environment::with_prefix("AGENT"))
            .set_override_option("runtime_url", cli.runtime_url.clone())?
            .set_override_option("manager_url", cli.manager_url.clone())?
            .set_override_option("key", cli.key.clone())?
            .set_override_option("name", cli.name.clone())?
            .set_override_option("interval_secs", cli.interval)?
            .set_override_option("listen_port", cli.port.map(u64::from))?
            .set_override_option("status_port", cli.status_port.map(u64::from))?
            .set_override_option("log_format", cli.log_format.map(|f| f.as_str()))?
            .build()
            .context("Failed to read configuration")?;

        let config: AgentConfig = config
            .try_deserialize()
            .context("Invalid agent configuration (is --url set?)")?;
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (name, url) in [("runtime", &self.runtime_url), ("management", &self.manager_url)] {
            if !matches!(url.scheme(), "http" | "https") {
                bail!("Unsupported {} URL scheme: {}", name, url);
            }
        }
        if self.interval_secs == 0 {
            bail!("Snapshot interval must be at least one second");
        }
        if self.queue_capacity == 0 {
            bail!("Queue capacity must be at least 1");
        }
        if self.request_timeout_secs == 0 {
            bail!("Request timeout must be at least one second");
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}
