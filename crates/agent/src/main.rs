//! Relay Agent - container runtime proxy and inventory relay
//!
//! Runs on each container host: forwards management traffic to the local
//! runtime API and periodically relays container and image snapshots to the
//! management server.

use anyhow::{Context, Result};
use clap::Parser;
use relay_agent_lib::{
    collector::CollectionLoopBuilder,
    health::{components, HealthRegistry},
    observability::StructuredLogger,
    proxy::{self, logging_observer, ProxyConfig, ProxyState},
    relay::{self, delivery_queue, RelaySender},
    runtime::{DockerClient, RuntimeClient},
    Credential,
};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

use crate::config::{AgentConfig, Cli, LogFormat};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AgentConfig::load(&cli)?;
    init_tracing(config.log_format);

    let logger = StructuredLogger::new(&config.name);

    if cli.register {
        let credential = register(&config, &logger).await?;
        println!("{}", credential.key());
        return Ok(());
    }

    let credential = match &config.key {
        Some(key) => Credential::new(key.clone()),
        None => register(&config, &logger).await?,
    };

    run(config, Arc::new(credential), logger).await
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer()).init(),
    }
}

async fn register(config: &AgentConfig, logger: &StructuredLogger) -> Result<Credential> {
    let credential = relay::register(
        &config.manager_url,
        logger.host(),
        config.listen_port,
        config.request_timeout(),
    )
    .await
    .with_context(|| format!("Failed to register with {}", config.manager_url))?;

    logger.log_registered(config.manager_url.as_str());
    Ok(credential)
}

async fn run(config: AgentConfig, credential: Arc<Credential>, logger: StructuredLogger) -> Result<()> {
    // Installed before any port is bound so a stop request is never missed
    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    let health = HealthRegistry::new();
    for name in components::ALL {
        health.register(name).await;
    }

    let proxy_listener = proxy::bind(config.listen_port).await?;
    let status_listener = if config.status_port != 0 {
        Some(api::bind(config.status_port).await?)
    } else {
        None
    };

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let runtime: Arc<dyn RuntimeClient> = Arc::new(DockerClient::new(
        config.runtime_url.as_str(),
        config.request_timeout(),
    )?);

    let (producer, consumer) = delivery_queue(config.queue_capacity)?;

    let sender = RelaySender::new(
        config.manager_url.clone(),
        credential,
        config.request_timeout(),
        consumer,
        logger.clone(),
    )?
    .with_health(health.clone());

    let scheduler = CollectionLoopBuilder::new()
        .runtime(runtime)
        .producer(producer)
        .interval(config.interval())
        .drain_timeout(config.drain_timeout())
        .health(health.clone())
        .build()?;

    let proxy_state = Arc::new(ProxyState::new(
        ProxyConfig::new(config.runtime_url.clone()),
        logging_observer(logger.clone()),
    )?);

    let mut sender_handle = tokio::spawn(sender.run());
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_tx.subscribe()));
    let mut proxy_handle = tokio::spawn(proxy::serve(
        proxy_listener,
        proxy_state,
        wait_for_shutdown(shutdown_tx.subscribe()),
    ));
    let mut status_handle = status_listener.map(|listener| {
        let state = Arc::new(api::AppState::new(health.clone()));
        tokio::spawn(api::serve(
            listener,
            state,
            wait_for_shutdown(shutdown_tx.subscribe()),
        ))
    });

    health.set_ready(true).await;
    logger.log_startup(
        AGENT_VERSION,
        config.manager_url.as_str(),
        config.listen_port,
        config.interval_secs,
    );

    // A proxy that cannot serve is fatal; a lost status server is reported and tolerated
    let proxy_exit = loop {
        tokio::select! {
            interrupted = tokio::signal::ctrl_c() => {
                interrupted.context("Failed to listen for shutdown signal")?;
                logger.log_shutdown("SIGINT received");
                break None;
            }
            _ = terminate.recv() => {
                logger.log_shutdown("SIGTERM received");
                break None;
            }
            joined = &mut proxy_handle => {
                let reason = exit_reason(&joined);
                health.set_unhealthy(components::PROXY, reason.clone()).await;
                logger.log_shutdown(&reason);
                break Some(joined);
            }
            joined = status_exit(&mut status_handle), if status_handle.is_some() => {
                status_handle = None;
                error!(
                    error = %exit_reason(&joined),
                    "Status server stopped, health and metrics endpoints unavailable"
                );
            }
        }
    };

    health.set_ready(false).await;
    let _ = shutdown_tx.send(());

    // Stopping the scheduler drops the last producer, which lets the sender drain
    let loop_stats = scheduler_handle.await.context("Scheduler task panicked")?;
    info!(
        ticks = loop_stats.ticks,
        completed = loop_stats.completed,
        failed = loop_stats.failed,
        aborted = loop_stats.aborted,
        "Scheduler stopped"
    );

    match tokio::time::timeout(config.drain_timeout(), &mut sender_handle).await {
        Ok(joined) => {
            let stats = joined.context("Relay sender task panicked")?;
            info!(sent = stats.sent, failed = stats.failed, "Relay sender drained");
        }
        Err(_) => {
            warn!(
                timeout_secs = config.drain_timeout_secs,
                "Drain timeout reached, dropping undelivered snapshots"
            );
            sender_handle.abort();
        }
    }

    if let Some(handle) = status_handle {
        if let Err(e) = handle.await.context("Status server task panicked")? {
            warn!(error = %format!("{:#}", e), "Status server exited with error");
        }
    }

    let proxy_result = match proxy_exit {
        Some(joined) => joined,
        None => proxy_handle.await,
    };
    proxy_result.context("Proxy task panicked")??;

    info!("Shutdown complete");
    Ok(())
}

type ServerExit = Result<Result<()>, JoinError>;

fn exit_reason(joined: &ServerExit) -> String {
    match joined {
        Ok(Ok(())) => "server stopped".to_string(),
        Ok(Err(e)) => format!("{:#}", e),
        Err(e) => e.to_string(),
    }
}

async fn status_exit(handle: &mut Option<JoinHandle<Result<()>>>) -> ServerExit {
    match handle {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

async fn wait_for_shutdown(mut shutdown: broadcast::Receiver<()>) {
    let _ = shutdown.recv().await;
}
