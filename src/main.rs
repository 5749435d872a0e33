use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tracing_subscriber::EnvFilter;

use agent_fleet::agents::AgentOrchestrator;
use agent_fleet::api;
use agent_fleet::config::{ConfigManager, FileConfigManager};
use agent_fleet::processing::BackendFactory;

const CONFIG_PATH_ENV: &str = "AGENT_FLEET_CONFIG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("fleet.toml"));
    let config_manager = FileConfigManager::new(config_path.clone());
    let config = config_manager
        .load_config()
        .await
        .with_context(|| format!("loading {}", config_path.display()))?;
    let config = Arc::new(config);

    tracing::info!("Starting agent fleet with {} agents", config.agents.len());

    let factory = BackendFactory::new(&config.processing)?;
    let mut orchestrator = AgentOrchestrator::from_config(&config, Arc::new(factory))?;

    orchestrator.initialize_all().await;
    if let Err(e) = orchestrator.start_all().await {
        tracing::error!("{}", e);
        if e.is_fatal() {
            std::process::exit(1);
        }
        return Err(e.into());
    }

    let orchestrator = Arc::new(RwLock::new(orchestrator));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let api_task = if config.monitoring.api_enabled {
        let orchestrator = orchestrator.clone();
        let config = config.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.changed().await;
            };
            if let Err(e) = api::start_api_server(orchestrator, config, shutdown).await {
                tracing::error!("API server error: {}", e);
            }
        }))
    } else {
        None
    };

    let mut status_ticker = interval(config.monitoring.status_interval);
    status_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    status_ticker.tick().await;

    let terminate = shutdown_signal();
    tokio::pin!(terminate);

    loop {
        tokio::select! {
            _ = &mut terminate => break,
            _ = status_ticker.tick() => {
                let status = orchestrator.read().await.get_status().await;
                tracing::info!(
                    "Status: {}/{} agents active, {} messages, {} errors",
                    status.active_agents,
                    status.total_agents,
                    status.total_messages,
                    status.total_errors
                );
                for agent in &status.agents {
                    tracing::info!(
                        "  {} ({}): {:?}, {} messages, {} errors",
                        agent.id,
                        agent.channel_kind,
                        agent.status,
                        agent.message_count,
                        agent.error_count
                    );
                }
            }
        }
    }

    tracing::info!("Shutting down...");
    shutdown_tx.send_replace(true);
    drop(shutdown_rx);
    orchestrator.write().await.stop_all().await;
    if let Some(task) = api_task {
        let _ = task.await;
    }

    tracing::info!("Agent fleet stopped.");
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM, initiating graceful shutdown...");
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
