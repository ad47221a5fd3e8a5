//! Stableflow - Multi-chain stablecoin acquisition workflow daemon
//!
//! Drives users' acquisition actions (swaps and registrations) through a
//! guarded multi-step transaction workflow: network check, readiness probe,
//! sequential submission, confirmation watching, and completion recording.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

mod api;
mod chain;
mod config;
mod error;
mod metrics;
mod quote;
mod recorder;
mod store;
mod tx;
mod workflow;

use api::{AppState, WorkflowRegistry};
use chain::{ChainManager, RpcWalletSession};
use config::Settings;
use metrics::MetricsServer;
use quote::{QuoteService, SystemClock};
use recorder::{CompletionPolicy, CompletionRecorder, HttpActionBackend};
use store::Store;
use workflow::EngineFactory;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Stableflow v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration: instance {}, {} chains, {} actions",
        settings.daemon.instance_id,
        settings.enabled_chains().len(),
        settings.actions.len()
    );

    // Initialize database connection
    let store = Arc::new(Store::new(&settings.database).await?);
    info!("Database connection established");

    store.run_migrations().await?;

    // Initialize metrics server
    let metrics_server = if settings.metrics.enabled {
        Some(MetricsServer::new(settings.metrics.port))
    } else {
        None
    };

    // Initialize chain manager (handles all chain connections)
    let chain_manager = Arc::new(ChainManager::new(&settings).await?);
    info!("Chain connections initialized");

    // The daemon wallet session starts on the first enabled chain; workflows
    // switch it as their actions require
    let initial_chain = settings
        .enabled_chains()
        .first()
        .map(|(_, c)| c.chain_id)
        .expect("validated: at least one chain enabled");
    let session = Arc::new(RpcWalletSession::new(chain_manager.clone(), initial_chain));

    // Completion recording: backend client + local shadow store
    let backend = Arc::new(HttpActionBackend::new(
        settings.backend.base_url.clone(),
        Duration::from_secs(settings.backend.request_timeout_secs),
    )?);
    let recorder = Arc::new(CompletionRecorder::new(
        backend,
        store.clone(),
        CompletionPolicy {
            degrade_to_success_on_not_found: settings.backend.degrade_to_success_on_not_found,
        },
    ));

    let factory = Arc::new(EngineFactory::new(
        settings.clone(),
        chain_manager.clone(),
        session,
        recorder,
        store.clone(),
    ));

    let quotes = Arc::new(QuoteService::from_config(
        &settings.quotes,
        Arc::new(SystemClock),
    ));

    let registry = Arc::new(WorkflowRegistry::new());

    // Start API server
    let api_handle = tokio::spawn({
        let state = AppState {
            settings: Arc::new(settings.clone()),
            store: store.clone(),
            chain_manager: chain_manager.clone(),
            registry,
            factory,
            quotes,
        };
        let api_config = settings.api.clone();
        async move {
            if let Err(e) = api::run_server(api_config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = metrics_server.map(|server| {
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        })
    });

    // Health check loop
    let health_handle = tokio::spawn({
        let chain_manager = chain_manager.clone();
        let store = store.clone();
        let interval = settings.daemon.health_check_interval_secs;
        async move {
            loop {
                tokio::time::sleep(Duration::from_secs(interval)).await;

                let health = chain_manager.health_check().await;
                for (chain_id, healthy) in health {
                    if !healthy {
                        warn!("Chain {} health check failed", chain_id);
                    }
                }

                if let Err(e) = store.health_check().await {
                    warn!("Database health check failed: {}", e);
                    metrics::record_health_check_failure();
                } else {
                    metrics::record_health_check();
                }
            }
        }
    });

    info!("Stableflow is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    api_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Stableflow stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,stableflow=debug,sqlx=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
