//! Avalanche swap relayer - custodial cross-chain atomic export/import swaps
//!
//! This relayer builds atomic export and import transactions between the C, X
//! and P chains, has them signed by a custody service, broadcasts them, and
//! tracks each swap until both legs are accepted.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

mod api;
mod chain;
mod codec;
mod config;
mod coordination;
mod custody;
mod error;
mod metrics;
mod state;
mod tx;

use chain::{AvalancheClient, LedgerRpc, NetworkParams};
use config::Settings;
use coordination::{AtomicTxProcessor, CoordinationEngine, SwapOrchestrator};
use custody::{CustodyClient, KeyRing};
use metrics::MetricsServer;
use state::{PgStore, Store};
use tx::TxBuilder;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Avalanche swap relayer v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    let params = NetworkParams::from_config(&settings.network)?;
    let keys = Arc::new(KeyRing::from_config(&settings.keys, &params.hrp)?);
    info!(
        "Loaded configuration for network {} with {} keys",
        params.network_id,
        settings.keys.len()
    );

    // Initialize database connection
    let pg = PgStore::new(&settings.database).await?;
    info!("Database connection established");

    // Run migrations
    pg.run_migrations().await?;
    info!("Database migrations complete");
    let store: Arc<dyn Store> = Arc::new(pg);

    // Remote collaborators
    let ledger: Arc<dyn LedgerRpc> = Arc::new(AvalancheClient::new(
        &settings.network.rpc_url,
        settings.network.request_timeout_secs,
    )?);
    let custody = Arc::new(CustodyClient::new(&settings.custody)?);

    // Initialize coordination engine
    let processor = Arc::new(AtomicTxProcessor::new(
        store.clone(),
        custody,
        ledger.clone(),
        keys.clone(),
        settings.processor.max_attempts,
    ));
    let orchestrator = Arc::new(SwapOrchestrator::new(
        store.clone(),
        ledger.clone(),
        keys,
        TxBuilder::new(params),
    ));
    let coordination_engine = Arc::new(CoordinationEngine::new(
        store.clone(),
        processor,
        orchestrator.clone(),
        settings.processor.clone(),
    ));
    info!("Coordination engine initialized");

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let state = api::AppState {
            store: store.clone(),
            orchestrator,
            ledger: ledger.clone(),
        };
        async move {
            if let Err(e) = api::run_server(config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Start coordination engine
    let coordination_handle = tokio::spawn({
        let engine = coordination_engine.clone();
        async move {
            if let Err(e) = engine.run().await {
                error!("Coordination engine error: {}", e);
            }
        }
    });

    // Health check loop
    let health_handle = tokio::spawn({
        let store = store.clone();
        let ledger = ledger.clone();
        let interval = settings.processor.health_check_interval_secs;
        async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(interval)).await;

                let ledger_ok = ledger.health_check().await;
                if !ledger_ok {
                    warn!("Ledger node health check failed");
                }

                let store_ok = match store.stats().await {
                    Ok(stats) => {
                        metrics::record_state_counts(&stats);
                        true
                    }
                    Err(e) => {
                        warn!("Database health check failed: {}", e);
                        false
                    }
                };

                if ledger_ok && store_ok {
                    metrics::record_health_check();
                } else {
                    metrics::record_health_check_failure();
                }
            }
        }
    });

    info!("Avalanche swap relayer is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Graceful shutdown
    coordination_engine.stop().await;

    // Abort background tasks
    api_handle.abort();
    coordination_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Avalanche swap relayer stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,avax_swap_relayer=debug,sqlx=warn,hyper=warn")
    });

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
