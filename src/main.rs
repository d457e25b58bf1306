//! Entity Cache - dashboard cache server for SNS governance data
//!
//! Serves per-principal neuron lists and the SNS directory from a durable,
//! deduplicating, stale-while-refresh cache in front of the governance gateway.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use entity_cache::storage::{DurableStorage, FileStorage, MemoryStorage};
use entity_cache::upstream::HttpEntitySource;
use entity_cache::{create_router, spawn_prune_task, AppState, Config};

/// Main entry point for the entity cache server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Open durable storage and the upstream client
/// 4. Start background prune tasks
/// 5. Create Axum router with all endpoints
/// 6. Start HTTP server on configured port
/// 7. Handle graceful shutdown on SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber with env filter
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "entity_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Entity Cache Server");

    // Load configuration from environment variables
    let config = Config::from_env();
    info!(
        "Configuration loaded: fresh_for={}s, max_memory_entries={}, port={}, upstream={}",
        config.fresh_for, config.max_memory_entries, config.server_port, config.upstream_url
    );

    let storage: Arc<dyn DurableStorage> = match &config.storage_dir {
        Some(dir) => {
            info!("Durable storage at {}", dir.display());
            Arc::new(FileStorage::open(dir.clone())?)
        }
        None => {
            warn!("STORAGE_DIR not set, entries will not survive a restart");
            Arc::new(MemoryStorage::new())
        }
    };
    let source = Arc::new(HttpEntitySource::new(
        &config.upstream_url,
        config.upstream_timeout(),
    )?);

    // Create application state with one cache per collection
    let state = AppState::from_config(&config, storage, source);
    info!("Caches initialized");

    // Start background prune tasks
    let prune_handles = vec![
        spawn_prune_task(
            state.neurons.clone(),
            config.prune_interval(),
            config.max_entry_age(),
        ),
        spawn_prune_task(
            state.snses.clone(),
            config.prune_interval(),
            config.max_entry_age(),
        ),
    ];
    info!("Background prune tasks started");

    // Create router with all endpoints
    let app = create_router(state);

    // Bind to configured port
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    // Start server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(prune_handles))
        .await
        .context("server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
///
/// On shutdown signal, aborts the prune tasks and allows graceful shutdown.
async fn shutdown_signal(prune_handles: Vec<JoinHandle<()>>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    for handle in prune_handles {
        handle.abort();
    }
    warn!("Prune tasks aborted");
}
