//! archivist server binary.

use anyhow::{Context, Result};
use archivist_core::config::AppConfig;
use archivist_server::archival::spawn_sweep_loop;
use archivist_server::dispatcher::{TaskQueue, WorkerPool};
use archivist_server::{AppState, create_router};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long shutdown waits for queued tasks before giving up on them.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// archivist - DAG node store and archival tracker
#[derive(Parser, Debug)]
#[command(name = "archivistd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "ARCHIVIST_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "archivist=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("archivist v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    archivist_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let metadata = archivist_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize node store")?;
    metadata
        .health_check()
        .await
        .context("node store health check failed")?;
    tracing::info!("Node store initialized");

    let cache = archivist_storage::from_config(&config.cache)
        .await
        .context("failed to initialize cache storage")?;
    cache
        .health_check()
        .await
        .context("cache storage health check failed")?;
    tracing::info!(backend = cache.backend_name(), "Cache storage initialized");

    let blockstore = archivist_storage::blockstore_from_config(&config.blockstore)
        .await
        .context("failed to initialize blockstore")?;
    tracing::info!(backend = blockstore.backend_name(), "Blockstore initialized");

    let (queue, receiver) = TaskQueue::new(config.tasks.max_retries);
    let state = AppState::new(
        config.clone(),
        metadata,
        cache,
        blockstore,
        Arc::new(queue.clone()),
    );

    let cancel = CancellationToken::new();
    let pool = WorkerPool::new(
        receiver,
        queue.clone(),
        state.handler_registry(),
        config.tasks.clone(),
        cancel.clone(),
    );
    let pool_handle = tokio::spawn(pool.run());

    let sweep_handle = if config.archival.sweep_enabled {
        Some(spawn_sweep_loop(state.tracker.clone(), cancel.clone()))
    } else {
        tracing::info!("Archival sweep disabled");
        None
    };

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let in-flight and backed-off tasks settle before stopping workers.
    if !queue.wait_idle(SHUTDOWN_DRAIN_TIMEOUT).await {
        tracing::warn!(
            outstanding = queue.outstanding(),
            "Shutting down with tasks still queued; the next sweep will republish them"
        );
    }
    cancel.cancel();

    if let Err(e) = pool_handle.await {
        tracing::error!(error = %e, "Task worker pool panicked");
    }
    if let Some(handle) = sweep_handle
        && let Err(e) = handle.await
    {
        tracing::error!(error = %e, "Archival sweep loop panicked");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Load configuration from an optional TOML file plus `ARCHIVIST_` env vars.
fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();

    if std::path::Path::new(path).exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}", path);
    }

    figment
        .merge(Env::prefixed("ARCHIVIST_").split("__"))
        .extract()
        .context("failed to load configuration")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
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
    tracing::info!("Shutdown signal received");
}
