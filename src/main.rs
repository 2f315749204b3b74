//! Tiercache daemon
//!
//! Opens a cache from environment configuration and keeps its background
//! sweep running until interrupted, then shuts it down cleanly.

use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tiercache::{Config, TieredCache};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info", can be overridden with RUST_LOG
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tiercache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting tiercache");

    let config = Config::from_env();
    info!(
        "Configuration loaded: max_size={} bytes, default_ttl={}s, gc_interval={}s, strategy={}, persistent_dir={:?}, fallback_path={:?}",
        config.max_size,
        config.default_ttl,
        config.gc_interval,
        config.strategy,
        config.persistent_dir,
        config.fallback_path
    );

    let cache = TieredCache::open(config).await?;
    let stats = cache.stats();
    info!(
        "Cache ready: {} entries restored, {} bytes, persistent tier {}",
        stats.persistent_entries.max(stats.fallback_entries),
        stats.total_size,
        if stats.persistent_available { "available" } else { "unavailable" }
    );

    shutdown_signal().await;

    cache.destroy().await;
    info!("Final stats: {}", serde_json::to_string(&cache.stats())?);
    info!("Shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
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
}
