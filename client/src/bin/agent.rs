//! Ferry Agent - runs a sync coordinator against a Ferry server until
//! interrupted, persisting the local cache between runs.

use ferry_client::{ClientConfig, ConfigError, HttpTransport, SyncCoordinator};
use ferry_engine::{CacheSnapshot, MemoryCache, Schema};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ferry_client=info,ferry_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = ClientConfig::from_env()?;

    tracing::info!("Starting Ferry agent against {}", config.base_url);

    let schema = match &config.schema_path {
        Some(path) => load_schema(path).await?,
        None => Schema::new(),
    };

    let cache = Arc::new(MemoryCache::new(config.cache_capacity));
    let transport = Arc::new(HttpTransport::new(
        config.base_url.clone(),
        config.sync.request_timeout,
    )?);
    let coordinator =
        SyncCoordinator::with_schema(config.sync.clone(), transport, cache.clone(), schema);

    if let Some(path) = &config.snapshot_path {
        if tokio::fs::try_exists(path).await? {
            let json = tokio::fs::read_to_string(path).await?;
            let queue = CacheSnapshot::from_json(&json)?.restore(&cache);
            tracing::info!(
                cached = cache.len(),
                pending = queue.len(),
                "Restored snapshot from {}",
                path.display()
            );
            coordinator.restore_queue(queue);
        }
    }

    let handle = coordinator.start();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down, waiting for the current cycle to finish...");
    handle.shutdown().await;

    if let Some(path) = &config.snapshot_path {
        let snapshot = CacheSnapshot::capture(&cache, &coordinator.queue_snapshot());
        tokio::fs::write(path, snapshot.to_json_pretty()?).await?;
        tracing::info!(
            cached = snapshot.entity_count(),
            pending = snapshot.queue.len(),
            "Saved snapshot to {}",
            path.display()
        );
    }

    Ok(())
}

async fn load_schema(path: &Path) -> Result<Schema, ConfigError> {
    let unreadable = |reason: String| ConfigError::Unreadable {
        path: path.display().to_string(),
        reason,
    };

    let json = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| unreadable(e.to_string()))?;
    serde_json::from_str(&json).map_err(|e| unreadable(e.to_string()))
}
