//! Ferry Server binary.

use ferry_server::config::Config;
use ferry_server::store::Store;
use ferry_server::{app, db, AppState};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const PRUNE_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ferry_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Ferry Server on {}:{}", config.host, config.port);

    let store = match &config.database_url {
        Some(url) => {
            let pool = db::create_pool(url, config.database_max_connections).await?;

            tracing::info!("Running database migrations...");
            db::run_migrations(&pool).await?;

            Store::postgres(pool, &config.read_only_entity_types)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, keeping entities in memory");
            Store::memory(&config.read_only_entity_types)
        }
    };

    if !config.read_only_entity_types.is_empty() {
        tracing::info!(types = ?config.read_only_entity_types, "read-only entity types");
    }

    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::new(store, config);

    let pruner = state.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            ticker.tick().await;
            let now = chrono::Utc::now().timestamp_millis() as u64;
            match pruner.prune_applied(now).await {
                Ok(0) => {}
                Ok(pruned) => tracing::info!(pruned, "pruned applied change records"),
                Err(e) => tracing::warn!(error = %e, "failed to prune applied change records"),
            }
        }
    });

    let app = app(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}
