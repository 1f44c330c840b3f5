//! Ferry Server - the authoritative versioned store.
//!
//! Serves the Ferry sync protocol over HTTP: batch pushes with per-item
//! compare-and-swap on entity versions, a change feed ordered by
//! `(updated_at, entity_type, entity_id)`, paged entity listings for full
//! resynchronization and single-entity writes for merged resubmissions.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod store;

use crate::config::Config;
use crate::store::Store;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: Store, config: Config) -> Self {
        Self {
            store: Arc::new(store),
            config: Arc::new(config),
        }
    }

    /// State backed by an in-memory store.
    pub fn in_memory(config: Config) -> Self {
        let store = Store::memory(&config.read_only_entity_types);
        Self::new(store, config)
    }

    /// Drop idempotency records older than the configured retention.
    pub async fn prune_applied(&self, now: u64) -> error::Result<u64> {
        let before = now.saturating_sub(self.config.applied_retention_ms);
        self.store.prune_applied(before).await
    }
}

/// Build the application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
