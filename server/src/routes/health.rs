//! Liveness endpoint.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use super::now_ms;
use crate::AppState;

#[derive(Serialize)]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
    /// `postgres` or `memory`
    pub store: &'static str,
    pub server_time: u64,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        store: state.store.backend(),
        server_time: now_ms(),
    })
}
