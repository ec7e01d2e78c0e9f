pub mod health;
pub mod ingest;
pub mod positions;
pub mod trades;

use crate::db::Repository;
use crate::ingest::CycleIngestor;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub ingestor: Arc<CycleIngestor>,
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/ingest", post(ingest::ingest_cycle))
        .route(
            "/v1/positions/history",
            get(positions::get_positions_history),
        )
        .route("/v1/lifecycles", get(positions::get_lifecycles))
        .route("/v1/trades", get(trades::get_trades))
        .layer(cors)
        .with_state(state)
}
