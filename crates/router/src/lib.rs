pub mod dispatcher;
pub mod error;
pub mod ordering;
pub mod storage;
pub mod subscriber;
pub mod ws;

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use hotline_protocol::iso_now;

pub use error::RouterError;
use storage::ClientRegistry;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ClientRegistry>,
    /// SUB endpoint, echoed by /health for operators.
    pub events_endpoint: String,
}

pub fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    let cors = if allowed_origins.iter().any(|o| o == "*") {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        let origins: Vec<axum::http::HeaderValue> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(origins).allow_methods(Any).allow_headers(Any)
    };

    Router::new()
        .route("/listening", get(ws::ws_upgrade))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "clients": state.registry.count(),
        "endpoint": state.events_endpoint,
        "ts": iso_now(),
    }))
}
