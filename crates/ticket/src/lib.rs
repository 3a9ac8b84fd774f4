pub mod error;
pub mod lb;
pub mod routes;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub use error::TicketError;
pub use lb::LoadBalancer;
pub use routes::TicketState;

pub fn build_router(state: TicketState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/ticketGeneration", post(routes::ticket_generation))
        .route("/health", get(routes::health))
        .route("/lb-stats", get(routes::lb_stats))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
