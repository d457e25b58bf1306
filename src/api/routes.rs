//! API Routes
//!
//! Configures the Axum router with all dashboard cache endpoints.

use axum::{
    routing::{delete, get},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    clear_all_handler, clear_neurons_handler, health_handler, neurons_handler, snses_handler,
    stats_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `GET /neurons/:governance` - Caller's neurons, `?refresh=true` to force
/// - `GET /snses` - SNS directory, `?refresh=true` to force
/// - `DELETE /cache` - Drop the caller's cached entries
/// - `DELETE /cache/neurons/:governance` - Drop one cached neuron list
/// - `GET /stats` - Get cache statistics
/// - `GET /health` - Health check endpoint
///
/// # Middleware
/// - CORS: Allows any origin (configurable for production)
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    // Configure CORS middleware
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build router with all endpoints
    Router::new()
        .route("/neurons/:governance", get(neurons_handler))
        .route("/snses", get(snses_handler))
        .route("/cache", delete(clear_all_handler))
        .route("/cache/neurons/:governance", delete(clear_neurons_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
