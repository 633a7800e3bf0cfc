//! API route definitions

use axum::routing::get;
use axum::Router;

use super::handlers;
use super::server::AppState;

/// Create the API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/random", get(handlers::proxy::random_proxy))
        .route("/proxies", get(handlers::proxy::list_proxies))
        .route("/disable_domain", get(handlers::proxy::disable_domain))
        .with_state(state)
}
