//! Health check endpoint

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::api::server::AppState;
use crate::error::PoolError;

/// Liveness plus pool size and the most recent sweep
pub async fn health_check(State(state): State<AppState>) -> Result<impl IntoResponse, PoolError> {
    let pool_size = state.store.count().await?;
    let last_sweep = state.sweeps.borrow().clone();

    Ok((
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "proxy-pool",
            "pool_size": pool_size,
            "uptime_secs": state.started_at.elapsed().as_secs(),
            "last_sweep": last_sweep,
        })),
    ))
}
