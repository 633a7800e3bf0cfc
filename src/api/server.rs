//! API server using Axum

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use tokio::sync::watch;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::config::ApiServerConfig;
use crate::error::{PoolError, Result};
use crate::health::SweepReport;
use crate::repository::ProxyStore;
use crate::retrieval::RetrievalEngine;

use super::routes;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: RetrievalEngine,
    pub store: Arc<dyn ProxyStore>,
    pub sweeps: watch::Receiver<Option<SweepReport>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        engine: RetrievalEngine,
        store: Arc<dyn ProxyStore>,
        sweeps: watch::Receiver<Option<SweepReport>>,
    ) -> Self {
        Self {
            engine,
            store,
            sweeps,
            started_at: Instant::now(),
        }
    }
}

/// API server
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Build the router
    pub fn build_router(&self) -> Router {
        routes::create_router(self.state.clone())
            .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
            .layer(TraceLayer::new_for_http())
    }

    /// Run the API server until shutdown is signalled
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| PoolError::InvalidConfig(format!("API server address: {}", e)))?;

        let router = self.build_router();
        let listener = tokio::net::TcpListener::bind(addr).await?;

        info!("API server listening on {}", addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .map_err(|e| PoolError::Internal(e.to_string()))?;

        info!("API server shut down");
        Ok(())
    }
}
