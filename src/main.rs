//! Proxy pool - entry point
//!
//! Runs the revalidation sweeps, candidate ingestion and the query API until
//! a shutdown signal arrives.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use proxy_pool::api::{ApiServer, AppState};
use proxy_pool::config::{LogConfig, StoreBackend};
use proxy_pool::health::{EchoProbe, Revalidator, RevalidatorConfig, RevalidatorHandle};
use proxy_pool::ingest::{IngestionHandle, Ingestor, SourceRegistry};
use proxy_pool::repository::{MemoryStore, PgProxyStore, ProxyStore};
use proxy_pool::retrieval::RetrievalEngine;
use proxy_pool::{Config, Database};

#[tokio::main]
async fn main() -> proxy_pool::Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config.log);

    info!("Starting proxy pool");

    let mut database = None;
    let store: Arc<dyn ProxyStore> = match config.store {
        StoreBackend::Postgres => {
            let db = Database::new(&config).await?;
            db.run_migrations().await?;
            let store: Arc<dyn ProxyStore> = Arc::new(PgProxyStore::new(db.pool().clone()));
            database = Some(db);
            store
        }
        StoreBackend::Memory => {
            info!("Using in-memory store, the pool will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };
    info!(pool_size = store.count().await?, "Store ready");

    // Unknown source kinds are a startup error.
    let sources = SourceRegistry::new().build_all(&config.ingest)?;

    let probe = Arc::new(EchoProbe::new(config.probe.clone()));

    // Start revalidation
    let revalidator = Arc::new(Revalidator::new(
        store.clone(),
        probe.clone(),
        RevalidatorConfig {
            workers: config.sweep.workers,
            interval: config.sweep.interval,
            max_score: config.pool.max_score,
        },
    ));
    let sweeps = revalidator.reports();
    let (revalidator_handle, revalidator_shutdown) = RevalidatorHandle::new();
    let revalidator_task = tokio::spawn({
        let revalidator = revalidator.clone();
        async move { revalidator.run(revalidator_shutdown).await }
    });

    // Start ingestion
    let ingestor = Ingestor::new(
        sources,
        store.clone(),
        probe,
        config.ingest.concurrency,
        config.ingest.interval,
        config.pool.max_score,
    );
    let (ingestion_handle, ingestion_shutdown) = IngestionHandle::new();
    let ingestion_task = tokio::spawn(async move {
        ingestor.run(ingestion_shutdown).await;
    });

    // Start the query API
    let engine = RetrievalEngine::new(store.clone(), config.pool.candidate_window);
    let api_server = ApiServer::new(config.api.clone(), AppState::new(engine, store, sweeps));
    let (api_shutdown_tx, api_shutdown) = watch::channel(false);
    let api_task = tokio::spawn(async move {
        if let Err(e) = api_server.run(api_shutdown).await {
            error!("API server error: {}", e);
        }
    });

    info!("Proxy pool started - API: {}", config.api_addr());

    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = api_shutdown_tx.send(true);
    revalidator_handle.shutdown();
    ingestion_handle.shutdown();

    let _ = tokio::join!(api_task, revalidator_task, ingestion_task);

    if let Some(db) = database {
        db.close().await;
    }

    info!("Proxy pool stopped");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("proxy_pool={},tower_http=info", log.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if log.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().pretty()).init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
