use crate::config::Config;
use crate::error::{PoolError, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

/// Database connection pool wrapper
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool
    pub async fn new(config: &Config) -> Result<Self> {
        let database_url = config.database_url();

        info!(
            host = %config.database.host,
            port = %config.database.port,
            database = %config.database.name,
            "Connecting to database"
        );

        let pool = PgPoolOptions::new()
            .min_connections(config.database.min_connections)
            .max_connections(config.database.max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(30 * 60))
            .max_lifetime(Duration::from_secs(60 * 60))
            .connect(&database_url)
            .await
            .map_err(|e| PoolError::DatabaseConnection(e.to_string()))?;

        info!("Database connection pool established");

        Ok(Database { pool })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        super::migrations::run_migrations(&self.pool).await?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Close the connection pool
    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }
}
