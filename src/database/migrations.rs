use crate::error::Result;
use sqlx::{Executor, PgPool};
use tracing::info;

/// Run all database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    create_migrations_table(pool).await?;

    for (version, name, sql) in get_migrations() {
        if !is_migration_applied(pool, version).await? {
            info!(version = version, name = name, "Applying migration");

            // A plain &str runs over the simple protocol, so multi-statement scripts work.
            pool.execute(sql).await?;
            record_migration(pool, version, name).await?;

            info!(version = version, name = name, "Migration applied successfully");
        }
    }

    Ok(())
}

/// Create the migrations tracking table
async fn create_migrations_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Check if a migration has been applied
async fn is_migration_applied(pool: &PgPool, version: i32) -> Result<bool> {
    let result = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM schema_migrations WHERE version = $1",
    )
    .bind(version)
    .fetch_one(pool)
    .await?;

    Ok(result > 0)
}

/// Record a migration as applied
async fn record_migration(pool: &PgPool, version: i32, name: &str) -> Result<()> {
    sqlx::query("INSERT INTO schema_migrations (version, name) VALUES ($1, $2)")
        .bind(version)
        .bind(name)
        .execute(pool)
        .await?;

    Ok(())
}

/// Get all migrations in order
fn get_migrations() -> Vec<(i32, &'static str, &'static str)> {
    vec![
        (1, "proxies_table", MIGRATION_001_PROXIES),
        (2, "ranking_index", MIGRATION_002_RANKING_INDEX),
    ]
}

// Migration 1: the pool itself. A row with score 0 must never exist.
const MIGRATION_001_PROXIES: &str = r#"
CREATE TABLE IF NOT EXISTS proxies (
    host VARCHAR(255) PRIMARY KEY,
    port INTEGER NOT NULL CHECK (port BETWEEN 0 AND 65535),
    transport SMALLINT NOT NULL DEFAULT -1,
    anonymity SMALLINT NOT NULL DEFAULT -1,
    latency DOUBLE PRECISION NOT NULL DEFAULT -1,
    region TEXT,
    score INTEGER NOT NULL CHECK (score > 0),
    disabled_destinations TEXT[] NOT NULL DEFAULT '{}',
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE OR REPLACE FUNCTION update_updated_at_column()
RETURNS TRIGGER AS $$
BEGIN
    NEW.updated_at = NOW();
    RETURN NEW;
END;
$$ language 'plpgsql';

DROP TRIGGER IF EXISTS update_proxies_updated_at ON proxies;
CREATE TRIGGER update_proxies_updated_at
    BEFORE UPDATE ON proxies
    FOR EACH ROW
    EXECUTE FUNCTION update_updated_at_column();
"#;

// Migration 2: serve queries in ranking order without a sort
const MIGRATION_002_RANKING_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_proxies_ranking ON proxies(score DESC, latency ASC);
CREATE INDEX IF NOT EXISTS idx_proxies_transport ON proxies(transport);
"#;
