use async_trait::async_trait;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use tracing::{info, warn};

use super::{ensure_scored, ProxyStore};
use crate::error::{PoolError, Result};
use crate::models::{AnonymityTier, ProxyCandidate, ProxyFilter, TransportCapability};

const SELECT_COLUMNS: &str = r#"
    SELECT host, port, transport, anonymity, latency, region, score, disabled_destinations
    FROM proxies
"#;

/// Row shape of the `proxies` table
#[derive(Debug, FromRow)]
struct ProxyRow {
    host: String,
    port: i32,
    transport: i16,
    anonymity: i16,
    latency: f64,
    region: Option<String>,
    score: i32,
    disabled_destinations: Vec<String>,
}

impl TryFrom<ProxyRow> for ProxyCandidate {
    type Error = PoolError;

    fn try_from(row: ProxyRow) -> Result<Self> {
        let port = u16::try_from(row.port).map_err(|_| {
            PoolError::InvalidProxyAddress(format!("{} has invalid port {}", row.host, row.port))
        })?;
        let transport = TransportCapability::from_code(row.transport).ok_or_else(|| {
            PoolError::Internal(format!("{} has unknown transport code {}", row.host, row.transport))
        })?;
        let anonymity = AnonymityTier::from_code(row.anonymity).ok_or_else(|| {
            PoolError::Internal(format!("{} has unknown anonymity code {}", row.host, row.anonymity))
        })?;

        Ok(ProxyCandidate {
            host: row.host,
            port,
            transport,
            anonymity,
            latency: row.latency,
            region: row.region,
            score: row.score,
            disabled_destinations: row.disabled_destinations,
        })
    }
}

fn into_candidates(rows: Vec<ProxyRow>) -> Result<Vec<ProxyCandidate>> {
    rows.into_iter().map(ProxyCandidate::try_from).collect()
}

/// Append the WHERE clause for a consumer filter
fn push_filter(query: &mut QueryBuilder<'_, Postgres>, filter: &ProxyFilter) {
    let accepted: Vec<i16> = filter.transport.accepted().iter().map(|t| t.code()).collect();
    query.push(" WHERE transport = ANY(").push_bind(accepted).push(")");

    if let Some(ref destination) = filter.destination {
        query
            .push(" AND NOT (")
            .push_bind(destination.clone())
            .push(" = ANY(disabled_destinations))");
    }

    if let Some(ceiling) = filter.anonymity_ceiling {
        query
            .push(" AND anonymity >= 0 AND anonymity <= ")
            .push_bind(ceiling.code());
    }
}

/// LIMIT bind value; anything past `i64::MAX` means no practical limit
fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// PostgreSQL-backed pool store
#[derive(Clone)]
pub struct PgProxyStore {
    pool: PgPool,
}

impl PgProxyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProxyStore for PgProxyStore {
    async fn insert_if_absent(&self, candidate: &ProxyCandidate) -> Result<bool> {
        ensure_scored(candidate)?;
        let result = sqlx::query(
            r#"
            INSERT INTO proxies (host, port, transport, anonymity, latency, region, score, disabled_destinations)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (host) DO NOTHING
            "#,
        )
        .bind(&candidate.host)
        .bind(i32::from(candidate.port))
        .bind(candidate.transport.code())
        .bind(candidate.anonymity.code())
        .bind(candidate.latency)
        .bind(&candidate.region)
        .bind(candidate.score)
        .bind(&candidate.disabled_destinations)
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() > 0;
        if inserted {
            info!(address = %candidate.address(), "Inserted proxy");
        } else {
            warn!(host = %candidate.host, port = candidate.port, "Proxy already pooled");
        }

        Ok(inserted)
    }

    async fn update_health(&self, candidate: &ProxyCandidate) -> Result<bool> {
        ensure_scored(candidate)?;
        let result = sqlx::query(
            r#"
            UPDATE proxies
            SET port = $2,
                transport = $3,
                anonymity = $4,
                latency = $5,
                score = $6
            WHERE host = $1
            "#,
        )
        .bind(&candidate.host)
        .bind(i32::from(candidate.port))
        .bind(candidate.transport.code())
        .bind(candidate.anonymity.code())
        .bind(candidate.latency)
        .bind(candidate.score)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, host: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM proxies WHERE host = $1")
            .bind(host)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, host: &str) -> Result<Option<ProxyCandidate>> {
        let mut query = QueryBuilder::<Postgres>::new(SELECT_COLUMNS);
        query.push(" WHERE host = ").push_bind(host);

        let row: Option<ProxyRow> = query.build_query_as().fetch_optional(&self.pool).await?;
        row.map(ProxyCandidate::try_from).transpose()
    }

    async fn all(&self) -> Result<Vec<ProxyCandidate>> {
        let rows: Vec<ProxyRow> = sqlx::query_as(SELECT_COLUMNS)
            .fetch_all(&self.pool)
            .await?;

        into_candidates(rows)
    }

    async fn find_matching(
        &self,
        filter: &ProxyFilter,
        limit: Option<usize>,
    ) -> Result<Vec<ProxyCandidate>> {
        let mut query = QueryBuilder::<Postgres>::new(SELECT_COLUMNS);
        push_filter(&mut query, filter);
        query.push(" ORDER BY score DESC, latency ASC, host ASC");

        if let Some(limit) = limit {
            query.push(" LIMIT ").push_bind(sql_limit(limit));
        }

        let rows: Vec<ProxyRow> = query.build_query_as().fetch_all(&self.pool).await?;
        into_candidates(rows)
    }

    async fn count_matching(&self, filter: &ProxyFilter) -> Result<i64> {
        let mut query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM proxies");
        push_filter(&mut query, filter);

        let total: i64 = query.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(total)
    }

    async fn count(&self) -> Result<i64> {
        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM proxies")
            .fetch_one(&self.pool)
            .await?;

        Ok(total)
    }

    async fn add_disabled_destination(&self, host: &str, destination: &str) -> Result<bool> {
        // Single statement so concurrent calls for the same pair cannot both append.
        let result = sqlx::query(
            r#"
            UPDATE proxies
            SET disabled_destinations = CASE
                    WHEN $2 = ANY(disabled_destinations) THEN disabled_destinations
                    ELSE array_append(disabled_destinations, $2)
                END
            WHERE host = $1
            "#,
        )
        .bind(host)
        .bind(destination)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
