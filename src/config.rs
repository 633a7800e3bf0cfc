use crate::error::{PoolError, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Query API configuration
    pub api: ApiServerConfig,
    /// Which store backend holds the pool
    pub store: StoreBackend,
    /// Database configuration (used by the postgres backend)
    pub database: DatabaseConfig,
    /// Scoring and selection parameters
    pub pool: PoolConfig,
    /// Capability probe configuration
    pub probe: ProbeConfig,
    /// Revalidation sweep configuration
    pub sweep: SweepConfig,
    /// Candidate ingestion configuration
    pub ingest: IngestConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Port for the API server (default: 16888)
    pub port: u16,
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(StoreBackend::Postgres),
            "memory" | "mem" => Ok(StoreBackend::Memory),
            other => Err(PoolError::InvalidConfig(format!(
                "STORE_BACKEND has unsupported value: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database host
    pub host: String,
    /// Database port
    pub port: u16,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Database name
    pub name: String,
    /// SSL mode (disable, require, prefer)
    pub ssl_mode: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Minimum connections in pool
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Score a candidate gets on every successful probe
    pub max_score: i32,
    /// How many top-ranked matches a random pick is drawn from
    pub candidate_window: usize,
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Per-request timeout
    pub timeout: Duration,
    /// Echo endpoint reached over plain HTTP
    pub plain_url: Url,
    /// Echo endpoint reached over HTTPS
    pub secure_url: Url,
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Number of concurrent probe workers
    pub workers: usize,
    /// Interval between sweeps
    pub interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    /// Registry kind, e.g. `text_list`
    pub kind: String,
    /// Location the source reads from
    pub url: Url,
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Configured candidate sources
    pub sources: Vec<SourceSpec>,
    /// Interval between ingestion rounds
    pub interval: Duration,
    /// Concurrent probes while ingesting
    pub concurrency: usize,
    /// Attempts per source page fetch
    pub retry_attempts: u32,
    /// Base delay between fetch attempts (doubled each retry)
    pub retry_backoff: Duration,
    /// Timeout for source page fetches
    pub fetch_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let max_score: i32 = parse_env("POOL_MAX_SCORE", "50")?;
        if max_score < 1 {
            return Err(PoolError::InvalidConfig(
                "POOL_MAX_SCORE must be at least 1".into(),
            ));
        }

        let candidate_window: usize = parse_env("POOL_CANDIDATE_WINDOW", "20")?;
        if candidate_window == 0 {
            return Err(PoolError::InvalidConfig(
                "POOL_CANDIDATE_WINDOW must be at least 1".into(),
            ));
        }

        let workers: usize = parse_env("SWEEP_WORKERS", "10")?;
        if workers == 0 {
            return Err(PoolError::InvalidConfig(
                "SWEEP_WORKERS must be at least 1".into(),
            ));
        }

        let probe_timeout = Duration::from_secs(parse_env::<u64>("PROBE_TIMEOUT_SECS", "10")?.max(1));

        Ok(Config {
            api: ApiServerConfig {
                port: parse_env("API_PORT", "16888")?,
                host: get_env_or("API_HOST", "0.0.0.0"),
            },
            store: get_env_or("STORE_BACKEND", "postgres").parse()?,
            database: DatabaseConfig {
                host: get_env_or("DB_HOST", "localhost"),
                port: parse_env("DB_PORT", "5432")?,
                user: get_env_or("DB_USER", "proxy_pool"),
                password: get_env_or("DB_PASSWORD", "proxy_pool"),
                name: get_env_or("DB_NAME", "proxy_pool"),
                ssl_mode: get_env_or("DB_SSLMODE", "disable"),
                max_connections: parse_env("DB_MAX_CONNECTIONS", "20")?,
                min_connections: parse_env("DB_MIN_CONNECTIONS", "2")?,
            },
            pool: PoolConfig {
                max_score,
                candidate_window,
            },
            probe: ProbeConfig {
                timeout: probe_timeout,
                plain_url: parse_url("PROBE_PLAIN_URL", "http://httpbin.org/get", "http")?,
                secure_url: parse_url("PROBE_SECURE_URL", "https://httpbin.org/get", "https")?,
            },
            sweep: SweepConfig {
                workers,
                interval: Duration::from_secs(parse_env::<u64>("SWEEP_INTERVAL_SECS", "7200")?.max(1)),
            },
            ingest: IngestConfig {
                sources: parse_sources(&get_env_or("INGEST_SOURCES", ""))?,
                interval: Duration::from_secs(
                    parse_env::<u64>("INGEST_INTERVAL_SECS", "43200")?.max(1),
                ),
                concurrency: parse_env::<usize>("INGEST_CONCURRENCY", "10")?.max(1),
                retry_attempts: parse_env::<u32>("INGEST_RETRY_ATTEMPTS", "3")?.max(1),
                retry_backoff: Duration::from_millis(parse_env("INGEST_RETRY_BACKOFF_MS", "500")?),
                fetch_timeout: probe_timeout,
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "json"),
            },
        })
    }

    /// Get the database connection URL
    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.database.user,
            self.database.password,
            self.database.host,
            self.database.port,
            self.database.name,
            self.database.ssl_mode
        )
    }

    /// Get the API server address
    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }
}

/// Parse `kind:url` entries separated by commas.
///
/// The kind is everything before the first colon, so `text_list:https://host/list`
/// splits into `text_list` and `https://host/list`.
fn parse_sources(raw: &str) -> Result<Vec<SourceSpec>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (kind, location) = entry.split_once(':').ok_or_else(|| {
                PoolError::InvalidConfig(format!(
                    "INGEST_SOURCES entry must be kind:url, got {}",
                    entry
                ))
            })?;
            let url = Url::parse(location.trim()).map_err(|e| {
                PoolError::InvalidConfig(format!("INGEST_SOURCES url {} is invalid: {}", location, e))
            })?;
            Ok(SourceSpec {
                kind: kind.trim().to_lowercase(),
                url,
            })
        })
        .collect()
}

fn parse_url(key: &str, default: &str, scheme: &str) -> Result<Url> {
    let raw = get_env_or(key, default);
    let url = Url::parse(raw.trim())
        .map_err(|e| PoolError::InvalidConfig(format!("{} must be a valid URL: {}", key, e)))?;
    if url.scheme() != scheme {
        return Err(PoolError::InvalidConfig(format!(
            "{} must use the {} scheme",
            key, scheme
        )));
    }
    Ok(url)
}

fn parse_env<T: FromStr>(key: &str, default: &str) -> Result<T> {
    get_env_or(key, default)
        .trim()
        .parse()
        .map_err(|_| PoolError::InvalidConfig(format!("{} must be a valid number", key)))
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
