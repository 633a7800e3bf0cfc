//! Proxy pool
//!
//! Harvests public proxies, keeps verifying what they can do, scores their
//! reliability and serves filtered, load-balanced picks to consumers.
//!
//! ## Features
//!
//! - Plain and secure capability probing against an echo endpoint
//! - Anonymity classification (elite, anonymous, transparent)
//! - Score-based decay and eviction with periodic bounded-concurrency sweeps
//! - Ranked, randomized selection with per-destination exclusion
//! - PostgreSQL or in-memory storage
//! - Pluggable candidate sources

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod ingest;
pub mod models;
pub mod repository;
pub mod retrieval;

pub use config::Config;
pub use database::Database;
pub use error::{PoolError, Result};
