//! Persistence for the proxy pool
//!
//! The pool is a single collection of `ProxyCandidate`s keyed by host. Two
//! backends implement `ProxyStore`: PostgreSQL for deployments and an
//! in-process map for single-binary runs and tests.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgProxyStore;

use async_trait::async_trait;

use crate::error::{PoolError, Result};
use crate::models::{ProxyCandidate, ProxyFilter};

/// Reject candidates whose score says they should have been evicted
pub(crate) fn ensure_scored(candidate: &ProxyCandidate) -> Result<()> {
    if candidate.score <= 0 {
        return Err(PoolError::Internal(format!(
            "refusing to store {} with score {}",
            candidate.host, candidate.score
        )));
    }
    Ok(())
}

/// Storage operations the health engine and the query surface rely on
///
/// Every operation on one key is atomic with respect to operations on other
/// keys. Implementations reject a candidate whose score is not positive.
#[async_trait]
pub trait ProxyStore: Send + Sync {
    /// Insert a new candidate. Returns false (and logs) when the host is already pooled.
    async fn insert_if_absent(&self, candidate: &ProxyCandidate) -> Result<bool>;

    /// Overwrite the candidate's port, health fields and score.
    ///
    /// `disabled_destinations` is left untouched so consumer feedback that lands
    /// during a sweep is never lost. Returns false when the host is not pooled.
    async fn update_health(&self, candidate: &ProxyCandidate) -> Result<bool>;

    /// Remove a candidate by host. Returns true when a row was removed.
    async fn delete(&self, host: &str) -> Result<bool>;

    async fn get(&self, host: &str) -> Result<Option<ProxyCandidate>>;

    /// Every pooled candidate, in no particular order
    async fn all(&self) -> Result<Vec<ProxyCandidate>>;

    /// Candidates matching `filter`, ranked by score desc then latency asc
    async fn find_matching(
        &self,
        filter: &ProxyFilter,
        limit: Option<usize>,
    ) -> Result<Vec<ProxyCandidate>>;

    async fn count_matching(&self, filter: &ProxyFilter) -> Result<i64>;

    /// Total number of pooled candidates
    async fn count(&self) -> Result<i64>;

    /// Add `destination` to the host's disabled set if not already present.
    ///
    /// Returns false when the host is not pooled.
    async fn add_disabled_destination(&self, host: &str, destination: &str) -> Result<bool>;
}
