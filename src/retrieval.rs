//! Serving proxies to consumers
//!
//! Matches are always ranked by score then latency. A single pick is drawn
//! uniformly from the top of that ranking so load spreads across the best
//! candidates instead of hammering the very first one.

use std::sync::Arc;

use rand::seq::SliceRandom;
use tracing::{debug, info};

use crate::error::Result;
use crate::models::{ProxyCandidate, ProxyFilter};
use crate::repository::ProxyStore;

/// Filtered, ranked and randomized selection over the store
#[derive(Clone)]
pub struct RetrievalEngine {
    store: Arc<dyn ProxyStore>,
    candidate_window: usize,
}

impl RetrievalEngine {
    pub fn new(store: Arc<dyn ProxyStore>, candidate_window: usize) -> Self {
        Self {
            store,
            candidate_window: candidate_window.max(1),
        }
    }

    pub fn candidate_window(&self) -> usize {
        self.candidate_window
    }

    /// One random candidate from the top `candidate_window` matches
    pub async fn select(&self, filter: &ProxyFilter) -> Result<Option<ProxyCandidate>> {
        let window = self
            .store
            .find_matching(filter, Some(self.candidate_window))
            .await?;

        let picked = window.choose(&mut rand::thread_rng()).cloned();
        debug!(
            window = window.len(),
            picked = ?picked.as_ref().map(|c| c.address()),
            "Selected proxy"
        );
        Ok(picked)
    }

    /// Up to `limit` ranked matches; 0 returns every match
    pub async fn select_many(&self, filter: &ProxyFilter, limit: usize) -> Result<Vec<ProxyCandidate>> {
        let limit = (limit > 0).then_some(limit);
        self.store.find_matching(filter, limit).await
    }

    pub async fn count(&self, filter: &ProxyFilter) -> Result<i64> {
        self.store.count_matching(filter).await
    }

    /// Stop handing out `host` for `destination`.
    ///
    /// Idempotent and leaves the score alone. Returns false when the host is
    /// not pooled.
    pub async fn disable_destination(&self, host: &str, destination: &str) -> Result<bool> {
        let found = self.store.add_disabled_destination(host, destination).await?;
        if found {
            info!(host, destination, "Disabled destination for proxy");
        }
        Ok(found)
    }
}

/// `scheme://host:port` when the consumer asked for a protocol, else `host:port`
pub fn render_address(candidate: &ProxyCandidate, filter: &ProxyFilter) -> String {
    match filter.transport.scheme() {
        Some(scheme) => format!("{}://{}", scheme, candidate.address()),
        None => candidate.address(),
    }
}
