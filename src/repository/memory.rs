use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{info, warn};

use super::{ensure_scored, ProxyStore};
use crate::error::Result;
use crate::models::{rank_order, ProxyCandidate, ProxyFilter};

/// In-process store backed by a concurrent map
#[derive(Debug, Default)]
pub struct MemoryStore {
    proxies: DashMap<String, ProxyCandidate>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            proxies: DashMap::new(),
        }
    }
}

#[async_trait]
impl ProxyStore for MemoryStore {
    async fn insert_if_absent(&self, candidate: &ProxyCandidate) -> Result<bool> {
        ensure_scored(candidate)?;
        match self.proxies.entry(candidate.host.clone()) {
            Entry::Occupied(_) => {
                warn!(host = %candidate.host, port = candidate.port, "Proxy already pooled");
                Ok(false)
            }
            Entry::Vacant(slot) => {
                slot.insert(candidate.clone());
                info!(address = %candidate.address(), "Inserted proxy");
                Ok(true)
            }
        }
    }

    async fn update_health(&self, candidate: &ProxyCandidate) -> Result<bool> {
        ensure_scored(candidate)?;
        match self.proxies.get_mut(&candidate.host) {
            Some(mut current) => {
                current.port = candidate.port;
                current.transport = candidate.transport;
                current.anonymity = candidate.anonymity;
                current.latency = candidate.latency;
                current.score = candidate.score;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, host: &str) -> Result<bool> {
        Ok(self.proxies.remove(host).is_some())
    }

    async fn get(&self, host: &str) -> Result<Option<ProxyCandidate>> {
        Ok(self.proxies.get(host).map(|entry| entry.value().clone()))
    }

    async fn all(&self) -> Result<Vec<ProxyCandidate>> {
        Ok(self
            .proxies
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn find_matching(
        &self,
        filter: &ProxyFilter,
        limit: Option<usize>,
    ) -> Result<Vec<ProxyCandidate>> {
        let mut matches: Vec<ProxyCandidate> = self
            .proxies
            .iter()
            .filter(|entry| entry.value().matches(filter))
            .map(|entry| entry.value().clone())
            .collect();

        matches.sort_by(rank_order);
        if let Some(limit) = limit {
            matches.truncate(limit);
        }

        Ok(matches)
    }

    async fn count_matching(&self, filter: &ProxyFilter) -> Result<i64> {
        Ok(self
            .proxies
            .iter()
            .filter(|entry| entry.value().matches(filter))
            .count() as i64)
    }

    async fn count(&self) -> Result<i64> {
        Ok(self.proxies.len() as i64)
    }

    async fn add_disabled_destination(&self, host: &str, destination: &str) -> Result<bool> {
        match self.proxies.get_mut(host) {
            Some(mut candidate) => {
                candidate.disable_destination(destination);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnonymityTier, TransportCapability, TransportFilter};
    use tokio_test::{assert_ok, assert_ready};

    fn candidate(host: &str, transport: TransportCapability, score: i32, latency: f64) -> ProxyCandidate {
        ProxyCandidate {
            transport,
            anonymity: AnonymityTier::Elite,
            latency,
            score,
            ..ProxyCandidate::discovered(host, 8080, None)
        }
    }

    #[tokio::test]
    async fn test_insert_if_absent_keys_by_host() {
        let store = MemoryStore::new();
        let first = candidate("1.2.3.4", TransportCapability::Both, 50, 0.2);
        let mut same_host = first.clone();
        same_host.port = 3128;

        assert!(assert_ok!(store.insert_if_absent(&first).await));
        assert!(!assert_ok!(store.insert_if_absent(&same_host).await));

        let stored = store.get("1.2.3.4").await.unwrap().unwrap();
        assert_eq!(stored.port, 8080);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_health_keeps_disabled_destinations() {
        let store = MemoryStore::new();
        let original = candidate("1.2.3.4", TransportCapability::Both, 50, 0.2);
        store.insert_if_absent(&original).await.unwrap();
        store
            .add_disabled_destination("1.2.3.4", "example.com")
            .await
            .unwrap();

        let mut decayed = original.clone();
        decayed.score = 49;
        decayed.transport = TransportCapability::None;
        assert!(store.update_health(&decayed).await.unwrap());

        let stored = store.get("1.2.3.4").await.unwrap().unwrap();
        assert_eq!(stored.score, 49);
        assert_eq!(stored.transport, TransportCapability::None);
        assert_eq!(stored.disabled_destinations, vec!["example.com".to_string()]);

        let ghost = candidate("9.9.9.9", TransportCapability::Both, 50, 0.2);
        assert!(!store.update_health(&ghost).await.unwrap());
    }

    #[tokio::test]
    async fn test_find_matching_ranks_and_limits() {
        let store = MemoryStore::new();
        for c in [
            candidate("a", TransportCapability::Both, 10, 0.9),
            candidate("b", TransportCapability::Both, 50, 1.2),
            candidate("c", TransportCapability::PlainOnly, 50, 0.1),
            candidate("d", TransportCapability::Both, 50, 0.3),
            candidate("e", TransportCapability::SecureOnly, 50, 0.1),
        ] {
            store.insert_if_absent(&c).await.unwrap();
        }

        let filter = ProxyFilter {
            transport: TransportFilter::Plain,
            ..ProxyFilter::default()
        };
        let ranked = store.find_matching(&filter, None).await.unwrap();
        let hosts: Vec<&str> = ranked.iter().map(|c| c.host.as_str()).collect();
        assert_eq!(hosts, vec!["c", "d", "b", "a"]);

        let top = store.find_matching(&filter, Some(2)).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(store.count_matching(&filter).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_delete_and_disable_unknown_host() {
        let store = MemoryStore::new();
        store
            .insert_if_absent(&candidate("1.2.3.4", TransportCapability::Both, 50, 0.2))
            .await
            .unwrap();

        assert!(!store.add_disabled_destination("9.9.9.9", "x.com").await.unwrap());
        assert!(store.delete("1.2.3.4").await.unwrap());
        assert!(!store.delete("1.2.3.4").await.unwrap());
        assert!(store.get("1.2.3.4").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_unscored_candidates() {
        let store = MemoryStore::new();
        let unscored = candidate("1.2.3.4", TransportCapability::Both, 0, 0.2);
        assert!(store.insert_if_absent(&unscored).await.is_err());
        assert_eq!(store.count().await.unwrap(), 0);

        let pooled = candidate("1.2.3.4", TransportCapability::Both, 50, 0.2);
        assert!(store.insert_if_absent(&pooled).await.unwrap());

        let mut negative = pooled.clone();
        negative.score = -3;
        assert!(store.update_health(&negative).await.is_err());
        assert!(store.update_health(&unscored).await.is_err());

        let stored = store.get("1.2.3.4").await.unwrap().unwrap();
        assert_eq!(stored.score, 50);
    }

    #[test]
    fn test_store_calls_complete_without_io() {
        let store = MemoryStore::new();
        let mut count = tokio_test::task::spawn(store.count());
        let value = assert_ready!(count.poll());
        assert_eq!(value.unwrap(), 0);
    }
}
