//! Revalidation of the whole pool
//!
//! A sweep snapshots the pool, feeds every member through a bounded set of
//! workers and waits until each outcome is persisted. Sweeps never overlap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use super::probe::CapabilityProbe;
use super::transition::{transition, Outcome};
use crate::models::ProxyCandidate;
use crate::repository::ProxyStore;

/// Revalidator configuration
#[derive(Debug, Clone)]
pub struct RevalidatorConfig {
    /// Concurrent probe workers per sweep
    pub workers: usize,
    /// Interval between sweeps
    pub interval: Duration,
    /// Score restored on a successful probe
    pub max_score: i32,
}

/// Summary of one sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    /// Members present when the sweep started
    pub total: usize,
    /// Probed alive, score reset
    pub alive: usize,
    /// Probed dead, score decremented but still pooled
    pub decayed: usize,
    /// Probed dead at score 1, removed
    pub evicted: usize,
    /// Outcomes that could not be persisted
    pub store_errors: usize,
    /// Another sweep was running, nothing was done
    pub skipped: bool,
    pub elapsed_ms: u64,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SweepReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            finished_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    fn merge(&mut self, other: &SweepReport) {
        self.alive += other.alive;
        self.decayed += other.decayed;
        self.evicted += other.evicted;
        self.store_errors += other.store_errors;
    }
}

/// Per-member result inside a sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemberOutcome {
    Alive,
    Decayed,
    Evicted,
    StoreError,
}

impl SweepReport {
    fn record(&mut self, outcome: MemberOutcome) {
        match outcome {
            MemberOutcome::Alive => self.alive += 1,
            MemberOutcome::Decayed => self.decayed += 1,
            MemberOutcome::Evicted => self.evicted += 1,
            MemberOutcome::StoreError => self.store_errors += 1,
        }
    }
}

/// Clears the in-flight flag when a sweep ends, however it ends
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Periodically re-probes every pooled candidate
pub struct Revalidator {
    store: Arc<dyn ProxyStore>,
    probe: Arc<dyn CapabilityProbe>,
    config: RevalidatorConfig,
    in_flight: AtomicBool,
    last_report: watch::Sender<Option<SweepReport>>,
}

impl Revalidator {
    pub fn new(
        store: Arc<dyn ProxyStore>,
        probe: Arc<dyn CapabilityProbe>,
        config: RevalidatorConfig,
    ) -> Self {
        let (last_report, _) = watch::channel(None);
        Self {
            store,
            probe,
            config,
            in_flight: AtomicBool::new(false),
            last_report,
        }
    }

    /// Subscribe to the report of the most recent completed sweep
    pub fn reports(&self) -> watch::Receiver<Option<SweepReport>> {
        self.last_report.subscribe()
    }

    /// Run sweeps at startup and on every interval until shutdown
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting revalidator with {}s interval and {} workers",
            self.config.interval.as_secs(),
            self.config.workers
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Revalidator shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Probe every pooled candidate once and persist each outcome.
    ///
    /// Returns after all workers have finished. A call made while another sweep
    /// is running returns immediately with `skipped` set.
    pub async fn sweep(&self) -> SweepReport {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            warn!("Sweep already in progress, skipping trigger");
            return SweepReport::skipped();
        }
        let _in_flight = InFlight(&self.in_flight);

        let started = Instant::now();
        let members = match self.store.all().await {
            Ok(members) => members,
            Err(e) => {
                error!("Sweep aborted, could not read pool: {}", e);
                let report = SweepReport {
                    store_errors: 1,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    finished_at: Some(Utc::now()),
                    ..SweepReport::default()
                };
                self.last_report.send_replace(Some(report.clone()));
                return report;
            }
        };

        let total = members.len();
        info!("Revalidating {} proxies", total);

        let mut report = self.dispatch(members).await;
        report.total = total;
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        report.finished_at = Some(Utc::now());

        info!(
            alive = report.alive,
            decayed = report.decayed,
            evicted = report.evicted,
            store_errors = report.store_errors,
            elapsed_ms = report.elapsed_ms,
            "Sweep complete"
        );

        self.last_report.send_replace(Some(report.clone()));
        report
    }

    /// Fan members out to the workers and join them
    async fn dispatch(&self, members: Vec<ProxyCandidate>) -> SweepReport {
        let mut report = SweepReport::default();
        if members.is_empty() {
            return report;
        }

        let worker_count = self.config.workers.max(1).min(members.len());

        // Sized to hold every member, so the queue is full and closed before workers start.
        let (tx, rx) = mpsc::channel(members.len());
        for member in members {
            if tx.try_send(member).is_err() {
                error!("Sweep queue rejected a member");
            }
        }
        drop(tx);

        let queue = Arc::new(Mutex::new(rx));

        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count {
            workers.spawn(run_worker(
                worker_id,
                queue.clone(),
                self.store.clone(),
                self.probe.clone(),
                self.config.max_score,
            ));
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(tally) => report.merge(&tally),
                Err(e) => error!("Sweep worker terminated abnormally: {}", e),
            }
        }

        report
    }
}

/// Pull members until the queue is drained
async fn run_worker(
    worker_id: usize,
    queue: Arc<Mutex<mpsc::Receiver<ProxyCandidate>>>,
    store: Arc<dyn ProxyStore>,
    probe: Arc<dyn CapabilityProbe>,
    max_score: i32,
) -> SweepReport {
    let mut tally = SweepReport::default();

    loop {
        let next = queue.lock().await.recv().await;
        let Some(member) = next else {
            break;
        };
        tally.record(revalidate_one(store.as_ref(), probe.as_ref(), member, max_score).await);
    }

    debug!(worker_id, "Sweep worker drained queue");
    tally
}

async fn revalidate_one(
    store: &dyn ProxyStore,
    probe: &dyn CapabilityProbe,
    member: ProxyCandidate,
    max_score: i32,
) -> MemberOutcome {
    let result = probe.probe(&member).await;

    match transition(&member, &result, max_score) {
        Outcome::Persist(updated) => {
            let alive = result.is_alive();
            match store.update_health(&updated).await {
                Ok(true) if alive => MemberOutcome::Alive,
                Ok(true) => {
                    debug!(address = %updated.address(), score = updated.score, "Proxy failed check");
                    MemberOutcome::Decayed
                }
                Ok(false) => {
                    // Removed by someone else mid-sweep; nothing to persist.
                    debug!(host = %updated.host, "Proxy vanished during sweep");
                    if alive {
                        MemberOutcome::Alive
                    } else {
                        MemberOutcome::Decayed
                    }
                }
                Err(e) => {
                    warn!("Failed to persist health of {}: {}", updated.address(), e);
                    MemberOutcome::StoreError
                }
            }
        }
        Outcome::Evict => match store.delete(&member.host).await {
            Ok(_) => {
                info!(address = %member.address(), "Evicted proxy");
                MemberOutcome::Evicted
            }
            Err(e) => {
                warn!("Failed to evict {}: {}", member.address(), e);
                MemberOutcome::StoreError
            }
        },
    }
}

/// Guard for managing revalidator lifecycle
pub struct RevalidatorHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl RevalidatorHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PoolError, Result};
    use crate::health::probe::ProbeResult;
    use crate::models::{AnonymityTier, ProxyFilter, TransportCapability};
    use crate::repository::MemoryStore;
    use async_trait::async_trait;
    use dashmap::DashMap;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    const MAX_SCORE: i32 = 50;

    fn member(host: &str, score: i32) -> ProxyCandidate {
        ProxyCandidate {
            transport: TransportCapability::Both,
            anonymity: AnonymityTier::Elite,
            latency: 0.3,
            score,
            ..ProxyCandidate::discovered(host, 8080, None)
        }
    }

    fn live() -> ProbeResult {
        ProbeResult {
            transport: TransportCapability::PlainOnly,
            anonymity: AnonymityTier::Anonymous,
            latency: 0.12,
        }
    }

    /// Answers from a per-host script, counting calls and peak concurrency
    #[derive(Default)]
    struct ScriptedProbe {
        alive_hosts: DashMap<String, ()>,
        calls: DashMap<String, usize>,
        active: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
    }

    impl ScriptedProbe {
        fn with_alive(hosts: &[&str]) -> Self {
            let probe = Self::default();
            for host in hosts {
                probe.alive_hosts.insert(host.to_string(), ());
            }
            probe
        }
    }

    #[async_trait]
    impl CapabilityProbe for ScriptedProbe {
        async fn probe(&self, candidate: &ProxyCandidate) -> ProbeResult {
            *self.calls.entry(candidate.host.clone()).or_insert(0) += 1;
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            if self.alive_hosts.contains_key(&candidate.host) {
                live()
            } else {
                ProbeResult::dead()
            }
        }
    }

    /// Memory store whose writes fail for one host and whose full reads can be switched off
    struct FlakyStore {
        inner: MemoryStore,
        broken_host: String,
        unreadable: AtomicBool,
    }

    impl FlakyStore {
        fn new(inner: MemoryStore, broken_host: &str) -> Self {
            Self {
                inner,
                broken_host: broken_host.to_string(),
                unreadable: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl ProxyStore for FlakyStore {
        async fn insert_if_absent(&self, candidate: &ProxyCandidate) -> Result<bool> {
            self.inner.insert_if_absent(candidate).await
        }
        async fn update_health(&self, candidate: &ProxyCandidate) -> Result<bool> {
            if candidate.host == self.broken_host {
                return Err(PoolError::Internal("write refused".to_string()));
            }
            self.inner.update_health(candidate).await
        }
        async fn delete(&self, host: &str) -> Result<bool> {
            if host == self.broken_host {
                return Err(PoolError::Internal("delete refused".to_string()));
            }
            self.inner.delete(host).await
        }
        async fn get(&self, host: &str) -> Result<Option<ProxyCandidate>> {
            self.inner.get(host).await
        }
        async fn all(&self) -> Result<Vec<ProxyCandidate>> {
            if self.unreadable.load(Ordering::SeqCst) {
                return Err(PoolError::DatabaseConnection("pool unreachable".to_string()));
            }
            self.inner.all().await
        }
        async fn find_matching(
            &self,
            filter: &ProxyFilter,
            limit: Option<usize>,
        ) -> Result<Vec<ProxyCandidate>> {
            self.inner.find_matching(filter, limit).await
        }
        async fn count_matching(&self, filter: &ProxyFilter) -> Result<i64> {
            self.inner.count_matching(filter).await
        }
        async fn count(&self) -> Result<i64> {
            self.inner.count().await
        }
        async fn add_disabled_destination(&self, host: &str, destination: &str) -> Result<bool> {
            self.inner.add_disabled_destination(host, destination).await
        }
    }

    fn revalidator(
        store: Arc<dyn ProxyStore>,
        probe: Arc<dyn CapabilityProbe>,
        workers: usize,
    ) -> Revalidator {
        Revalidator::new(
            store,
            probe,
            RevalidatorConfig {
                workers,
                interval: Duration::from_secs(3600),
                max_score: MAX_SCORE,
            },
        )
    }

    #[tokio::test]
    async fn test_sweep_evicts_after_max_score_consecutive_failures() {
        let store = Arc::new(MemoryStore::new());
        store.insert_if_absent(&member("1.2.3.4", MAX_SCORE)).await.unwrap();
        let revalidator = revalidator(store.clone(), Arc::new(ScriptedProbe::default()), 4);

        for _ in 0..49 {
            revalidator.sweep().await;
        }
        let survivor = store.get("1.2.3.4").await.unwrap().unwrap();
        assert_eq!(survivor.score, 1);
        assert_eq!(survivor.transport, TransportCapability::None);

        let report = revalidator.sweep().await;
        assert_eq!(report.evicted, 1);
        assert!(store.get("1.2.3.4").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sweep_resets_score_on_partial_success() {
        let store = Arc::new(MemoryStore::new());
        store.insert_if_absent(&member("1.1.1.1", 3)).await.unwrap();
        store.insert_if_absent(&member("2.2.2.2", 3)).await.unwrap();
        let probe = Arc::new(ScriptedProbe::with_alive(&["1.1.1.1"]));

        let report = revalidator(store.clone(), probe, 2).sweep().await;

        assert_eq!(report.total, 2);
        assert_eq!(report.alive, 1);
        assert_eq!(report.decayed, 1);

        let healed = store.get("1.1.1.1").await.unwrap().unwrap();
        assert_eq!(healed.score, MAX_SCORE);
        assert_eq!(healed.transport, TransportCapability::PlainOnly);
        assert_eq!(healed.latency, 0.12);

        let decayed = store.get("2.2.2.2").await.unwrap().unwrap();
        assert_eq!(decayed.score, 2);
    }

    #[tokio::test]
    async fn test_sweep_probes_each_member_once_within_worker_bound() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..12 {
            store
                .insert_if_absent(&member(&format!("10.0.0.{}", i), MAX_SCORE))
                .await
                .unwrap();
        }
        let probe = Arc::new(ScriptedProbe {
            delay: Duration::from_millis(20),
            ..ScriptedProbe::default()
        });

        let report = revalidator(store.clone(), probe.clone(), 3).sweep().await;

        assert_eq!(report.total, 12);
        assert_eq!(report.decayed, 12);
        assert_eq!(probe.calls.len(), 12);
        assert!(probe.calls.iter().all(|entry| *entry.value() == 1));
        assert!(probe.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_store_error_is_isolated_to_one_member() {
        let inner = MemoryStore::new();
        for host in ["1.1.1.1", "2.2.2.2", "3.3.3.3"] {
            inner.insert_if_absent(&member(host, 5)).await.unwrap();
        }
        let store = Arc::new(FlakyStore::new(inner, "2.2.2.2"));

        let report = revalidator(store.clone(), Arc::new(ScriptedProbe::default()), 1)
            .sweep()
            .await;

        assert_eq!(report.store_errors, 1);
        assert_eq!(report.decayed, 2);
        assert_eq!(store.get("1.1.1.1").await.unwrap().unwrap().score, 4);
        assert_eq!(store.get("2.2.2.2").await.unwrap().unwrap().score, 5);
        assert_eq!(store.get("3.3.3.3").await.unwrap().unwrap().score, 4);
    }

    #[tokio::test]
    async fn test_failed_eviction_is_isolated_to_one_member() {
        let inner = MemoryStore::new();
        for host in ["1.1.1.1", "2.2.2.2", "3.3.3.3"] {
            inner.insert_if_absent(&member(host, 1)).await.unwrap();
        }
        let store = Arc::new(FlakyStore::new(inner, "2.2.2.2"));

        let report = revalidator(store.clone(), Arc::new(ScriptedProbe::default()), 2)
            .sweep()
            .await;

        assert_eq!(report.total, 3);
        assert_eq!(report.evicted, 2);
        assert_eq!(report.store_errors, 1);

        let remaining: Vec<(String, i32)> = store
            .all()
            .await
            .unwrap()
            .into_iter()
            .map(|c| (c.host, c.score))
            .collect();
        assert_eq!(remaining, vec![("2.2.2.2".to_string(), 1)]);
    }

    #[tokio::test]
    async fn test_pool_read_failure_aborts_only_that_sweep() {
        let inner = MemoryStore::new();
        inner.insert_if_absent(&member("1.2.3.4", 5)).await.unwrap();
        let store = Arc::new(FlakyStore::new(inner, "9.9.9.9"));
        store.unreadable.store(true, Ordering::SeqCst);
        let probe = Arc::new(ScriptedProbe::default());
        let revalidator = revalidator(store.clone(), probe.clone(), 2);

        let failed = revalidator.sweep().await;
        assert!(!failed.skipped);
        assert_eq!(failed.store_errors, 1);
        assert_eq!(failed.total, 0);
        assert!(probe.calls.is_empty());
        let published = revalidator.reports().borrow().clone().unwrap();
        assert_eq!(published.store_errors, 1);

        store.unreadable.store(false, Ordering::SeqCst);
        let retried = revalidator.sweep().await;
        assert!(!retried.skipped);
        assert_eq!(retried.total, 1);
        assert_eq!(retried.decayed, 1);
        assert_eq!(retried.store_errors, 0);
        assert_eq!(store.get("1.2.3.4").await.unwrap().unwrap().score, 4);
    }

    /// Blocks inside the probe until released
    struct GatedProbe {
        started: Notify,
        release: Notify,
    }

    #[async_trait]
    impl CapabilityProbe for GatedProbe {
        async fn probe(&self, _candidate: &ProxyCandidate) -> ProbeResult {
            self.started.notify_one();
            self.release.notified().await;
            live()
        }
    }

    #[tokio::test]
    async fn test_overlapping_sweep_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        store.insert_if_absent(&member("1.2.3.4", 5)).await.unwrap();
        let probe = Arc::new(GatedProbe {
            started: Notify::new(),
            release: Notify::new(),
        });
        let revalidator = Arc::new(revalidator(store.clone(), probe.clone(), 2));

        let first = tokio::spawn({
            let revalidator = revalidator.clone();
            async move { revalidator.sweep().await }
        });
        probe.started.notified().await;

        let overlapping = revalidator.sweep().await;
        assert!(overlapping.skipped);
        assert_eq!(overlapping.total, 0);

        probe.release.notify_one();
        let completed = first.await.unwrap();
        assert!(!completed.skipped);
        assert_eq!(completed.alive, 1);

        // The flag is cleared once the first sweep finishes.
        let next = revalidator.sweep();
        probe.release.notify_one();
        assert!(!next.await.skipped);
    }

    #[tokio::test]
    async fn test_sweep_publishes_last_report() {
        let store = Arc::new(MemoryStore::new());
        let revalidator = revalidator(store, Arc::new(ScriptedProbe::default()), 2);
        let reports = revalidator.reports();
        assert!(reports.borrow().is_none());

        let report = revalidator.sweep().await;
        assert_eq!(report.total, 0);
        assert!(reports.borrow().as_ref().unwrap().finished_at.is_some());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        store.insert_if_absent(&member("1.2.3.4", 5)).await.unwrap();
        let revalidator = Arc::new(revalidator(
            store.clone(),
            Arc::new(ScriptedProbe::with_alive(&["1.2.3.4"])),
            1,
        ));
        let mut reports = revalidator.reports();
        let (handle, shutdown) = RevalidatorHandle::new();

        let task = tokio::spawn({
            let revalidator = revalidator.clone();
            async move { revalidator.run(shutdown).await }
        });

        // The first tick fires immediately.
        reports.changed().await.unwrap();
        assert_eq!(store.get("1.2.3.4").await.unwrap().unwrap().score, MAX_SCORE);

        handle.shutdown();
        task.await.unwrap();
    }
}
