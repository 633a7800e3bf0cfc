//! Candidate ingestion
//!
//! Sources are fetched concurrently and independently, their candidates probed with bounded
//! concurrency, and only the ones that pass are inserted into the pool.

pub mod registry;
pub mod retry;
pub mod source;

pub use registry::SourceRegistry;
pub use retry::RetryPolicy;
pub use source::{extract_candidates, CandidateSource, TextListSource};

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, instrument, warn};

use crate::health::{admit, CapabilityProbe};
use crate::models::ProxyCandidate;
use crate::repository::ProxyStore;

/// Counts for one batch of discovered candidates
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub discovered: usize,
    /// Hosts already pooled, not probed
    pub duplicates: usize,
    /// Failed their first probe
    pub dead: usize,
    pub inserted: usize,
    pub store_errors: usize,
    /// Sources that could not be fetched
    pub failed_sources: usize,
}

impl IngestReport {
    fn merge(&mut self, other: &IngestReport) {
        self.discovered += other.discovered;
        self.duplicates += other.duplicates;
        self.dead += other.dead;
        self.inserted += other.inserted;
        self.store_errors += other.store_errors;
        self.failed_sources += other.failed_sources;
    }
}

enum Admission {
    Duplicate,
    Dead,
    Inserted,
    StoreError,
}

/// Runs configured sources and admits what they find
pub struct Ingestor {
    sources: Vec<Box<dyn CandidateSource>>,
    store: Arc<dyn ProxyStore>,
    probe: Arc<dyn CapabilityProbe>,
    concurrency: usize,
    interval: Duration,
    max_score: i32,
}

impl Ingestor {
    pub fn new(
        sources: Vec<Box<dyn CandidateSource>>,
        store: Arc<dyn ProxyStore>,
        probe: Arc<dyn CapabilityProbe>,
        concurrency: usize,
        interval: Duration,
        max_score: i32,
    ) -> Self {
        Self {
            sources,
            store,
            probe,
            concurrency: concurrency.max(1),
            interval,
            max_score,
        }
    }

    /// Fetch every source once and ingest the results.
    ///
    /// Sources run concurrently. A failing source is logged and counted; the
    /// others still run.
    pub async fn run_once(&self) -> IngestReport {
        let futures: Vec<_> = self
            .sources
            .iter()
            .map(|source| self.run_source(source.as_ref()))
            .collect();
        let batches: Vec<IngestReport> = stream::iter(futures)
            .buffer_unordered(self.sources.len().max(1))
            .collect()
            .await;

        let mut report = IngestReport::default();
        for batch in &batches {
            report.merge(batch);
        }
        report
    }

    async fn run_source(&self, source: &dyn CandidateSource) -> IngestReport {
        match source.fetch().await {
            Ok(candidates) => {
                let batch = self.ingest(candidates).await;
                info!(
                    source = source.name(),
                    discovered = batch.discovered,
                    inserted = batch.inserted,
                    dead = batch.dead,
                    "Source ingested"
                );
                batch
            }
            Err(e) => {
                error!(source = source.name(), "Source failed: {:#}", e);
                IngestReport {
                    failed_sources: 1,
                    ..IngestReport::default()
                }
            }
        }
    }

    /// Probe discovered candidates and insert the live ones
    pub async fn ingest(&self, candidates: Vec<ProxyCandidate>) -> IngestReport {
        let mut report = IngestReport {
            discovered: candidates.len(),
            ..IngestReport::default()
        };

        let admissions: Vec<Admission> = stream::iter(candidates)
            .map(|candidate| self.admit_one(candidate))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for admission in admissions {
            match admission {
                Admission::Duplicate => report.duplicates += 1,
                Admission::Dead => report.dead += 1,
                Admission::Inserted => report.inserted += 1,
                Admission::StoreError => report.store_errors += 1,
            }
        }

        report
    }

    async fn admit_one(&self, candidate: ProxyCandidate) -> Admission {
        match self.store.get(&candidate.host).await {
            Ok(Some(_)) => return Admission::Duplicate,
            Ok(None) => {}
            Err(e) => {
                warn!("Failed to look up {}: {}", candidate.host, e);
                return Admission::StoreError;
            }
        }

        let result = self.probe.probe(&candidate).await;
        let Some(admitted) = admit(candidate, &result, self.max_score) else {
            return Admission::Dead;
        };

        match self.store.insert_if_absent(&admitted).await {
            Ok(true) => Admission::Inserted,
            // Another source got there first.
            Ok(false) => Admission::Duplicate,
            Err(e) => {
                warn!("Failed to insert {}: {}", admitted.address(), e);
                Admission::StoreError
            }
        }
    }

    /// Ingest at startup and on every interval until shutdown
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if self.sources.is_empty() {
            info!("No candidate sources configured, ingestion idle");
        } else {
            info!(
                "Starting ingestion of {} sources every {}s",
                self.sources.len(),
                self.interval.as_secs()
            );
        }

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.sources.is_empty() {
                        continue;
                    }
                    let report = self.run_once().await;
                    info!(
                        discovered = report.discovered,
                        inserted = report.inserted,
                        duplicates = report.duplicates,
                        dead = report.dead,
                        failed_sources = report.failed_sources,
                        "Ingestion round complete"
                    );
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Ingestion shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Guard for managing ingestion lifecycle
pub struct IngestionHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl IngestionHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
