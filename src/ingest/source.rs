//! Candidate sources
//!
//! A source turns some external listing into discovered candidates. Discovered
//! candidates carry only host, port and region; everything else is learned by
//! probing them.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use anyhow::Context;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use regex::Regex;
use reqwest::header::USER_AGENT;
use reqwest::Client;
use tracing::debug;
use url::Url;

use super::retry::RetryPolicy;
use crate::config::IngestConfig;
use crate::models::ProxyCandidate;

const FETCH_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
];

/// `a.b.c.d:port`, with the address and port captured
const ADDRESS_PATTERN: &str = r"\b(\d{1,3}(?:\.\d{1,3}){3})\s*:\s*(\d{1,5})\b";

/// Anything that can list candidate proxies
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Name used in logs and reports
    fn name(&self) -> &str;

    async fn fetch(&self) -> anyhow::Result<Vec<ProxyCandidate>>;
}

/// Fetches a page over HTTP and extracts every `ipv4:port` it contains
pub struct TextListSource {
    name: String,
    url: Url,
    client: Client,
    pattern: Regex,
    retry: RetryPolicy,
}

impl TextListSource {
    pub fn new(url: Url, config: &IngestConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.fetch_timeout)
            .build()
            .context("building source http client")?;

        Ok(Self {
            name: format!("text_list:{}", url.host_str().unwrap_or("unknown")),
            url,
            client,
            pattern: Regex::new(ADDRESS_PATTERN)?,
            retry: RetryPolicy::new(config.retry_attempts, config.retry_backoff),
        })
    }

    async fn fetch_page(&self) -> anyhow::Result<String> {
        let user_agent = FETCH_USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(FETCH_USER_AGENTS[0]);

        let response = self
            .client
            .get(self.url.clone())
            .header(USER_AGENT, user_agent)
            .send()
            .await?
            .error_for_status()?;

        Ok(response.text().await?)
    }
}

#[async_trait]
impl CandidateSource for TextListSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> anyhow::Result<Vec<ProxyCandidate>> {
        let page = self
            .retry
            .run(&self.name, || self.fetch_page())
            .await
            .with_context(|| format!("fetching {}", self.url))?;

        let candidates = extract_candidates(&self.pattern, &page);
        debug!(source = %self.name, found = candidates.len(), "Extracted candidates");
        Ok(candidates)
    }
}

/// Pull every valid `ipv4:port` out of `text`.
///
/// Invalid addresses and port 0 are skipped. Only the first occurrence of a
/// host is kept since the pool holds one entry per host.
pub fn extract_candidates(pattern: &Regex, text: &str) -> Vec<ProxyCandidate> {
    let mut seen = HashSet::new();

    pattern
        .captures_iter(text)
        .filter_map(|caps| {
            let host: Ipv4Addr = caps.get(1)?.as_str().parse().ok()?;
            let port: u16 = caps.get(2)?.as_str().parse().ok()?;
            (port != 0).then_some((host, port))
        })
        .filter(|(host, _)| seen.insert(*host))
        .map(|(host, port)| ProxyCandidate::discovered(host.to_string(), port, None))
        .collect()
}
