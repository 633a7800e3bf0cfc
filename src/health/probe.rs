//! Capability probe
//!
//! Relays a GET through the candidate to an echo endpoint once per transport
//! mode and reads back what the endpoint saw. Every failure is absorbed into
//! an unsupported sub-probe; nothing here returns an error to the caller.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::header::USER_AGENT;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::config::ProbeConfig;
use crate::models::{
    round_latency, AnonymityTier, ProxyCandidate, TransportCapability, UNMEASURED_LATENCY,
};

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
];

/// Header a forwarding proxy adds that reveals it to the destination
const PROXY_CONNECTION: &str = "proxy-connection";

/// Transport mode a sub-probe exercises
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Plain,
    Secure,
}

impl TransportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportMode::Plain => "plain",
            TransportMode::Secure => "secure",
        }
    }
}

/// Outcome of probing one transport mode
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubProbe {
    pub supported: bool,
    pub anonymity: AnonymityTier,
    pub latency: f64,
}

impl SubProbe {
    pub fn failed() -> Self {
        Self {
            supported: false,
            anonymity: AnonymityTier::Unknown,
            latency: UNMEASURED_LATENCY,
        }
    }

    pub fn succeeded(anonymity: AnonymityTier, latency: f64) -> Self {
        Self {
            supported: true,
            anonymity,
            latency,
        }
    }
}

/// Combined capability of a candidate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeResult {
    pub transport: TransportCapability,
    pub anonymity: AnonymityTier,
    pub latency: f64,
}

impl ProbeResult {
    pub fn dead() -> Self {
        Self {
            transport: TransportCapability::None,
            anonymity: AnonymityTier::Unknown,
            latency: UNMEASURED_LATENCY,
        }
    }

    /// Compose both sub-probes. The plain sub-probe's measurements win when both succeed.
    pub fn aggregate(plain: SubProbe, secure: SubProbe) -> Self {
        let transport = TransportCapability::from_support(plain.supported, secure.supported);
        let source = match transport {
            TransportCapability::Both | TransportCapability::PlainOnly => plain,
            TransportCapability::SecureOnly => secure,
            TransportCapability::None => return Self::dead(),
        };

        Self {
            transport,
            anonymity: source.anonymity,
            latency: source.latency,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.transport.is_alive()
    }
}

/// Body returned by the echo endpoint
#[derive(Debug, Deserialize)]
pub struct EchoBody {
    /// Address(es) the endpoint saw the request come from, comma separated
    pub origin: String,
    pub headers: HashMap<String, serde_json::Value>,
}

/// Classify what the echo endpoint learned about the original requester
pub fn classify_anonymity(body: &EchoBody) -> AnonymityTier {
    if body.origin.contains(',') {
        return AnonymityTier::Transparent;
    }

    let forwarded = body.headers.iter().any(|(name, value)| {
        name.eq_ignore_ascii_case(PROXY_CONNECTION)
            && value.as_str().map(|v| !v.is_empty()).unwrap_or(!value.is_null())
    });

    if forwarded {
        AnonymityTier::Anonymous
    } else {
        AnonymityTier::Elite
    }
}

/// Something that can tell what a candidate is currently capable of
#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    async fn probe(&self, candidate: &ProxyCandidate) -> ProbeResult;
}

/// Probe that relays requests to a public echo endpoint
pub struct EchoProbe {
    config: ProbeConfig,
}

impl EchoProbe {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    async fn sub_probe(&self, candidate: &ProxyCandidate, mode: TransportMode) -> SubProbe {
        match self.try_sub_probe(candidate, mode).await {
            Ok(result) => result,
            Err(e) => {
                debug!(
                    address = %candidate.address(),
                    mode = mode.as_str(),
                    "Sub-probe failed: {:#}",
                    e
                );
                SubProbe::failed()
            }
        }
    }

    async fn try_sub_probe(
        &self,
        candidate: &ProxyCandidate,
        mode: TransportMode,
    ) -> std::result::Result<SubProbe, anyhow::Error> {
        let (proxy, url) = match mode {
            TransportMode::Plain => (
                reqwest::Proxy::http(candidate.proxy_url())?,
                &self.config.plain_url,
            ),
            TransportMode::Secure => (
                reqwest::Proxy::https(candidate.proxy_url())?,
                &self.config.secure_url,
            ),
        };

        let client = reqwest::Client::builder()
            .proxy(proxy)
            .timeout(self.config.timeout)
            .build()?;

        let user_agent = USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0]);

        let start = Instant::now();
        let response = client
            .get(url.clone())
            .header(USER_AGENT, user_agent)
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("echo endpoint returned {}", response.status());
        }
        let latency = round_latency(start.elapsed().as_secs_f64());

        let body: EchoBody = response.json().await?;
        Ok(SubProbe::succeeded(classify_anonymity(&body), latency))
    }
}

#[async_trait]
impl CapabilityProbe for EchoProbe {
    #[instrument(skip(self, candidate), fields(address = %candidate.address()))]
    async fn probe(&self, candidate: &ProxyCandidate) -> ProbeResult {
        let (plain, secure) = tokio::join!(
            self.sub_probe(candidate, TransportMode::Plain),
            self.sub_probe(candidate, TransportMode::Secure),
        );

        let result = ProbeResult::aggregate(plain, secure);
        debug!(
            transport = %result.transport,
            anonymity = %result.anonymity,
            latency = result.latency,
            "Probe complete"
        );
        result
    }
}
