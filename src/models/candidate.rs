use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::ProxyFilter;

/// Latency value meaning "not measured" or "dead"
pub const UNMEASURED_LATENCY: f64 = -1.0;

/// Which transport modes a candidate currently relays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportCapability {
    #[default]
    None,
    PlainOnly,
    SecureOnly,
    Both,
}

impl TransportCapability {
    /// Combine the outcome of the plain and secure sub-probes
    pub fn from_support(plain: bool, secure: bool) -> Self {
        match (plain, secure) {
            (true, true) => TransportCapability::Both,
            (true, false) => TransportCapability::PlainOnly,
            (false, true) => TransportCapability::SecureOnly,
            (false, false) => TransportCapability::None,
        }
    }

    /// Small-integer encoding used by the store
    pub fn code(&self) -> i16 {
        match self {
            TransportCapability::None => -1,
            TransportCapability::PlainOnly => 0,
            TransportCapability::SecureOnly => 1,
            TransportCapability::Both => 2,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            -1 => Some(TransportCapability::None),
            0 => Some(TransportCapability::PlainOnly),
            1 => Some(TransportCapability::SecureOnly),
            2 => Some(TransportCapability::Both),
            _ => None,
        }
    }

    pub fn is_alive(&self) -> bool {
        !matches!(self, TransportCapability::None)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportCapability::None => "none",
            TransportCapability::PlainOnly => "plain_only",
            TransportCapability::SecureOnly => "secure_only",
            TransportCapability::Both => "both",
        }
    }
}

impl std::fmt::Display for TransportCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How much of the original requester an echo endpoint can see through the proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AnonymityTier {
    Elite,
    Anonymous,
    Transparent,
    #[default]
    Unknown,
}

impl AnonymityTier {
    pub fn code(&self) -> i16 {
        match self {
            AnonymityTier::Elite => 0,
            AnonymityTier::Anonymous => 1,
            AnonymityTier::Transparent => 2,
            AnonymityTier::Unknown => -1,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(AnonymityTier::Elite),
            1 => Some(AnonymityTier::Anonymous),
            2 => Some(AnonymityTier::Transparent),
            -1 => Some(AnonymityTier::Unknown),
            _ => None,
        }
    }

    /// Parse a consumer-supplied token (`elite`, `anonymous`, `transparent` or `0`..`2`)
    pub fn from_token(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "elite" | "high" | "0" => Some(AnonymityTier::Elite),
            "anonymous" | "anon" | "1" => Some(AnonymityTier::Anonymous),
            "transparent" | "2" => Some(AnonymityTier::Transparent),
            _ => None,
        }
    }

    /// True when this tier is known and leaks no more than `ceiling`
    pub fn within(&self, ceiling: AnonymityTier) -> bool {
        match (self, ceiling) {
            (AnonymityTier::Unknown, _) | (_, AnonymityTier::Unknown) => false,
            _ => self.code() <= ceiling.code(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnonymityTier::Elite => "elite",
            AnonymityTier::Anonymous => "anonymous",
            AnonymityTier::Transparent => "transparent",
            AnonymityTier::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for AnonymityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A proxy endpoint tracked by the pool
///
/// The store is keyed by `host` alone; see `ProxyStore`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyCandidate {
    pub host: String,
    pub port: u16,
    pub transport: TransportCapability,
    pub anonymity: AnonymityTier,
    /// Seconds, two decimals, or `UNMEASURED_LATENCY`
    pub latency: f64,
    pub region: Option<String>,
    pub score: i32,
    pub disabled_destinations: Vec<String>,
}

impl ProxyCandidate {
    /// A freshly discovered candidate with no health information yet
    pub fn discovered(host: impl Into<String>, port: u16, region: Option<String>) -> Self {
        Self {
            host: host.into(),
            port,
            transport: TransportCapability::None,
            anonymity: AnonymityTier::Unknown,
            latency: UNMEASURED_LATENCY,
            region,
            score: 0,
            disabled_destinations: Vec::new(),
        }
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// URL used to configure an HTTP client to relay through this candidate
    pub fn proxy_url(&self) -> String {
        format!("http://{}", self.address())
    }

    pub fn is_disabled_for(&self, destination: &str) -> bool {
        self.disabled_destinations.iter().any(|d| d == destination)
    }

    /// Append `destination` unless already present. Returns true when the set grew.
    pub fn disable_destination(&mut self, destination: &str) -> bool {
        if self.is_disabled_for(destination) {
            return false;
        }
        self.disabled_destinations.push(destination.to_string());
        true
    }

    /// Evaluate a consumer filter against this candidate
    pub fn matches(&self, filter: &ProxyFilter) -> bool {
        if !filter.transport.accepts(self.transport) {
            return false;
        }

        if let Some(ref destination) = filter.destination {
            if self.is_disabled_for(destination) {
                return false;
            }
        }

        if let Some(ceiling) = filter.anonymity_ceiling {
            if !self.anonymity.within(ceiling) {
                return false;
            }
        }

        true
    }
}

/// Pool ranking: score descending, then latency ascending, host breaking ties
pub fn rank_order(a: &ProxyCandidate, b: &ProxyCandidate) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| a.latency.total_cmp(&b.latency))
        .then_with(|| a.host.cmp(&b.host))
}

/// Round a duration in seconds to two decimals
pub fn round_latency(seconds: f64) -> f64 {
    (seconds * 100.0).round() / 100.0
}
