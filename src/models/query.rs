use serde::Serialize;

use super::{AnonymityTier, TransportCapability};
use crate::error::{PoolError, Result};

/// Transport mode requested by a consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportFilter {
    /// No protocol given: the candidate must relay both modes
    #[default]
    Either,
    Plain,
    Secure,
}

impl TransportFilter {
    /// Parse the optional `protocol` query parameter
    pub fn parse(token: Option<&str>) -> Result<Self> {
        let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) else {
            return Ok(TransportFilter::Either);
        };

        match token.to_lowercase().as_str() {
            "http" | "plain" => Ok(TransportFilter::Plain),
            "https" | "secure" => Ok(TransportFilter::Secure),
            other => Err(PoolError::InvalidRequest(format!(
                "unknown protocol: {}",
                other
            ))),
        }
    }

    /// Capabilities satisfying this filter
    pub fn accepted(&self) -> &'static [TransportCapability] {
        match self {
            TransportFilter::Either => &[TransportCapability::Both],
            TransportFilter::Plain => &[TransportCapability::PlainOnly, TransportCapability::Both],
            TransportFilter::Secure => {
                &[TransportCapability::SecureOnly, TransportCapability::Both]
            }
        }
    }

    pub fn accepts(&self, capability: TransportCapability) -> bool {
        self.accepted().contains(&capability)
    }

    /// URL scheme prefix for rendered addresses, if the consumer asked for one
    pub fn scheme(&self) -> Option<&'static str> {
        match self {
            TransportFilter::Either => None,
            TransportFilter::Plain => Some("http"),
            TransportFilter::Secure => Some("https"),
        }
    }
}

/// Consumer-supplied filter evaluated by the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyFilter {
    pub transport: TransportFilter,
    /// Exclude candidates that have this destination disabled
    pub destination: Option<String>,
    /// Only candidates at least this anonymous
    pub anonymity_ceiling: Option<AnonymityTier>,
}

impl ProxyFilter {
    /// Build a filter from raw query-string values
    pub fn from_params(
        protocol: Option<&str>,
        domain: Option<&str>,
        anonymity: Option<&str>,
    ) -> Result<Self> {
        let transport = TransportFilter::parse(protocol)?;

        let destination = domain
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);

        let anonymity_ceiling = match anonymity.map(str::trim).filter(|a| !a.is_empty()) {
            None => None,
            Some(token) => Some(AnonymityTier::from_token(token).ok_or_else(|| {
                PoolError::InvalidRequest(format!("unknown anonymity level: {}", token))
            })?),
        };

        Ok(Self {
            transport,
            destination,
            anonymity_ceiling,
        })
    }
}
