use std::collections::HashMap;

use url::Url;

use super::source::{CandidateSource, TextListSource};
use crate::config::{IngestConfig, SourceSpec};
use crate::error::{PoolError, Result};

type SourceFactory =
    Box<dyn Fn(Url, &IngestConfig) -> anyhow::Result<Box<dyn CandidateSource>> + Send + Sync>;

/// Maps a source kind to the constructor for it
pub struct SourceRegistry {
    factories: HashMap<String, SourceFactory>,
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceRegistry {
    /// Registry with the built-in kinds
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("text_list", |url, config| {
            Ok(Box::new(TextListSource::new(url, config)?))
        });
        registry
    }

    pub fn register<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(Url, &IngestConfig) -> anyhow::Result<Box<dyn CandidateSource>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.to_lowercase(), Box::new(factory));
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Build one source
    pub fn build(&self, spec: &SourceSpec, config: &IngestConfig) -> Result<Box<dyn CandidateSource>> {
        let factory = self
            .factories
            .get(&spec.kind)
            .ok_or_else(|| PoolError::UnknownSource(spec.kind.clone()))?;

        factory(spec.url.clone(), config).map_err(|e| PoolError::SourceFailed {
            name: spec.kind.clone(),
            reason: format!("{:#}", e),
        })
    }

    /// Build every configured source, failing on the first unknown kind
    pub fn build_all(&self, config: &IngestConfig) -> Result<Vec<Box<dyn CandidateSource>>> {
        config
            .sources
            .iter()
            .map(|spec| self.build(spec, config))
            .collect()
    }
}
