//! Connector registry and the `dsearch sources` listing.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use datasearch_core::connector::SourceConnector;
use datasearch_core::models::Source;

use crate::config::Config;
use crate::connector_hf::HuggingFaceConnector;
use crate::connector_kaggle::KaggleConnector;

/// The set of source connectors available to the phase drivers.
///
/// Built once from config with [`ConnectorRegistry::from_config`]; tests
/// register scripted connectors with [`ConnectorRegistry::register`].
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    connectors: Vec<Arc<dyn SourceConnector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiate every connector that has a `[sources.*]` section.
    pub fn from_config(config: &Config) -> Result<Self> {
        let timeout = Duration::from_secs(config.enrichment.call_timeout_secs);
        let mut registry = Self::new();

        if let Some(cfg) = &config.sources.kaggle {
            registry.register(Arc::new(KaggleConnector::new(cfg, timeout)?));
        }
        if let Some(cfg) = &config.sources.huggingface {
            registry.register(Arc::new(HuggingFaceConnector::new(cfg, timeout)?));
        }

        Ok(registry)
    }

    /// Register a connector. A later registration for the same source
    /// replaces the earlier one.
    pub fn register(&mut self, connector: Arc<dyn SourceConnector>) {
        let source = connector.source();
        self.connectors.retain(|c| c.source() != source);
        self.connectors.push(connector);
    }

    pub fn connectors(&self) -> &[Arc<dyn SourceConnector>] {
        &self.connectors
    }

    pub fn find(&self, source: Source) -> Option<Arc<dyn SourceConnector>> {
        self.connectors.iter().find(|c| c.source() == source).cloned()
    }

    /// Like [`find`](Self::find), with an error naming the missing section.
    pub fn require(&self, source: Source) -> Result<Arc<dyn SourceConnector>> {
        self.find(source).ok_or_else(|| {
            anyhow::anyhow!(
                "source '{}' is not configured (add a [sources.{}] section)",
                source,
                source
            )
        })
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }
}

pub fn list_sources(registry: &ConnectorRegistry) {
    println!("{:<14} {:<16} DETAILS", "SOURCE", "STATUS");
    for source in Source::ALL {
        match registry.find(source) {
            Some(c) => println!("{:<14} {:<16} {}", source, "OK", c.description()),
            None => println!("{:<14} {:<16} -", source, "NOT CONFIGURED"),
        }
    }
}
