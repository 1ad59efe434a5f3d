//! Process-wide dependencies, built once from [`Config`] and passed to
//! each command.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{debug, info};

use datasearch_core::embedding::EmbeddingProvider;
use datasearch_core::models::Source;
use datasearch_core::store::CatalogStore;

use crate::config::Config;
use crate::db;
use crate::embedding::create_provider;
use crate::enrich::Orchestrator;
use crate::rate_limit::RateLimiter;
use crate::sources::ConnectorRegistry;
use crate::sqlite_store::SqliteStore;

pub struct AppContext {
    pub config: Config,
    store: Arc<SqliteStore>,
    limiter: Arc<RateLimiter>,
    registry: ConnectorRegistry,
    /// Identifies this process as a lease holder.
    holder: String,
}

impl AppContext {
    /// Connect to an initialised catalog and build the connectors.
    pub async fn open(config: Config) -> Result<Self> {
        let registry = ConnectorRegistry::from_config(&config)?;
        Self::with_registry(config, registry).await
    }

    /// Like [`open`](Self::open) with a caller-supplied registry.
    pub async fn with_registry(config: Config, registry: ConnectorRegistry) -> Result<Self> {
        let pool = db::connect(&config).await?;
        let store = SqliteStore::new(pool);

        let stored = store
            .embedding_dims()
            .await
            .context("catalog is not initialised; run `dsearch init` first")?;
        if stored != config.db.embedding_dims {
            bail!(
                "catalog stores {}-dimensional embeddings but db.embedding_dims is {}",
                stored,
                config.db.embedding_dims
            );
        }

        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(
            config.enrichment.min_interval_ms,
        )));

        Ok(Self {
            config,
            store: Arc::new(store),
            limiter,
            registry,
            holder: format!("{}-{}", std::process::id(), uuid::Uuid::new_v4()),
        })
    }

    pub fn store(&self) -> Arc<dyn CatalogStore> {
        self.store.clone()
    }

    pub fn registry(&self) -> &ConnectorRegistry {
        &self.registry
    }

    pub fn provider(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        create_provider(&self.config.embedding)
    }

    /// An orchestrator for `source`, sharing this process's rate limiter.
    pub fn orchestrator(&self, source: Source) -> Result<Orchestrator> {
        let connector = self.registry.require(source)?;
        Ok(
            Orchestrator::new(self.store(), connector, self.limiter.clone()).with_timeouts(
                Duration::from_secs(self.config.enrichment.call_timeout_secs),
                Duration::from_secs(self.config.enrichment.run_timeout_secs),
            ),
        )
    }

    /// Run `work` while holding the named task lease.
    ///
    /// Returns `Ok(None)` without running anything when another process
    /// holds the lease. The lease outlives the run timeout by a minute so
    /// a crashed holder does not block the task forever.
    pub async fn with_lease<T, F>(&self, task: &str, work: F) -> Result<Option<T>>
    where
        F: Future<Output = Result<T>>,
    {
        let ttl = self.config.enrichment.run_timeout_secs as i64 + 60;
        if !self.store.try_acquire_lease(task, &self.holder, ttl).await? {
            info!(task, "lease held by another run; skipping");
            println!("{}: another run holds the lease; skipping", task);
            return Ok(None);
        }
        debug!(task, holder = %self.holder, "lease acquired");

        let result = work.await;
        self.store.release_lease(task, &self.holder).await?;
        result.map(Some)
    }

    pub async fn close(&self) {
        self.store.pool().close().await;
    }
}
