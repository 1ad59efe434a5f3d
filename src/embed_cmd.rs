//! Embedding batch processor and the `dsearch embed` command.
//!
//! One batch is: select active ENRICHED datasets without a vector (oldest
//! `updated_at` first), encode all of them in a single provider call, and
//! commit the vectors together. Items the store rejects stay without a
//! vector and are picked up again by the next run; an encoder failure
//! aborts the run.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tracing::{error, info, warn};

use datasearch_core::embedding::EmbeddingProvider;
use datasearch_core::error::EncodingError;
use datasearch_core::models::EmbedReport;
use datasearch_core::store::{CatalogStore, EmbeddingWrite, WriteOutcome};

use crate::app::AppContext;

pub struct EmbeddingProcessor {
    store: Arc<dyn CatalogStore>,
    provider: Arc<dyn EmbeddingProvider>,
}

impl EmbeddingProcessor {
    /// Fails when the provider's dimension differs from the one the store
    /// was initialised with.
    pub async fn new(
        store: Arc<dyn CatalogStore>,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let stored = store.embedding_dims().await?;
        if provider.dims() != stored {
            bail!(
                "embedding provider '{}' produces {}-dimensional vectors but the catalog stores {}",
                provider.model_name(),
                provider.dims(),
                stored
            );
        }
        Ok(Self { store, provider })
    }

    /// Embed up to `batch_size` datasets.
    pub async fn process_batch(&self, batch_size: usize) -> Result<EmbedReport> {
        let mut report = EmbedReport::default();

        let batch = self.store.select_for_embedding(batch_size).await?;
        if batch.is_empty() {
            return Ok(report);
        }

        let texts: Vec<String> = batch.iter().map(|d| d.encode_text()).collect();
        let vectors = match self.provider.embed_batch(&texts).await {
            Ok(v) if v.len() == texts.len() => v,
            Ok(v) => {
                let err = EncodingError::CountMismatch {
                    expected: texts.len(),
                    actual: v.len(),
                };
                error!(
                    model = self.provider.model_name(),
                    error = %err,
                    "encoder output rejected; aborting run"
                );
                report.aborted = Some(err.to_string());
                return Ok(report);
            }
            Err(e) => {
                error!(
                    model = self.provider.model_name(),
                    error = %e,
                    "encoder failed; aborting run"
                );
                report.aborted = Some(e.to_string());
                return Ok(report);
            }
        };

        let writes: Vec<EmbeddingWrite> = batch
            .iter()
            .zip(vectors)
            .map(|(d, vector)| EmbeddingWrite {
                dataset_id: d.id.clone(),
                content_hash: d.content_hash.clone(),
                vector,
            })
            .collect();

        let outcomes = self.store.commit_embeddings(&writes).await?;
        for (write, outcome) in writes.iter().zip(outcomes.iter()) {
            match outcome {
                WriteOutcome::Stored => report.processed += 1,
                WriteOutcome::Rejected(reason) => {
                    report.failed += 1;
                    warn!(dataset_id = %write.dataset_id, %reason, "embedding not stored");
                }
            }
        }

        info!(processed = report.processed, failed = report.failed, "embedding batch committed");
        Ok(report)
    }
}

/// `dsearch embed`: one batch, or every pending batch with `all`.
pub async fn run_embed(ctx: &AppContext, batch_size: Option<usize>, all: bool) -> Result<()> {
    if !ctx.config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }
    let batch_size = batch_size.unwrap_or(ctx.config.jobs.embed_batch).max(1);

    let Some(report) = ctx
        .with_lease("embed", async {
            let processor = EmbeddingProcessor::new(ctx.store(), ctx.provider()?).await?;
            let run_timeout = Duration::from_secs(ctx.config.enrichment.run_timeout_secs);
            let mut total = EmbedReport::default();
            let work = async {
                loop {
                    let r = processor.process_batch(batch_size).await?;
                    total.processed += r.processed;
                    total.failed += r.failed;
                    if r.aborted.is_some() {
                        total.aborted = r.aborted;
                        break;
                    }
                    if !all || r.processed == 0 {
                        break;
                    }
                }
                Ok::<_, anyhow::Error>(())
            };
            match tokio::time::timeout(run_timeout, work).await {
                Ok(r) => r?,
                Err(_) => total.aborted = Some("run timed out".to_string()),
            }
            Ok(total)
        })
        .await?
    else {
        return Ok(());
    };

    println!("embed");
    println!("  processed: {}", report.processed);
    println!("  failed: {}", report.failed);
    if let Some(reason) = &report.aborted {
        println!("  aborted: {}", reason);
    }
    Ok(())
}
