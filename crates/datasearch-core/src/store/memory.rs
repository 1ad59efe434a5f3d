//! In-memory [`CatalogStore`] implementation for tests and embedding in
//! other hosts.
//!
//! Datasets live in a `Vec` (insertion order doubles as the tie-break for
//! equal `created_at`) behind `std::sync::RwLock`. Vector search is
//! brute-force cosine similarity; keyword matching is a case-insensitive
//! substring test.

use std::collections::HashSet;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::{cosine_similarity, validate_vector};
use crate::models::{Dataset, EnrichmentLog, MappedRecord, Source};
use crate::status::{EnrichmentStatus, MAX_ATTEMPTS};

use super::{
    CatalogStore, ConflictPolicy, EmbeddingWrite, StatusCounts, UpsertSummary, WriteOutcome,
};

/// In-memory catalog store.
pub struct InMemoryStore {
    dims: usize,
    datasets: RwLock<Vec<Dataset>>,
    logs: RwLock<Vec<EnrichmentLog>>,
}

impl InMemoryStore {
    /// Create an empty store holding `dims`-dimensional embeddings.
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            datasets: RwLock::new(Vec::new()),
            logs: RwLock::new(Vec::new()),
        }
    }

    /// Snapshot of every stored dataset, in insertion order.
    pub fn all(&self) -> Result<Vec<Dataset>> {
        Ok(self.read()?.clone())
    }

    /// Find a dataset by its identity.
    pub fn find(&self, source: Source, external_id: &str) -> Result<Option<Dataset>> {
        Ok(self
            .read()?
            .iter()
            .find(|d| d.source == source && d.external_id == external_id)
            .cloned())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Vec<Dataset>>> {
        self.datasets
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<Dataset>>> {
        self.datasets
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

fn matches_any(d: &Dataset, terms: &[String]) -> bool {
    let title = d.title.to_lowercase();
    let desc = d.description.as_deref().unwrap_or("").to_lowercase();
    terms.iter().any(|t| {
        let t = t.to_lowercase();
        title.contains(&t) || desc.contains(&t)
    })
}

#[async_trait]
impl CatalogStore for InMemoryStore {
    async fn bulk_upsert(
        &self,
        source: Source,
        records: &[MappedRecord],
        insert_as: EnrichmentStatus,
        policy: ConflictPolicy,
    ) -> Result<UpsertSummary> {
        let now = now_ts();
        let mut datasets = self.write()?;
        let mut summary = UpsertSummary::default();

        for record in records {
            let existing = datasets
                .iter_mut()
                .find(|d| d.source == source && d.external_id == record.external_id);

            match (existing, policy) {
                (None, _) => {
                    datasets.push(Dataset::from_mapped(source, record, insert_as, now));
                    summary.inserted += 1;
                }
                (Some(_), ConflictPolicy::KeepExisting) => summary.unchanged += 1,
                (Some(d), ConflictPolicy::RefreshContent) => {
                    if d.refresh_content(&record.content, now) {
                        summary.refreshed += 1;
                    } else {
                        summary.unchanged += 1;
                    }
                }
            }
        }

        Ok(summary)
    }

    async fn upsert(&self, dataset: &Dataset) -> Result<()> {
        let mut datasets = self.write()?;
        match datasets.iter_mut().find(|d| d.id == dataset.id) {
            Some(d) => *d = dataset.clone(),
            None => datasets.push(dataset.clone()),
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Dataset>> {
        Ok(self.read()?.iter().find(|d| d.id == id).cloned())
    }

    async fn select(
        &self,
        source: Source,
        status_in: &[EnrichmentStatus],
        limit: usize,
    ) -> Result<Vec<Dataset>> {
        let mut selected: Vec<Dataset> = self
            .read()?
            .iter()
            .filter(|d| {
                d.source == source
                    && d.is_active
                    && d.attempt_count < MAX_ATTEMPTS
                    && status_in.contains(&d.status)
            })
            .cloned()
            .collect();
        selected.sort_by_key(|d| d.created_at);
        selected.truncate(limit);
        Ok(selected)
    }

    async fn select_for_embedding(&self, limit: usize) -> Result<Vec<Dataset>> {
        let mut selected: Vec<Dataset> = self
            .read()?
            .iter()
            .filter(|d| {
                d.is_active && d.status == EnrichmentStatus::Enriched && d.embedding.is_none()
            })
            .cloned()
            .collect();
        selected.sort_by_key(|d| d.updated_at);
        selected.truncate(limit);
        Ok(selected)
    }

    async fn commit_embeddings(&self, writes: &[EmbeddingWrite]) -> Result<Vec<WriteOutcome>> {
        let mut datasets = self.write()?;
        let mut outcomes = Vec::with_capacity(writes.len());

        for write in writes {
            let outcome = match datasets.iter_mut().find(|d| d.id == write.dataset_id) {
                None => WriteOutcome::Rejected("unknown dataset".to_string()),
                Some(d) if !d.is_active || d.status != EnrichmentStatus::Enriched => {
                    WriteOutcome::Rejected(format!("dataset is {} and not embeddable", d.status))
                }
                Some(d) if d.content_hash != write.content_hash => {
                    WriteOutcome::Rejected("content changed since selection".to_string())
                }
                Some(d) => match validate_vector(&write.vector, self.dims) {
                    Ok(()) => {
                        d.embedding = Some(write.vector.clone());
                        WriteOutcome::Stored
                    }
                    Err(reason) => WriteOutcome::Rejected(reason),
                },
            };
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    async fn mark_failed(&self, id: &str, reason: &str) -> Result<()> {
        let mut datasets = self.write()?;
        if let Some(d) = datasets.iter_mut().find(|d| d.id == id) {
            d.status = EnrichmentStatus::Failed;
            d.is_active = false;
            d.embedding = None;
            d.last_error = Some(reason.to_string());
        }
        Ok(())
    }

    async fn append_log(&self, entry: &EnrichmentLog) -> Result<()> {
        self.logs
            .write()
            .map_err(|_| anyhow!("in-memory log lock poisoned"))?
            .push(entry.clone());
        Ok(())
    }

    async fn logs_for(&self, dataset_id: &str) -> Result<Vec<EnrichmentLog>> {
        Ok(self
            .logs
            .read()
            .map_err(|_| anyhow!("in-memory log lock poisoned"))?
            .iter()
            .filter(|l| l.dataset_id == dataset_id)
            .cloned()
            .collect())
    }

    async fn search_candidates(
        &self,
        query_vec: Option<&[f32]>,
        terms: &[String],
        source: Option<Source>,
        k: usize,
    ) -> Result<Vec<Dataset>> {
        let datasets = self.read()?;
        let ready: Vec<&Dataset> = datasets
            .iter()
            .filter(|d| d.is_ready_for_search() && source.map_or(true, |s| d.source == s))
            .collect();

        let mut out: Vec<Dataset> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();

        if let Some(qv) = query_vec {
            let mut by_sim: Vec<(f32, &Dataset)> = ready
                .iter()
                .map(|d| {
                    let v = d.embedding.as_deref().unwrap_or(&[]);
                    (cosine_similarity(qv, v), *d)
                })
                .collect();
            by_sim.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
            for (_, d) in by_sim.into_iter().take(k) {
                if seen.insert(&d.id) {
                    out.push(d.clone());
                }
            }
        }

        if !terms.is_empty() {
            for d in ready.iter().filter(|d| matches_any(d, terms)).take(k) {
                if seen.insert(&d.id) {
                    out.push((*d).clone());
                }
            }
        }

        Ok(out)
    }

    async fn status_counts(&self, source: Source) -> Result<StatusCounts> {
        let mut counts = StatusCounts::default();
        for status in EnrichmentStatus::ALL {
            counts.by_status.insert(status.as_str(), 0);
        }
        for d in self.read()?.iter().filter(|d| d.source == source) {
            *counts.by_status.entry(d.status.as_str()).or_insert(0) += 1;
            if d.embedding.is_some() {
                counts.embedded += 1;
            }
            if d.is_active {
                counts.active += 1;
            }
        }
        Ok(counts)
    }

    async fn embedding_dims(&self) -> Result<usize> {
        Ok(self.dims)
    }
}
