//! Catalog storage abstraction.
//!
//! The [`CatalogStore`] trait covers every read and write the phase
//! drivers and the search path need, so the same pipeline runs against
//! SQLite in production and [`memory::InMemoryStore`] in tests.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Dataset, EnrichmentLog, MappedRecord, Source};
use crate::status::EnrichmentStatus;

/// What to do when a bulk upsert hits an existing `(source, external_id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Leave the stored record untouched.
    KeepExisting,
    /// Overwrite content fields; status, attempts, and activity are kept.
    RefreshContent,
}

/// Counts from a bulk upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub inserted: u64,
    /// Existing records whose hashed text changed.
    pub refreshed: u64,
    /// Existing records left as they were (or refreshed with identical text).
    pub unchanged: u64,
}

impl UpsertSummary {
    /// Records whose stored content was written.
    pub fn written(&self) -> u64 {
        self.inserted + self.refreshed
    }
}

/// One vector to persist for one dataset.
///
/// `content_hash` is the hash of the text the vector was encoded from;
/// the write is rejected if the dataset's content changed since.
#[derive(Debug, Clone)]
pub struct EmbeddingWrite {
    pub dataset_id: String,
    pub content_hash: String,
    pub vector: Vec<f32>,
}

/// Per-item result of [`CatalogStore::commit_embeddings`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Stored,
    Rejected(String),
}

/// Per-status dataset counts for one source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub by_status: BTreeMap<&'static str, u64>,
    pub embedded: u64,
    pub active: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.by_status.values().sum()
    }

    pub fn get(&self, status: EnrichmentStatus) -> u64 {
        self.by_status.get(status.as_str()).copied().unwrap_or(0)
    }
}

/// Abstract storage backend for the dataset catalog.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`bulk_upsert`](CatalogStore::bulk_upsert) | Insert or refresh mapped records by `(source, external_id)` |
/// | [`upsert`](CatalogStore::upsert) | Write back one dataset after an enrichment attempt |
/// | [`get`](CatalogStore::get) | Fetch a dataset by id |
/// | [`select`](CatalogStore::select) | Datasets eligible for enrichment |
/// | [`select_for_embedding`](CatalogStore::select_for_embedding) | Enriched datasets missing a vector |
/// | [`commit_embeddings`](CatalogStore::commit_embeddings) | Persist a batch of vectors in one commit |
/// | [`mark_failed`](CatalogStore::mark_failed) | Force a dataset to FAILED and inactive |
/// | [`append_log`](CatalogStore::append_log) / [`logs_for`](CatalogStore::logs_for) | Enrichment audit trail |
/// | [`search_candidates`](CatalogStore::search_candidates) | Ready-for-search candidates for a query |
/// | [`status_counts`](CatalogStore::status_counts) | Per-source lifecycle counts |
/// | [`embedding_dims`](CatalogStore::embedding_dims) | The stored vector dimension |
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Insert new records with `insert_as` status; handle existing ones
    /// according to `policy`.
    async fn bulk_upsert(
        &self,
        source: Source,
        records: &[MappedRecord],
        insert_as: EnrichmentStatus,
        policy: ConflictPolicy,
    ) -> Result<UpsertSummary>;

    /// Write every mutable field of `dataset`, matched by id.
    async fn upsert(&self, dataset: &Dataset) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Dataset>>;

    /// Active datasets of `source` whose status is in `status_in` and
    /// whose attempt count is below the ceiling, oldest first.
    async fn select(
        &self,
        source: Source,
        status_in: &[EnrichmentStatus],
        limit: usize,
    ) -> Result<Vec<Dataset>>;

    /// Active ENRICHED datasets without an embedding, by `updated_at`
    /// ascending.
    async fn select_for_embedding(&self, limit: usize) -> Result<Vec<Dataset>>;

    /// Store each vector, isolating per-item failures, and make all
    /// accepted writes visible together.
    async fn commit_embeddings(&self, writes: &[EmbeddingWrite]) -> Result<Vec<WriteOutcome>>;

    async fn mark_failed(&self, id: &str, reason: &str) -> Result<()>;

    async fn append_log(&self, entry: &EnrichmentLog) -> Result<()>;

    async fn logs_for(&self, dataset_id: &str) -> Result<Vec<EnrichmentLog>>;

    /// Ready-for-search datasets: the `k` nearest to `query_vec` (when
    /// given) together with up to `k` whose title or description contains
    /// any of `terms`. No duplicates.
    async fn search_candidates(
        &self,
        query_vec: Option<&[f32]>,
        terms: &[String],
        source: Option<Source>,
        k: usize,
    ) -> Result<Vec<Dataset>>;

    async fn status_counts(&self, source: Source) -> Result<StatusCounts>;

    async fn embedding_dims(&self) -> Result<usize>;
}
