//! Core data models for the dataset catalog.
//!
//! A [`Dataset`] is the canonical catalog entry. Connectors never build
//! one directly: they produce [`RawRecord`]s, a source-specific mapper
//! turns those into [`MappedRecord`]s, and the store or the phase drivers
//! fold mapped content into datasets.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::status::{EnrichmentEvent, EnrichmentStatus, InvalidTransition};

/// External catalog a dataset comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Kaggle,
    HuggingFace,
}

impl Source {
    pub const ALL: [Source; 2] = [Source::Kaggle, Source::HuggingFace];

    pub fn as_str(self) -> &'static str {
        match self {
            Source::Kaggle => "kaggle",
            Source::HuggingFace => "huggingface",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "kaggle" => Ok(Source::Kaggle),
            "huggingface" | "hf" => Ok(Source::HuggingFace),
            other => anyhow::bail!("unknown source: '{}'. Must be kaggle or huggingface.", other),
        }
    }
}

/// Ordering requested from a source's "latest" listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Updated,
    Hottest,
    Votes,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Updated => "updated",
            SortOrder::Hottest => "hottest",
            SortOrder::Votes => "votes",
        }
    }
}

impl FromStr for SortOrder {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "updated" => Ok(SortOrder::Updated),
            "hottest" => Ok(SortOrder::Hottest),
            "votes" => Ok(SortOrder::Votes),
            other => anyhow::bail!(
                "unknown sort order: '{}'. Must be updated, hottest, or votes.",
                other
            ),
        }
    }
}

/// Which upstream shape a [`RawRecord`] payload has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordShape {
    /// A row from a bulk seed feed; usually only identifiers and counters.
    Seed,
    /// A full single-dataset response.
    Detail,
    /// An entry from a paged listing.
    Listing,
}

/// Unmapped payload from a source connector.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub external_id: String,
    pub shape: RecordShape,
    pub payload: serde_json::Value,
}

/// The content fields of a dataset, as produced by a source mapper.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DatasetContent {
    pub title: String,
    pub description: Option<String>,
    pub url: String,
    pub tags: BTreeSet<String>,
    pub metadata: serde_json::Value,
    pub static_score: f64,
}

impl DatasetContent {
    /// SHA-256 over the text that feeds embedding and keyword matching.
    ///
    /// Counters and metadata are excluded so that popularity churn does
    /// not force re-embedding.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.title.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.description.as_deref().unwrap_or("").as_bytes());
        hasher.update([0u8]);
        for tag in &self.tags {
            hasher.update(tag.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }
}

/// A mapped record ready to be upserted or folded into a dataset.
#[derive(Debug, Clone)]
pub struct MappedRecord {
    pub external_id: String,
    pub content: DatasetContent,
    /// The source signalled that some content is still missing.
    pub partial: bool,
}

/// Canonical catalog entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub id: String,
    pub source: Source,
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    pub url: String,
    pub tags: BTreeSet<String>,
    pub metadata: serde_json::Value,
    pub status: EnrichmentStatus,
    pub attempt_count: u32,
    pub is_active: bool,
    pub last_enriched_at: Option<i64>,
    pub last_error: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub static_score: f64,
    pub content_hash: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Dataset {
    /// Build a fresh, active dataset from mapped content.
    pub fn from_mapped(
        source: Source,
        record: &MappedRecord,
        status: EnrichmentStatus,
        now: i64,
    ) -> Self {
        let content = &record.content;
        Self {
            id: Uuid::new_v4().to_string(),
            source,
            external_id: record.external_id.clone(),
            title: content.title.clone(),
            description: content.description.clone(),
            url: content.url.clone(),
            tags: content.tags.clone(),
            metadata: content.metadata.clone(),
            status,
            attempt_count: 0,
            is_active: true,
            last_enriched_at: None,
            last_error: None,
            embedding: None,
            static_score: sanitize_score(content.static_score),
            content_hash: content.content_hash(),
            created_at: now,
            updated_at: now,
        }
    }

    /// `is_active ∧ ENRICHED ∧ embedding present`.
    pub fn is_ready_for_search(&self) -> bool {
        self.is_active && self.status == EnrichmentStatus::Enriched && self.embedding.is_some()
    }

    /// Identifier to hand to the source's fetch-by-id call.
    ///
    /// Kaggle seeds are keyed by a numeric id while the API wants an
    /// `owner/slug` ref; once a ref has been learned it is kept in
    /// `metadata.ref` and preferred.
    pub fn lookup_key(&self) -> &str {
        self.metadata
            .get("ref")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.external_id)
    }

    /// Text handed to the encoder: the title twice, then the description.
    pub fn encode_text(&self) -> String {
        let mut text = format!("{} {}", self.title, self.title);
        if let Some(desc) = self.description.as_deref().filter(|d| !d.trim().is_empty()) {
            text.push(' ');
            text.push_str(desc);
        }
        text
    }

    /// Replace content fields, preserving identity and lifecycle.
    ///
    /// Returns `true` when the hashed text changed; in that case
    /// `updated_at` moves to `now` and any stored embedding is dropped.
    pub fn refresh_content(&mut self, content: &DatasetContent, now: i64) -> bool {
        let hash = content.content_hash();
        let changed = hash != self.content_hash;

        self.title = content.title.clone();
        self.description = content.description.clone();
        self.url = content.url.clone();
        self.tags = content.tags.clone();
        self.metadata = merge_metadata(&self.metadata, &content.metadata);
        self.static_score = sanitize_score(content.static_score);

        if changed {
            self.content_hash = hash;
            self.updated_at = now;
            self.embedding = None;
        }
        changed
    }

    /// Apply a lifecycle event, keeping the status invariants intact.
    pub fn apply(&mut self, event: EnrichmentEvent) -> Result<EnrichmentStatus, InvalidTransition> {
        let next = self.status.apply(event)?;
        self.status = next;
        if next != EnrichmentStatus::Enriched {
            self.embedding = None;
        }
        if next == EnrichmentStatus::Failed {
            self.is_active = false;
        }
        Ok(next)
    }

    /// Fold a successful fetch into this dataset.
    pub fn record_success(
        &mut self,
        record: &MappedRecord,
        now: i64,
    ) -> Result<EnrichmentStatus, InvalidTransition> {
        let next = self.status.apply(EnrichmentEvent::Succeeded {
            partial: record.partial,
        })?;
        self.refresh_content(&record.content, now);
        self.updated_at = now;
        self.last_enriched_at = Some(now);
        self.last_error = None;
        self.apply(EnrichmentEvent::Succeeded {
            partial: record.partial,
        })?;
        Ok(next)
    }

    /// Terminal failure: the dataset no longer exists upstream.
    pub fn record_not_found(
        &mut self,
        reason: &str,
    ) -> Result<EnrichmentStatus, InvalidTransition> {
        let next = self.apply(EnrichmentEvent::NotFound)?;
        self.last_error = Some(reason.to_string());
        Ok(next)
    }

    /// Count one retryable failure; fails the dataset at the ceiling.
    pub fn record_attempt_failure(
        &mut self,
        reason: &str,
    ) -> Result<EnrichmentStatus, InvalidTransition> {
        let attempts = self.attempt_count + 1;
        let next = self.apply(EnrichmentEvent::AttemptFailed { attempts })?;
        self.attempt_count = attempts;
        self.last_error = Some(reason.to_string());
        Ok(next)
    }

    /// Check the status invariants. Used by stores and tests.
    pub fn invariants_hold(&self) -> bool {
        let embedding_ok = self.embedding.is_none() || self.status == EnrichmentStatus::Enriched;
        let failed_ok = self.status != EnrichmentStatus::Failed || !self.is_active;
        embedding_ok && failed_ok && self.static_score >= 0.0
    }
}

/// Shallow-merge `update` over `base` when both are objects.
///
/// Keys learned on earlier passes (such as a Kaggle `ref`) survive a
/// later refresh from a poorer feed.
pub fn merge_metadata(base: &serde_json::Value, update: &serde_json::Value) -> serde_json::Value {
    match (base, update) {
        (serde_json::Value::Object(b), serde_json::Value::Object(u)) => {
            let mut merged = b.clone();
            for (k, v) in u {
                if !v.is_null() {
                    merged.insert(k.clone(), v.clone());
                }
            }
            serde_json::Value::Object(merged)
        }
        (_, serde_json::Value::Null) => base.clone(),
        _ => update.clone(),
    }
}

fn sanitize_score(score: f64) -> f64 {
    if score.is_finite() && score > 0.0 {
        score
    } else {
        0.0
    }
}

/// Outcome recorded in an [`EnrichmentLog`] entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogOutcome {
    Success,
    Failed,
    RateLimited,
}

impl LogOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            LogOutcome::Success => "SUCCESS",
            LogOutcome::Failed => "FAILED",
            LogOutcome::RateLimited => "RATE_LIMITED",
        }
    }
}

impl FromStr for LogOutcome {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(LogOutcome::Success),
            "FAILED" => Ok(LogOutcome::Failed),
            "RATE_LIMITED" => Ok(LogOutcome::RateLimited),
            other => anyhow::bail!("unknown log outcome: '{}'", other),
        }
    }
}

/// Append-only audit entry, one per processing attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichmentLog {
    pub dataset_id: String,
    pub outcome: LogOutcome,
    pub message: String,
    pub timestamp: i64,
}

impl EnrichmentLog {
    pub fn new(
        dataset_id: &str,
        outcome: LogOutcome,
        message: impl Into<String>,
        now: i64,
    ) -> Self {
        Self {
            dataset_id: dataset_id.to_string(),
            outcome,
            message: message.into(),
            timestamp: now,
        }
    }
}

/// Counts returned by every enrichment phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PhaseReport {
    pub succeeded: u64,
    pub failed: u64,
    pub rate_limited: u64,
    /// Known records a bulk load left as they were.
    pub skipped: u64,
    /// The run-level deadline expired before the batch finished.
    pub timed_out: bool,
}

/// Counts returned by the embedding batch processor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EmbedReport {
    pub processed: u64,
    pub failed: u64,
    /// Set when the run stopped on a fatal encoder error.
    pub aborted: Option<String>,
}
