//! Hybrid ranking: semantic similarity, keyword match, and a decayed
//! static score.
//!
//! ```text
//! score(d, q) = w_sem    × semantic(d.embedding, q.embedding)
//!             + w_kw     × keyword(d.title, d.description, q.terms)
//!             + w_static × d.static_score × decay(now − d.updated_at)
//! ```
//!
//! * `semantic` maps cosine similarity from `[-1, 1]` onto `[0, 1]`.
//! * `keyword` averages, over query terms, `1.0` for a title hit and `0.5`
//!   for a description-only hit.
//! * `decay` halves every `half_life_secs`; records refreshed in the
//!   future (clock skew) are treated as age zero.
//!
//! Ranking sorts by score descending, then `static_score` descending,
//! then dataset id ascending, so identical inputs always produce the same
//! order.
//!
//! [`rank`] is pure. [`search`] narrows candidates through a
//! [`CatalogStore`] first; eligibility (`is_ready_for_search`) is the
//! store's job, never the scorer's.

use std::cmp::Ordering;

use anyhow::Result;
use serde::Serialize;

use crate::embedding::cosine_similarity;
use crate::models::{Dataset, Source};
use crate::store::CatalogStore;

/// Fixed ranking weights.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringWeights {
    pub w_sem: f64,
    pub w_kw: f64,
    pub w_static: f64,
    pub half_life_secs: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            w_sem: 0.6,
            w_kw: 0.25,
            w_static: 0.15,
            half_life_secs: 90.0 * 86_400.0,
        }
    }
}

/// A parsed query: lower-cased terms plus an optional embedding.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub terms: Vec<String>,
    pub embedding: Option<Vec<f32>>,
}

impl Query {
    /// Split `text` into distinct lower-case alphanumeric terms.
    pub fn parse(text: &str, embedding: Option<Vec<f32>>) -> Self {
        let mut terms: Vec<String> = Vec::new();
        for raw in text.split(|c: char| !c.is_alphanumeric()) {
            let term = raw.to_lowercase();
            if !term.is_empty() && !terms.contains(&term) {
                terms.push(term);
            }
        }
        Self { terms, embedding }
    }
}

/// Per-signal breakdown of a score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub semantic: f64,
    pub keyword: f64,
    pub static_score: f64,
    pub decay: f64,
    pub total: f64,
}

/// A dataset with its computed score.
#[derive(Debug, Clone)]
pub struct Scored {
    pub dataset: Dataset,
    pub breakdown: ScoreBreakdown,
}

/// Map cosine similarity onto `[0, 1]`. Missing vectors score zero.
pub fn semantic_similarity(doc: Option<&[f32]>, query: Option<&[f32]>) -> f64 {
    match (doc, query) {
        (Some(d), Some(q)) => {
            let cos = cosine_similarity(d, q) as f64;
            ((cos + 1.0) / 2.0).clamp(0.0, 1.0)
        }
        _ => 0.0,
    }
}

/// Fraction of query terms found in the title (full credit) or only in
/// the description (half credit).
pub fn keyword_match(title: &str, description: Option<&str>, terms: &[String]) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let title = title.to_lowercase();
    let description = description.unwrap_or("").to_lowercase();

    let hits: f64 = terms
        .iter()
        .map(|t| {
            if title.contains(t.as_str()) {
                1.0
            } else if description.contains(t.as_str()) {
                0.5
            } else {
                0.0
            }
        })
        .sum();

    hits / terms.len() as f64
}

/// Exponential half-life decay in `(0, 1]`, non-increasing in age.
pub fn decay(age_secs: f64, half_life_secs: f64) -> f64 {
    if half_life_secs <= 0.0 || !half_life_secs.is_finite() {
        return 1.0;
    }
    let age = if age_secs.is_finite() { age_secs.max(0.0) } else { 0.0 };
    0.5f64.powf(age / half_life_secs)
}

/// Score one dataset against a query at time `now` (unix seconds).
pub fn score(d: &Dataset, query: &Query, weights: &ScoringWeights, now: i64) -> ScoreBreakdown {
    let semantic = semantic_similarity(d.embedding.as_deref(), query.embedding.as_deref());
    let keyword = keyword_match(&d.title, d.description.as_deref(), &query.terms);
    let decay = decay((now - d.updated_at) as f64, weights.half_life_secs);
    let static_score = d.static_score.max(0.0);

    let total = weights.w_sem * semantic
        + weights.w_kw * keyword
        + weights.w_static * static_score * decay;

    ScoreBreakdown {
        semantic,
        keyword,
        static_score,
        decay,
        total,
    }
}

fn ranking_order(a: &Scored, b: &Scored) -> Ordering {
    b.breakdown
        .total
        .total_cmp(&a.breakdown.total)
        .then_with(|| b.dataset.static_score.total_cmp(&a.dataset.static_score))
        .then_with(|| a.dataset.id.cmp(&b.dataset.id))
}

/// Score and order `candidates`, keeping at most `limit`.
pub fn rank(
    candidates: Vec<Dataset>,
    query: &Query,
    weights: &ScoringWeights,
    now: i64,
    limit: usize,
) -> Vec<Scored> {
    let mut scored: Vec<Scored> = candidates
        .into_iter()
        .map(|dataset| {
            let breakdown = score(&dataset, query, weights, now);
            Scored { dataset, breakdown }
        })
        .collect();
    scored.sort_by(ranking_order);
    scored.truncate(limit);
    scored
}

/// Bundles all inputs for a single search invocation.
#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    pub query: &'a str,
    /// Pre-computed query embedding; keyword-only search when absent.
    pub query_vec: Option<Vec<f32>>,
    pub source: Option<Source>,
    pub weights: ScoringWeights,
    pub candidate_k: usize,
    pub limit: usize,
    pub now: i64,
    /// Populate [`SearchHit::explain`].
    pub explain: bool,
}

/// A ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub source: Source,
    pub external_id: String,
    pub title: String,
    pub url: String,
    pub score: f64,
    pub static_score: f64,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explain: Option<ScoreBreakdown>,
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// Fetch candidates from `store` and rank them.
pub async fn search<S: CatalogStore + ?Sized>(
    store: &S,
    req: &SearchRequest<'_>,
) -> Result<Vec<SearchHit>> {
    let query = Query::parse(req.query, req.query_vec.clone());
    if query.terms.is_empty() && query.embedding.is_none() {
        return Ok(Vec::new());
    }

    let candidates = store
        .search_candidates(
            query.embedding.as_deref(),
            &query.terms,
            req.source,
            req.candidate_k,
        )
        .await?;

    let hits = rank(candidates, &query, &req.weights, req.now, req.limit)
        .into_iter()
        .map(|s| SearchHit {
            id: s.dataset.id,
            source: s.dataset.source,
            external_id: s.dataset.external_id,
            title: s.dataset.title,
            url: s.dataset.url,
            score: s.breakdown.total,
            static_score: s.dataset.static_score,
            updated_at: format_ts_iso(s.dataset.updated_at),
            explain: req.explain.then_some(s.breakdown),
        })
        .collect();

    Ok(hits)
}

/// Source-independent importance in `[0, 1)` from popularity counters.
///
/// Counters are log-damped so a dataset with ten million downloads does
/// not drown everything else, then squashed with `1 − e^(−x/10)`.
pub fn popularity_score(downloads: u64, likes: u64, views: u64) -> f64 {
    let x = 0.5 * (downloads as f64).ln_1p()
        + (likes as f64).ln_1p()
        + 0.25 * (views as f64).ln_1p();
    1.0 - (-x / 10.0).exp()
}
