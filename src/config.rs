//! TOML configuration.
//!
//! Every section except `[db]` is optional and every field has a default,
//! so a minimal config is just:
//!
//! ```toml
//! [db]
//! path = "./data/datasearch.sqlite"
//! ```
//!
//! See `config/datasearch.example.toml` for the full set of options.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use datasearch_core::models::SortOrder;
use datasearch_core::scoring::ScoringWeights;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    /// Vector dimension persisted in the store on `init`.
    #[serde(default = "default_embedding_dims")]
    pub embedding_dims: usize,
}

fn default_embedding_dims() -> usize {
    384
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnrichmentConfig {
    /// Minimum gap between the end of one source call and the start of
    /// the next.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    /// Per-call timeout; expiry counts as a transient failure.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Wall-clock bound for one phase run.
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            call_timeout_secs: default_call_timeout_secs(),
            run_timeout_secs: default_run_timeout_secs(),
        }
    }
}

fn default_min_interval_ms() -> u64 {
    1000
}
fn default_call_timeout_secs() -> u64 {
    30
}
fn default_run_timeout_secs() -> u64 {
    900
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama (or an OpenAI-compatible) endpoint.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    100
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScoringConfig {
    #[serde(default = "default_w_sem")]
    pub w_sem: f64,
    #[serde(default = "default_w_kw")]
    pub w_kw: f64,
    #[serde(default = "default_w_static")]
    pub w_static: f64,
    #[serde(default = "default_half_life_days")]
    pub half_life_days: f64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            w_sem: default_w_sem(),
            w_kw: default_w_kw(),
            w_static: default_w_static(),
            half_life_days: default_half_life_days(),
            candidate_k: default_candidate_k(),
            final_limit: default_final_limit(),
        }
    }
}

fn default_w_sem() -> f64 {
    0.6
}
fn default_w_kw() -> f64 {
    0.25
}
fn default_w_static() -> f64 {
    0.15
}
fn default_half_life_days() -> f64 {
    90.0
}
fn default_candidate_k() -> usize {
    100
}
fn default_final_limit() -> usize {
    20
}

impl ScoringConfig {
    pub fn weights(&self) -> ScoringWeights {
        ScoringWeights {
            w_sem: self.w_sem,
            w_kw: self.w_kw,
            w_static: self.w_static,
            half_life_secs: self.half_life_days * 86_400.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourcesConfig {
    pub kaggle: Option<KaggleConfig>,
    pub huggingface: Option<HuggingFaceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KaggleConfig {
    #[serde(default = "default_kaggle_api_base")]
    pub api_base: String,
    /// Falls back to `KAGGLE_USERNAME`.
    #[serde(default)]
    pub username: Option<String>,
    /// Falls back to `KAGGLE_KEY`.
    #[serde(default)]
    pub key: Option<String>,
    /// Meta Kaggle `Datasets.csv` export used by `seed`.
    #[serde(default)]
    pub meta_csv: Option<PathBuf>,
    #[serde(default = "default_kaggle_page_size")]
    pub page_size: usize,
}

fn default_kaggle_api_base() -> String {
    "https://www.kaggle.com/api/v1".to_string()
}
fn default_kaggle_page_size() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct HuggingFaceConfig {
    #[serde(default = "default_hf_api_base")]
    pub api_base: String,
    /// Falls back to `HF_TOKEN`.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_hf_seed_limit")]
    pub seed_limit: usize,
    #[serde(default = "default_hf_page_size")]
    pub page_size: usize,
}

fn default_hf_api_base() -> String {
    "https://huggingface.co/api".to_string()
}
fn default_hf_seed_limit() -> usize {
    1000
}
fn default_hf_page_size() -> usize {
    100
}

/// Default sizes for each phase when the CLI does not override them.
#[derive(Debug, Deserialize, Clone)]
pub struct JobsConfig {
    #[serde(default = "default_seed_batch")]
    pub seed_batch: usize,
    #[serde(default = "default_enrich_batch")]
    pub enrich_batch: usize,
    #[serde(default = "default_latest_limit")]
    pub latest_limit: usize,
    #[serde(default)]
    pub latest_sort: SortOrder,
    #[serde(default = "default_embed_batch")]
    pub embed_batch: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            seed_batch: default_seed_batch(),
            enrich_batch: default_enrich_batch(),
            latest_limit: default_latest_limit(),
            latest_sort: SortOrder::default(),
            embed_batch: default_embed_batch(),
        }
    }
}

fn default_seed_batch() -> usize {
    1000
}
fn default_enrich_batch() -> usize {
    50
}
fn default_latest_limit() -> usize {
    100
}
fn default_embed_batch() -> usize {
    100
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Parse and validate a config from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.db.embedding_dims == 0 {
        anyhow::bail!("db.embedding_dims must be > 0");
    }

    // Enrichment
    if config.enrichment.min_interval_ms > 60_000 {
        anyhow::bail!("enrichment.min_interval_ms must be <= 60000");
    }
    if config.enrichment.call_timeout_secs == 0 || config.enrichment.run_timeout_secs == 0 {
        anyhow::bail!("enrichment timeouts must be > 0");
    }

    // Scoring
    let s = &config.scoring;
    if [s.w_sem, s.w_kw, s.w_static]
        .iter()
        .any(|w| !w.is_finite() || *w < 0.0)
    {
        anyhow::bail!("scoring weights must be finite and >= 0");
    }
    if s.w_sem + s.w_kw + s.w_static <= 0.0 {
        anyhow::bail!("at least one scoring weight must be > 0");
    }
    if !(s.half_life_days.is_finite() && s.half_life_days > 0.0) {
        anyhow::bail!("scoring.half_life_days must be > 0");
    }
    if s.final_limit == 0 || s.candidate_k == 0 {
        anyhow::bail!("scoring.final_limit and scoring.candidate_k must be >= 1");
    }

    // Embedding
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.is_enabled() {
        match config.embedding.dims {
            None | Some(0) => anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            ),
            Some(d) if d != config.db.embedding_dims => anyhow::bail!(
                "embedding.dims ({}) does not match db.embedding_dims ({})",
                d,
                config.db.embedding_dims
            ),
            Some(_) => {}
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    Ok(config)
}
