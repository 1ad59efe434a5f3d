//! Embedding provider implementations.
//!
//! All providers implement the core
//! [`EmbeddingProvider`](datasearch_core::embedding::EmbeddingProvider)
//! trait:
//! - **[`DisabledProvider`]** fails every call; used when embeddings are not configured.
//! - **[`OpenAIProvider`]** calls `POST {url}/v1/embeddings`.
//! - **[`OllamaProvider`]** calls `POST {url}/api/embed`.
//! - **`LocalProvider`** runs a fastembed model in-process (feature
//!   `local-embeddings-fastembed`). The model is loaded on first use and
//!   reused for later batches.
//!
//! # Retry Strategy
//!
//! The HTTP providers retry transient errors with exponential backoff:
//! - HTTP 429 and 5xx → retry
//! - other HTTP 4xx → fail immediately
//! - network errors → retry
//! - backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Every provider checks that each returned vector has the configured
//! dimension; a mismatch is an [`EncodingError::DimensionMismatch`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use datasearch_core::embedding::EmbeddingProvider;
use datasearch_core::error::EncodingError;

use crate::config::EmbeddingConfig;

// ============ Disabled Provider ============

pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EncodingError> {
        Err(EncodingError::Backend(
            "embedding provider is disabled; set [embedding] provider in config".to_string(),
        ))
    }
}

// ============ Shared HTTP plumbing ============

fn check_dims(vectors: &[Vec<f32>], dims: usize) -> Result<(), EncodingError> {
    match vectors.iter().find(|v| v.len() != dims) {
        Some(v) => Err(EncodingError::DimensionMismatch {
            expected: dims,
            actual: v.len(),
        }),
        None => Ok(()),
    }
}

fn json_vector(value: &Value) -> Result<Vec<f32>, EncodingError> {
    value
        .as_array()
        .ok_or_else(|| EncodingError::Backend("embedding is not an array".to_string()))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| EncodingError::Backend("embedding holds a non-number".to_string()))
        })
        .collect()
}

/// POST `body` to `url`, retrying 429/5xx/network errors.
async fn post_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &Value,
    max_retries: u32,
    what: &str,
) -> Result<Value, EncodingError> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut req = client.post(url).json(body);
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }

        match req.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return response.json::<Value>().await.map_err(|e| {
                        EncodingError::Backend(format!("{}: invalid response body: {}", what, e))
                    });
                }

                let body_text = response.text().await.unwrap_or_default();
                let err =
                    EncodingError::Backend(format!("{} error {}: {}", what, status, body_text));
                if status.as_u16() == 429 || status.is_server_error() {
                    warn!(attempt, %status, "{} request failed; retrying", what);
                    last_err = Some(err);
                    continue;
                }
                return Err(err);
            }
            Err(e) => {
                warn!(attempt, error = %e, "{} connection failed; retrying", what);
                last_err = Some(EncodingError::Backend(format!(
                    "{} connection error: {}",
                    what, e
                )));
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| EncodingError::Backend(format!("{} failed after retries", what))))
}

fn http_client(config: &EmbeddingConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

fn required_model_and_dims(config: &EmbeddingConfig, provider: &str) -> Result<(String, usize)> {
    let model = config
        .model
        .clone()
        .ok_or_else(|| anyhow::anyhow!("embedding.model required for {} provider", provider))?;
    let dims = config
        .dims
        .ok_or_else(|| anyhow::anyhow!("embedding.dims required for {} provider", provider))?;
    Ok((model, dims))
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Requires the `OPENAI_API_KEY` environment variable. `embedding.url`
/// points it at an OpenAI-compatible server instead of api.openai.com.
pub struct OpenAIProvider {
    client: reqwest::Client,
    model: String,
    dims: usize,
    api_key: String,
    base_url: String,
    max_retries: u32,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = required_model_and_dims(config, "OpenAI")?;
        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) => key,
            Err(_) => bail!("OPENAI_API_KEY environment variable not set"),
        };
        Self::with_key(config, model, dims, api_key)
    }

    /// Build with an explicit key instead of reading the environment.
    pub fn with_key(
        config: &EmbeddingConfig,
        model: String,
        dims: usize,
        api_key: String,
    ) -> Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            model,
            dims,
            api_key,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string())
                .trim_end_matches('/')
                .to_string(),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EncodingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let url = format!("{}/v1/embeddings", self.base_url);
        let json = post_with_retry(
            &self.client,
            &url,
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI API",
        )
        .await?;
        let vectors = parse_openai_response(&json)?;
        check_dims(&vectors, self.dims)?;
        Ok(vectors)
    }
}

/// Extract `data[].embedding`, ordered by `data[].index`.
fn parse_openai_response(json: &Value) -> Result<Vec<Vec<f32>>, EncodingError> {
    let data = json
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            EncodingError::Backend("invalid OpenAI response: missing data array".to_string())
        })?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(Value::as_u64)
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item.get("embedding").ok_or_else(|| {
            EncodingError::Backend("invalid OpenAI response: missing embedding".to_string())
        })?;
        indexed.push((index, json_vector(embedding)?));
    }
    indexed.sort_by_key(|(i, _)| *i);

    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance (default
/// `http://localhost:11434`).
pub struct OllamaProvider {
    client: reqwest::Client,
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = required_model_and_dims(config, "Ollama")?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client: http_client(config)?,
            model,
            dims,
            url,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EncodingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let url = format!("{}/api/embed", self.url);
        let json = post_with_retry(&self.client, &url, None, &body, self.max_retries, "Ollama API")
            .await?;
        let vectors = parse_ollama_response(&json)?;
        check_dims(&vectors, self.dims)?;
        Ok(vectors)
    }
}

fn parse_ollama_response(json: &Value) -> Result<Vec<Vec<f32>>, EncodingError> {
    json.get("embeddings")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            EncodingError::Backend("invalid Ollama response: missing embeddings array".to_string())
        })?
        .iter()
        .map(json_vector)
        .collect()
}

// ============ Local Provider (fastembed) ============

/// In-process embedding with fastembed. Models are downloaded from
/// Hugging Face on first use and cached; later runs work offline.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalProvider {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        // Reject unknown names up front rather than on the first batch.
        let (_, default_dims) = fastembed_model(&model_name)?;

        Ok(Self {
            dims: config.dims.unwrap_or(default_dims),
            model_name,
            batch_size: config.batch_size,
            model: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn fastembed_model(name: &str) -> Result<(fastembed::EmbeddingModel, usize)> {
    use fastembed::EmbeddingModel as M;
    Ok(match name {
        "all-minilm-l6-v2" => (M::AllMiniLML6V2, 384),
        "bge-small-en-v1.5" => (M::BGESmallENV15, 384),
        "bge-base-en-v1.5" => (M::BGEBaseENV15, 768),
        "bge-large-en-v1.5" => (M::BGELargeENV15, 1024),
        "nomic-embed-text-v1.5" => (M::NomicEmbedTextV15, 768),
        "multilingual-e5-small" => (M::MultilingualE5Small, 384),
        "multilingual-e5-base" => (M::MultilingualE5Base, 768),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1.5, multilingual-e5-small, multilingual-e5-base",
            other
        ),
    })
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EncodingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let slot = self.model.clone();
        let name = self.model_name.clone();
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        let vectors = tokio::task::spawn_blocking(move || {
            let mut guard = slot
                .lock()
                .map_err(|_| EncodingError::Backend("local model lock poisoned".to_string()))?;
            if guard.is_none() {
                let (model, _) =
                    fastembed_model(&name).map_err(|e| EncodingError::Backend(e.to_string()))?;
                let loaded = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(model).with_show_download_progress(true),
                )
                .map_err(|e| {
                    EncodingError::Backend(format!("failed to initialize local model: {}", e))
                })?;
                *guard = Some(loaded);
            }
            match guard.as_mut() {
                Some(model) => model
                    .embed(texts, Some(batch_size))
                    .map_err(|e| EncodingError::Backend(format!("local embedding failed: {}", e))),
                None => Err(EncodingError::Backend("local model unavailable".to_string())),
            }
        })
        .await
        .map_err(|e| EncodingError::Backend(format!("embedding task failed: {}", e)))??;

        check_dims(&vectors, self.dims)?;
        Ok(vectors)
    }
}

/// Create the provider named by `embedding.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
/// | `"local"` | `LocalProvider` (feature `local-embeddings-fastembed`) |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}
