//! Shared fakes for the integration tests.
#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use datasearch::config::{parse_config, Config};
use datasearch::connector::SourceConnector;
use datasearch::models::{DatasetContent, MappedRecord, RawRecord, RecordShape, SortOrder, Source};
use datasearch::sqlite_store::SqliteStore;
use datasearch_core::embedding::EmbeddingProvider;
use datasearch_core::error::{EncodingError, SourceError};

pub type Reply = Result<Value, SourceError>;

/// Connector whose responses are scripted per external id.
///
/// Payloads are `{"title": .., "description": ..}`; a missing description
/// maps as partial and `{"malformed": true}` fails mapping.
pub struct ScriptedConnector {
    source: Source,
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    feed: Mutex<Result<Vec<RawRecord>, SourceError>>,
    calls: Mutex<Vec<String>>,
    delay: Duration,
}

impl ScriptedConnector {
    pub fn new(source: Source) -> Self {
        Self {
            source,
            replies: Mutex::new(HashMap::new()),
            feed: Mutex::new(Ok(Vec::new())),
            calls: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    /// Every fetch takes `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn reply(&self, external_id: &str, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .entry(external_id.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Records returned by both `fetch_seed` and `fetch_latest`.
    pub fn set_feed(&self, feed: Result<Vec<RawRecord>, SourceError>) {
        *self.feed.lock().unwrap() = feed;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

pub fn full(title: &str, description: &str) -> Reply {
    Ok(json!({ "title": title, "description": description }))
}

pub fn partial(title: &str) -> Reply {
    Ok(json!({ "title": title }))
}

pub fn feed_record(external_id: &str, title: &str) -> RawRecord {
    RawRecord {
        external_id: external_id.to_string(),
        shape: RecordShape::Listing,
        payload: json!({ "title": title }),
    }
}

#[async_trait]
impl SourceConnector for ScriptedConnector {
    fn source(&self) -> Source {
        self.source
    }

    async fn fetch_seed(&self) -> Result<Vec<RawRecord>, SourceError> {
        tokio::time::sleep(self.delay).await;
        self.feed.lock().unwrap().clone()
    }

    async fn fetch_by_id(&self, external_id: &str) -> Result<RawRecord, SourceError> {
        self.calls.lock().unwrap().push(external_id.to_string());
        tokio::time::sleep(self.delay).await;
        let reply = self
            .replies
            .lock()
            .unwrap()
            .get_mut(external_id)
            .and_then(|q| q.pop_front())
            .unwrap_or_else(|| Err(SourceError::Transient("no scripted reply".to_string())));
        reply.map(|payload| RawRecord {
            external_id: external_id.to_string(),
            shape: RecordShape::Detail,
            payload,
        })
    }

    async fn fetch_latest(
        &self,
        limit: usize,
        _order: SortOrder,
    ) -> Result<Vec<RawRecord>, SourceError> {
        tokio::time::sleep(self.delay).await;
        self.feed
            .lock()
            .unwrap()
            .clone()
            .map(|records| records.into_iter().take(limit).collect())
    }

    fn map(&self, raw: &RawRecord) -> Result<MappedRecord, SourceError> {
        if raw.payload.get("malformed").is_some() {
            return Err(SourceError::Mapping("malformed payload".to_string()));
        }
        let title = raw
            .payload
            .get("title")
            .and_then(Value::as_str)
            .ok_or_else(|| SourceError::Mapping("missing title".to_string()))?;
        let description = raw
            .payload
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(MappedRecord {
            external_id: raw.external_id.clone(),
            partial: description.is_none(),
            content: DatasetContent {
                title: title.to_string(),
                description,
                url: format!("https://example.org/{}", raw.external_id),
                tags: BTreeSet::new(),
                metadata: json!({}),
                static_score: 0.5,
            },
        })
    }
}

/// A bare mapped record, as a seed feed would produce.
pub fn minimal(external_id: &str) -> MappedRecord {
    MappedRecord {
        external_id: external_id.to_string(),
        partial: true,
        content: DatasetContent {
            title: format!("Dataset {}", external_id),
            description: None,
            url: format!("https://example.org/{}", external_id),
            tags: BTreeSet::new(),
            metadata: json!({}),
            static_score: 0.1,
        },
    }
}

/// A fully described record, for datasets inserted as ENRICHED.
pub fn described(external_id: &str, title: &str, description: &str) -> MappedRecord {
    MappedRecord {
        external_id: external_id.to_string(),
        partial: false,
        content: DatasetContent {
            title: title.to_string(),
            description: Some(description.to_string()),
            url: format!("https://example.org/{}", external_id),
            tags: BTreeSet::new(),
            metadata: json!({}),
            static_score: 0.3,
        },
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum EncoderMode {
    Ok,
    DropOne,
    /// The second vector comes back one dimension short.
    ShortSecond,
    Fail,
}

/// Deterministic encoder: a vector derived from text length.
pub struct FakeEncoder {
    dims: usize,
    mode: EncoderMode,
    calls: AtomicUsize,
}

impl FakeEncoder {
    pub fn new(dims: usize, mode: EncoderMode) -> Self {
        Self {
            dims,
            mode,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn text_vector(text: &str, dims: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dims];
    for (i, b) in text.bytes().enumerate() {
        v[i % dims] += b as f32 / 255.0;
    }
    v
}

#[async_trait]
impl EmbeddingProvider for FakeEncoder {
    fn model_name(&self) -> &str {
        "fake"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EncodingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut out: Vec<Vec<f32>> = texts.iter().map(|t| text_vector(t, self.dims)).collect();
        match self.mode {
            EncoderMode::Ok => {}
            EncoderMode::DropOne => {
                out.pop();
            }
            EncoderMode::ShortSecond => {
                if let Some(v) = out.get_mut(1) {
                    v.pop();
                }
            }
            EncoderMode::Fail => {
                return Err(EncodingError::Backend("model not loaded".to_string()));
            }
        }
        Ok(out)
    }
}

pub fn test_config(dir: &TempDir, dims: usize) -> Config {
    parse_config(&format!(
        "[db]\npath = \"{}\"\nembedding_dims = {}\n",
        dir.path().join("catalog.sqlite").display(),
        dims
    ))
    .unwrap()
}

/// A migrated SQLite store in `dir`.
pub async fn sqlite_store(dir: &TempDir, dims: usize) -> Arc<SqliteStore> {
    let config = test_config(dir, dims);
    let pool = datasearch::db::connect(&config).await.unwrap();
    datasearch::migrate::migrate_pool(&pool, dims).await.unwrap();
    Arc::new(SqliteStore::new(pool))
}
