//! HuggingFace Hub dataset connector.
//!
//! Listings page through `GET {api_base}/datasets` by following the
//! `Link: rel="next"` cursor; single datasets come from
//! `GET {api_base}/datasets/{id}`. A token (config or `HF_TOKEN`) is sent
//! as a bearer header when present.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use datasearch_core::connector::SourceConnector;
use datasearch_core::error::SourceError;
use datasearch_core::models::{
    DatasetContent, MappedRecord, RawRecord, RecordShape, SortOrder, Source,
};
use datasearch_core::scoring::popularity_score;

use crate::config::HuggingFaceConfig;
use crate::connector_http::{build_client, get_json, next_link};

/// File formats recognised from `format:` tags or bare tags.
const KNOWN_FORMATS: [&str; 6] = ["parquet", "csv", "json", "text", "arrow", "webdataset"];

pub struct HuggingFaceConnector {
    client: reqwest::Client,
    api_base: String,
    token: Option<String>,
    seed_limit: usize,
    page_size: usize,
}

impl HuggingFaceConnector {
    pub fn new(config: &HuggingFaceConfig, call_timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(call_timeout)?,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: config
                .token
                .clone()
                .or_else(|| std::env::var("HF_TOKEN").ok())
                .filter(|t| !t.is_empty()),
            seed_limit: config.seed_limit,
            page_size: config.page_size.max(1),
        })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let req = self.client.get(url);
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Follow listing pages from `first_url` until `limit` records.
    async fn collect_listing(
        &self,
        first_url: String,
        limit: usize,
    ) -> Result<Vec<RawRecord>, SourceError> {
        let mut out = Vec::new();
        let mut next = Some(first_url);

        while let Some(url) = next.take() {
            if out.len() >= limit {
                break;
            }
            let (payload, headers) = get_json(self.get(&url), "huggingface dataset list").await?;
            let items = payload.as_array().cloned().ok_or_else(|| {
                SourceError::Mapping("huggingface dataset list: expected a JSON array".to_string())
            })?;
            if items.is_empty() {
                break;
            }

            for item in items.into_iter().take(limit - out.len()) {
                let external_id = item
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                out.push(RawRecord {
                    external_id,
                    shape: RecordShape::Listing,
                    payload: item,
                });
            }
            next = next_link(&headers);
        }

        Ok(out)
    }
}

fn sort_key(order: SortOrder) -> &'static str {
    match order {
        SortOrder::Updated => "lastModified",
        SortOrder::Hottest => "trendingScore",
        SortOrder::Votes => "likes",
    }
}

#[async_trait]
impl SourceConnector for HuggingFaceConnector {
    fn source(&self) -> Source {
        Source::HuggingFace
    }

    fn description(&self) -> String {
        format!(
            "HuggingFace Hub at {} (seed limit {}, {})",
            self.api_base,
            self.seed_limit,
            if self.token.is_some() { "authenticated" } else { "anonymous" }
        )
    }

    async fn fetch_seed(&self) -> Result<Vec<RawRecord>, SourceError> {
        let url = format!(
            "{}/datasets?full=true&limit={}",
            self.api_base,
            self.page_size.min(self.seed_limit.max(1))
        );
        self.collect_listing(url, self.seed_limit).await
    }

    async fn fetch_by_id(&self, external_id: &str) -> Result<RawRecord, SourceError> {
        let url = format!("{}/datasets/{}", self.api_base, external_id);
        let what = format!("huggingface dataset {}", external_id);
        let (payload, _) = get_json(self.get(&url), &what).await?;
        Ok(RawRecord {
            external_id: external_id.to_string(),
            shape: RecordShape::Detail,
            payload,
        })
    }

    async fn fetch_latest(
        &self,
        limit: usize,
        order: SortOrder,
    ) -> Result<Vec<RawRecord>, SourceError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let url = format!(
            "{}/datasets?full=true&sort={}&direction=-1&limit={}",
            self.api_base,
            sort_key(order),
            self.page_size.min(limit)
        );
        self.collect_listing(url, limit).await
    }

    fn map(&self, raw: &RawRecord) -> Result<MappedRecord, SourceError> {
        map_hf_dataset(&raw.payload)
    }
}

fn tag_list(v: &Value) -> Vec<&str> {
    v.get("tags")
        .and_then(Value::as_array)
        .map(|tags| tags.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

/// Task tags with their `task_categories:` / `task_ids:` prefix removed.
pub fn task_tags(tags: &[&str]) -> BTreeSet<String> {
    tags.iter()
        .filter_map(|t| {
            t.strip_prefix("task_categories:")
                .or_else(|| t.strip_prefix("task_ids:"))
        })
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

pub fn detect_formats(tags: &[&str]) -> Vec<String> {
    let found: BTreeSet<&str> = tags
        .iter()
        .map(|t| t.strip_prefix("format:").unwrap_or(t))
        .filter_map(|t| KNOWN_FORMATS.iter().find(|f| f.eq_ignore_ascii_case(t)).copied())
        .collect();
    found.into_iter().map(str::to_string).collect()
}

fn description_of(v: &Value) -> Option<String> {
    let card = v.get("cardData");
    let candidates = [
        v.get("description"),
        card.and_then(|c| c.get("description")),
        card.and_then(|c| c.get("summary")),
    ];
    candidates
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Map a Hub dataset object (listing or detail) onto dataset content.
pub fn map_hf_dataset(v: &Value) -> Result<MappedRecord, SourceError> {
    if !v.is_object() {
        return Err(SourceError::Mapping("huggingface payload is not an object".to_string()));
    }
    let id = v
        .get("id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| SourceError::Mapping("huggingface payload has no id".to_string()))?;

    let card = v.get("cardData");
    let title = card
        .and_then(|c| c.get("pretty_name"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(id)
        .to_string();

    let tags = tag_list(v);
    let description = description_of(v);
    let downloads = v.get("downloads").and_then(Value::as_u64).unwrap_or(0);
    let likes = v.get("likes").and_then(Value::as_u64).unwrap_or(0);

    let license = card
        .and_then(|c| c.get("license"))
        .and_then(|l| match l {
            Value::String(s) => Some(s.clone()),
            Value::Array(a) => a.first().and_then(Value::as_str).map(str::to_string),
            _ => None,
        })
        .or_else(|| {
            tags.iter()
                .find_map(|t| t.strip_prefix("license:"))
                .map(str::to_string)
        });

    let metadata = json!({
        "author": v.get("author").and_then(Value::as_str),
        "sha": v.get("sha").and_then(Value::as_str),
        "last_modified": v.get("lastModified").and_then(Value::as_str),
        "license": license,
        "downloads": downloads,
        "likes": likes,
        "gated": v.get("gated"),
        "file_formats": detect_formats(&tags),
        "hub_tags": tags,
        "enrichment_source": "api",
    });

    Ok(MappedRecord {
        external_id: id.to_string(),
        partial: description.is_none(),
        content: DatasetContent {
            title,
            description,
            url: format!("https://huggingface.co/datasets/{}", id),
            tags: task_tags(&tags),
            metadata,
            static_score: popularity_score(downloads, likes, 0),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_tags_and_formats() {
        let tags = [
            "task_categories:text-classification",
            "task_ids:sentiment-analysis",
            "format:parquet",
            "language:en",
            "csv",
        ];
        let t = task_tags(&tags);
        assert!(t.contains("text-classification"));
        assert!(t.contains("sentiment-analysis"));
        assert_eq!(t.len(), 2);
        assert_eq!(detect_formats(&tags), vec!["csv", "parquet"]);
    }

    #[test]
    fn test_map_hf_dataset() {
        let v = json!({
            "id": "stanfordnlp/imdb",
            "author": "stanfordnlp",
            "sha": "abc123",
            "downloads": 120000,
            "likes": 300,
            "tags": ["task_categories:text-classification", "format:parquet", "license:other"],
            "cardData": {"pretty_name": "IMDB", "license": ["apache-2.0"]},
            "description": "Large movie review dataset"
        });
        let m = map_hf_dataset(&v).unwrap();
        assert_eq!(m.external_id, "stanfordnlp/imdb");
        assert_eq!(m.content.title, "IMDB");
        assert_eq!(m.content.url, "https://huggingface.co/datasets/stanfordnlp/imdb");
        assert!(!m.partial);
        assert_eq!(m.content.metadata["license"], "apache-2.0");
        assert_eq!(m.content.metadata["file_formats"], json!(["parquet"]));
        assert!(m.content.static_score > 0.0 && m.content.static_score < 1.0);
    }

    #[test]
    fn test_map_hf_dataset_partial_and_malformed() {
        let m = map_hf_dataset(&json!({"id": "a/b", "tags": ["license:mit"]})).unwrap();
        assert!(m.partial);
        assert_eq!(m.content.title, "a/b");
        assert_eq!(m.content.metadata["license"], "mit");

        assert!(matches!(map_hf_dataset(&json!({"likes": 1})), Err(SourceError::Mapping(_))));
        assert!(matches!(map_hf_dataset(&json!("a/b")), Err(SourceError::Mapping(_))));
    }

    #[test]
    fn test_sort_key() {
        assert_eq!(sort_key(SortOrder::Updated), "lastModified");
        assert_eq!(sort_key(SortOrder::Hottest), "trendingScore");
        assert_eq!(sort_key(SortOrder::Votes), "likes");
    }
}
