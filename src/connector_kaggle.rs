//! Kaggle catalog connector.
//!
//! - **Seed**: the Meta Kaggle `Datasets.csv` export, read from disk. Rows
//!   carry only numeric ids and counters, so seeded records get a
//!   placeholder title and stay MINIMAL until enriched.
//! - **Enrich**: `GET {api_base}/datasets/view/{ref}` with HTTP basic auth.
//! - **Latest**: `GET {api_base}/datasets/list?sortBy=..&page=N`.
//!
//! The API addresses datasets by `owner/slug` ref. When the CSV carries a
//! `Ref` column (or `OwnerSlug` + `Slug`) the ref is stored in metadata
//! and used for lookups; otherwise the numeric id is sent as-is.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Map, Value};

use datasearch_core::connector::SourceConnector;
use datasearch_core::error::SourceError;
use datasearch_core::models::{
    DatasetContent, MappedRecord, RawRecord, RecordShape, SortOrder, Source,
};
use datasearch_core::scoring::popularity_score;

use crate::config::KaggleConfig;
use crate::connector_http::{build_client, get_json};

/// Connector for kaggle.com.
pub struct KaggleConnector {
    client: reqwest::Client,
    api_base: String,
    credentials: Option<(String, String)>,
    meta_csv: Option<PathBuf>,
    page_size: usize,
}

impl KaggleConnector {
    /// Build from config. Credentials fall back to `KAGGLE_USERNAME` and
    /// `KAGGLE_KEY`; without them requests are sent anonymously.
    pub fn new(config: &KaggleConfig, call_timeout: Duration) -> Result<Self> {
        let username = config
            .username
            .clone()
            .or_else(|| std::env::var("KAGGLE_USERNAME").ok());
        let key = config.key.clone().or_else(|| std::env::var("KAGGLE_KEY").ok());

        Ok(Self {
            client: build_client(call_timeout)?,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            credentials: username.zip(key),
            meta_csv: config.meta_csv.clone(),
            page_size: config.page_size.max(1),
        })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let req = self.client.get(url);
        match &self.credentials {
            Some((user, key)) => req.basic_auth(user, Some(key)),
            None => req,
        }
    }
}

#[async_trait]
impl SourceConnector for KaggleConnector {
    fn source(&self) -> Source {
        Source::Kaggle
    }

    fn description(&self) -> String {
        match &self.meta_csv {
            Some(p) => format!("Kaggle API at {} (seed: {})", self.api_base, p.display()),
            None => format!("Kaggle API at {} (no seed file)", self.api_base),
        }
    }

    async fn fetch_seed(&self) -> Result<Vec<RawRecord>, SourceError> {
        let path = self.meta_csv.clone().ok_or_else(|| {
            SourceError::Transient("sources.kaggle.meta_csv is not configured".to_string())
        })?;

        tokio::task::spawn_blocking(move || read_meta_csv(&path))
            .await
            .map_err(|e| SourceError::Transient(format!("seed reader task failed: {}", e)))?
    }

    async fn fetch_by_id(&self, external_id: &str) -> Result<RawRecord, SourceError> {
        let url = format!("{}/datasets/view/{}", self.api_base, external_id);
        let what = format!("kaggle dataset {}", external_id);
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
        let mut out = Vec::new();
        let mut page = 1usize;

        while out.len() < limit {
            let url = format!(
                "{}/datasets/list?sortBy={}&page={}",
                self.api_base,
                order.as_str(),
                page
            );
            let (payload, _) = get_json(self.get(&url), "kaggle dataset list").await?;
            let items = payload.as_array().cloned().ok_or_else(|| {
                SourceError::Mapping("kaggle dataset list: expected a JSON array".to_string())
            })?;
            let page_len = items.len();

            for item in items.into_iter().take(limit - out.len()) {
                let external_id = item
                    .get("ref")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                out.push(RawRecord {
                    external_id,
                    shape: RecordShape::Listing,
                    payload: item,
                });
            }

            if page_len < self.page_size {
                break;
            }
            page += 1;
        }

        Ok(out)
    }

    fn map(&self, raw: &RawRecord) -> Result<MappedRecord, SourceError> {
        match raw.shape {
            RecordShape::Seed => map_meta_row(&raw.payload),
            RecordShape::Detail | RecordShape::Listing => map_api_dataset(&raw.payload),
        }
    }
}

// ─── Seed CSV ───────────────────────────────────────────────────────

/// Read every row of a Meta Kaggle `Datasets.csv` as a JSON object of
/// strings. Unreadable rows become `null` payloads so they surface as
/// per-row mapping failures instead of aborting the feed.
fn read_meta_csv(path: &Path) -> Result<Vec<RawRecord>, SourceError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| SourceError::Transient(format!("opening {}: {}", path.display(), e)))?;

    let headers = reader
        .headers()
        .map_err(|e| SourceError::Transient(format!("reading CSV header: {}", e)))?
        .clone();

    let mut out = Vec::new();
    for (line, row) in reader.records().enumerate() {
        let record = match row {
            Ok(row) => {
                let obj: Map<String, Value> = headers
                    .iter()
                    .zip(row.iter())
                    .map(|(h, v)| (h.to_string(), Value::String(v.to_string())))
                    .collect();
                let external_id = obj
                    .get("Id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .trim()
                    .to_string();
                RawRecord {
                    external_id,
                    shape: RecordShape::Seed,
                    payload: Value::Object(obj),
                }
            }
            Err(e) => RawRecord {
                external_id: format!("csv-row-{}", line + 2),
                shape: RecordShape::Seed,
                payload: json!({ "_error": e.to_string() }),
            },
        };
        out.push(record);
    }

    Ok(out)
}

fn csv_field<'a>(row: &'a Value, name: &str) -> Option<&'a str> {
    row.get(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn csv_count(row: &Value, name: &str) -> u64 {
    csv_field(row, name)
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v as u64)
        .unwrap_or(0)
}

/// Map one Meta Kaggle CSV row onto minimal dataset content.
pub fn map_meta_row(row: &Value) -> Result<MappedRecord, SourceError> {
    if let Some(err) = row.get("_error").and_then(Value::as_str) {
        return Err(SourceError::Mapping(format!("malformed CSV row: {}", err)));
    }

    let id = csv_field(row, "Id")
        .ok_or_else(|| SourceError::Mapping("CSV row has no Id".to_string()))?;
    if id.parse::<u64>().is_err() {
        return Err(SourceError::Mapping(format!("CSV Id is not numeric: '{}'", id)));
    }

    let dataset_ref = csv_field(row, "Ref").map(str::to_string).or_else(|| {
        match (csv_field(row, "OwnerSlug"), csv_field(row, "Slug")) {
            (Some(owner), Some(slug)) => Some(format!("{}/{}", owner, slug)),
            _ => None,
        }
    });

    let downloads = csv_count(row, "TotalDownloads");
    let votes = csv_count(row, "TotalVotes");
    let views = csv_count(row, "TotalViews");

    let mut metadata = json!({
        "csv_id": id,
        "creator_user_id": csv_field(row, "CreatorUserId"),
        "owner_user_id": csv_field(row, "OwnerUserId"),
        "owner_organization_id": csv_field(row, "OwnerOrganizationId"),
        "current_dataset_version_id": csv_field(row, "CurrentDatasetVersionId"),
        "current_datasource_version_id": csv_field(row, "CurrentDatasourceVersionId"),
        "forum_id": csv_field(row, "ForumId"),
        "type": csv_field(row, "Type"),
        "creation_date": csv_field(row, "CreationDate"),
        "last_activity_date": csv_field(row, "LastActivityDate"),
        "download_count": downloads,
        "vote_count": votes,
        "view_count": views,
        "total_kernels": csv_count(row, "TotalKernels"),
        "enrichment_source": "csv",
    });
    if let Some(r) = &dataset_ref {
        metadata["ref"] = json!(r);
    }

    let url = match &dataset_ref {
        Some(r) => format!("https://www.kaggle.com/datasets/{}", r),
        None => format!("https://www.kaggle.com/datasets/{}", id),
    };

    Ok(MappedRecord {
        external_id: id.to_string(),
        content: DatasetContent {
            title: format!("Kaggle Dataset {}", id),
            description: None,
            url,
            tags: BTreeSet::new(),
            metadata,
            static_score: popularity_score(downloads, votes, views),
        },
        partial: true,
    })
}

// ─── API payloads ───────────────────────────────────────────────────

fn str_field<'a>(v: &'a Value, name: &str) -> Option<&'a str> {
    v.get(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn count_field(v: &Value, name: &str) -> u64 {
    match v.get(name) {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Unique lower-case file extensions of at most 10 characters.
pub fn file_formats(files: &[Value]) -> Vec<String> {
    let formats: BTreeSet<String> = files
        .iter()
        .filter_map(|f| f.get("name").and_then(Value::as_str))
        .filter_map(|name| {
            let (_, ext) = name.rsplit_once('.')?;
            let ext = ext.to_lowercase();
            (!ext.is_empty() && ext.len() <= 10).then_some(ext)
        })
        .collect();
    formats.into_iter().collect()
}

/// Map a Kaggle API dataset object onto dataset content.
pub fn map_api_dataset(v: &Value) -> Result<MappedRecord, SourceError> {
    if !v.is_object() {
        return Err(SourceError::Mapping("kaggle payload is not an object".to_string()));
    }
    let dataset_ref = str_field(v, "ref")
        .ok_or_else(|| SourceError::Mapping("kaggle payload has no ref".to_string()))?;
    let title = str_field(v, "title").ok_or_else(|| {
        SourceError::Mapping(format!("kaggle dataset {} has no title", dataset_ref))
    })?;

    let description = str_field(v, "description").map(str::to_string);
    let subtitle = str_field(v, "subtitle");

    let tags: BTreeSet<String> = v
        .get("tags")
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(|t| {
                    t.as_str()
                        .or_else(|| t.get("name").and_then(Value::as_str))
                        .map(|s| s.trim().to_lowercase())
                })
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let formats = v
        .get("files")
        .and_then(Value::as_array)
        .map(|f| file_formats(f))
        .unwrap_or_default();

    let downloads = count_field(v, "downloadCount");
    let votes = count_field(v, "voteCount");
    let views = count_field(v, "viewCount");

    let url = str_field(v, "url")
        .map(str::to_string)
        .unwrap_or_else(|| format!("https://www.kaggle.com/datasets/{}", dataset_ref));

    let metadata = json!({
        "ref": dataset_ref,
        "subtitle": subtitle,
        "creator_name": str_field(v, "creatorName"),
        "license": str_field(v, "licenseName"),
        "total_bytes": v.get("totalBytes").and_then(Value::as_u64),
        "last_updated": str_field(v, "lastUpdated"),
        "download_count": downloads,
        "vote_count": votes,
        "view_count": views,
        "file_formats": formats,
        "enrichment_source": "api",
    });

    Ok(MappedRecord {
        external_id: dataset_ref.to_string(),
        partial: description.is_none(),
        content: DatasetContent {
            title: title.to_string(),
            description,
            url,
            tags,
            metadata,
            static_score: popularity_score(downloads, votes, views),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_meta_row() {
        let row = json!({
            "Id": "42",
            "TotalViews": "1000",
            "TotalDownloads": "250",
            "TotalVotes": "12",
            "TotalKernels": "",
            "CreationDate": "01/02/2020 10:00:00",
        });
        let m = map_meta_row(&row).unwrap();
        assert_eq!(m.external_id, "42");
        assert_eq!(m.content.title, "Kaggle Dataset 42");
        assert_eq!(m.content.url, "https://www.kaggle.com/datasets/42");
        assert!(m.partial);
        assert_eq!(m.content.metadata["csv_id"], "42");
        assert_eq!(m.content.metadata["total_kernels"], 0);
        assert!(m.content.static_score > 0.0);
    }

    #[test]
    fn test_map_meta_row_learns_ref() {
        let row = json!({"Id": "7", "OwnerSlug": "alice", "Slug": "titanic"});
        let m = map_meta_row(&row).unwrap();
        assert_eq!(m.content.metadata["ref"], "alice/titanic");
        assert_eq!(m.content.url, "https://www.kaggle.com/datasets/alice/titanic");
    }

    #[test]
    fn test_map_meta_row_rejects_bad_rows() {
        assert!(matches!(map_meta_row(&json!({"Id": ""})), Err(SourceError::Mapping(_))));
        assert!(matches!(map_meta_row(&json!({"Id": "abc"})), Err(SourceError::Mapping(_))));
        assert!(matches!(
            map_meta_row(&json!({"_error": "unequal lengths"})),
            Err(SourceError::Mapping(_))
        ));
    }

    #[test]
    fn test_map_api_dataset() {
        let v = json!({
            "ref": "alice/titanic",
            "title": "Titanic",
            "subtitle": "Who survived?",
            "description": "Passenger manifest",
            "creatorName": "Alice",
            "totalBytes": 61194,
            "downloadCount": 5000,
            "voteCount": 120,
            "viewCount": 90000,
            "licenseName": "CC0-1.0",
            "tags": [{"name": "Tabular"}, {"name": "history"}],
            "files": [
                {"name": "train.CSV"},
                {"name": "test.csv"},
                {"name": "README"},
                {"name": "x.verylongextension"}
            ]
        });
        let m = map_api_dataset(&v).unwrap();
        assert_eq!(m.external_id, "alice/titanic");
        assert!(!m.partial);
        assert_eq!(m.content.url, "https://www.kaggle.com/datasets/alice/titanic");
        assert!(m.content.tags.contains("tabular"));
        assert_eq!(m.content.metadata["file_formats"], json!(["csv"]));
        assert_eq!(m.content.metadata["license"], "CC0-1.0");
    }

    #[test]
    fn test_map_api_dataset_partial_and_malformed() {
        let m = map_api_dataset(&json!({"ref": "a/b", "title": "B"})).unwrap();
        assert!(m.partial);
        assert!(map_api_dataset(&json!({"title": "No ref"})).is_err());
        assert!(map_api_dataset(&json!({"ref": "a/b"})).is_err());
        assert!(map_api_dataset(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_read_meta_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Datasets.csv");
        std::fs::write(
            &path,
            "Id,CreatorUserId,OwnerUserId,OwnerOrganizationId,CurrentDatasetVersionId,CurrentDatasourceVersionId,ForumId,Type,CreationDate,LastActivityDate,TotalViews,TotalDownloads,TotalVotes,TotalKernels\n\
             1,10,10,,100,200,300,2,01/01/2020,01/02/2020,50,5,1,0\n\
             2,11,11,,101,201,301,2,01/01/2021,01/02/2021,60,6,2,1\n",
        )
        .unwrap();

        let rows = read_meta_csv(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].external_id, "2");
        assert_eq!(rows[0].shape, RecordShape::Seed);
        assert!(map_meta_row(&rows[0].payload).is_ok());
    }
}
