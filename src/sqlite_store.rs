//! SQLite-backed [`CatalogStore`] implementation.
//!
//! Content refreshes reuse [`Dataset::refresh_content`] from the core so
//! the SQLite and in-memory stores agree on when a record changed and
//! when its embedding goes stale. Schema lives in [`crate::migrate`].

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::collections::{BTreeSet, HashSet};

use datasearch_core::embedding::{blob_to_vec, cosine_similarity, validate_vector, vec_to_blob};
use datasearch_core::models::{Dataset, EnrichmentLog, MappedRecord, Source};
use datasearch_core::status::{EnrichmentStatus, MAX_ATTEMPTS};
use datasearch_core::store::{
    CatalogStore, ConflictPolicy, EmbeddingWrite, StatusCounts, UpsertSummary, WriteOutcome,
};

const DATASET_COLUMNS: &str = "id, source, external_id, title, description, url, tags_json, \
     metadata_json, status, attempt_count, is_active, last_enriched_at, last_error, embedding, \
     static_score, content_hash, created_at, updated_at";

/// SQLite implementation of the [`CatalogStore`] trait.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Take the named lease for `ttl_secs`, or renew it if `holder`
    /// already owns it. Returns `false` while someone else holds an
    /// unexpired lease.
    pub async fn try_acquire_lease(&self, task: &str, holder: &str, ttl_secs: i64) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO task_leases (task, holder, expires_at)
            VALUES (?, ?, ?)
            ON CONFLICT(task) DO UPDATE SET
                holder = excluded.holder,
                expires_at = excluded.expires_at
            WHERE task_leases.expires_at < ? OR task_leases.holder = excluded.holder
            "#,
        )
        .bind(task)
        .bind(holder)
        .bind(now + ttl_secs)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn release_lease(&self, task: &str, holder: &str) -> Result<()> {
        sqlx::query("DELETE FROM task_leases WHERE task = ? AND holder = ?")
            .bind(task)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fetch_by_ids(&self, ids: &[String]) -> Result<Vec<Dataset>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(d) = self.get(id).await? {
                out.push(d);
            }
        }
        Ok(out)
    }
}

fn dataset_from_row(row: &SqliteRow) -> Result<Dataset> {
    let source: String = row.try_get("source")?;
    let status: String = row.try_get("status")?;
    let tags_json: String = row.try_get("tags_json")?;
    let metadata_json: String = row.try_get("metadata_json")?;
    let embedding: Option<Vec<u8>> = row.try_get("embedding")?;
    let attempt_count: i64 = row.try_get("attempt_count")?;

    let id: String = row.try_get("id")?;
    let tags: BTreeSet<String> = serde_json::from_str(&tags_json)
        .with_context(|| format!("dataset {}: corrupt tags_json", id))?;
    let metadata: serde_json::Value = serde_json::from_str(&metadata_json)
        .with_context(|| format!("dataset {}: corrupt metadata_json", id))?;
    let attempt_count = u32::try_from(attempt_count).with_context(|| {
        format!("dataset {}: attempt_count out of range: {}", id, attempt_count)
    })?;

    Ok(Dataset {
        id,
        source: source.parse()?,
        external_id: row.try_get("external_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        url: row.try_get("url")?,
        tags,
        metadata,
        status: status.parse()?,
        attempt_count,
        is_active: row.try_get("is_active")?,
        last_enriched_at: row.try_get("last_enriched_at")?,
        last_error: row.try_get("last_error")?,
        embedding: embedding.map(|b| blob_to_vec(&b)),
        static_score: row.try_get("static_score")?,
        content_hash: row.try_get("content_hash")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

async fn write_dataset(tx: &mut Transaction<'_, Sqlite>, d: &Dataset) -> Result<()> {
    let tags_json = serde_json::to_string(&d.tags)?;
    let metadata_json = serde_json::to_string(&d.metadata)?;
    let blob = d.embedding.as_deref().map(vec_to_blob);

    sqlx::query(
        r#"
        INSERT INTO datasets (id, source, external_id, title, description, url, tags_json,
                              metadata_json, status, attempt_count, is_active, last_enriched_at,
                              last_error, embedding, static_score, content_hash,
                              created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            description = excluded.description,
            url = excluded.url,
            tags_json = excluded.tags_json,
            metadata_json = excluded.metadata_json,
            status = excluded.status,
            attempt_count = excluded.attempt_count,
            is_active = excluded.is_active,
            last_enriched_at = excluded.last_enriched_at,
            last_error = excluded.last_error,
            embedding = excluded.embedding,
            static_score = excluded.static_score,
            content_hash = excluded.content_hash,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&d.id)
    .bind(d.source.as_str())
    .bind(&d.external_id)
    .bind(&d.title)
    .bind(&d.description)
    .bind(&d.url)
    .bind(&tags_json)
    .bind(&metadata_json)
    .bind(d.status.as_str())
    .bind(i64::from(d.attempt_count))
    .bind(d.is_active)
    .bind(d.last_enriched_at)
    .bind(&d.last_error)
    .bind(blob)
    .bind(d.static_score)
    .bind(&d.content_hash)
    .bind(d.created_at)
    .bind(d.updated_at)
    .execute(&mut **tx)
    .await
    .with_context(|| format!("Failed to write dataset {}", d.id))?;

    Ok(())
}

fn like_pattern(term: &str) -> String {
    let escaped = term
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

#[async_trait]
impl CatalogStore for SqliteStore {
    async fn bulk_upsert(
        &self,
        source: Source,
        records: &[MappedRecord],
        insert_as: EnrichmentStatus,
        policy: ConflictPolicy,
    ) -> Result<UpsertSummary> {
        let now = chrono::Utc::now().timestamp();
        let mut summary = UpsertSummary::default();
        let mut tx = self.pool.begin().await?;

        for record in records {
            let existing = sqlx::query(&format!(
                "SELECT {} FROM datasets WHERE source = ? AND external_id = ?",
                DATASET_COLUMNS
            ))
            .bind(source.as_str())
            .bind(&record.external_id)
            .fetch_optional(&mut *tx)
            .await?;

            match (existing, policy) {
                (None, _) => {
                    let d = Dataset::from_mapped(source, record, insert_as, now);
                    write_dataset(&mut tx, &d).await?;
                    summary.inserted += 1;
                }
                (Some(_), ConflictPolicy::KeepExisting) => summary.unchanged += 1,
                (Some(row), ConflictPolicy::RefreshContent) => {
                    let mut d = dataset_from_row(&row)?;
                    if d.refresh_content(&record.content, now) {
                        summary.refreshed += 1;
                    } else {
                        summary.unchanged += 1;
                    }
                    write_dataset(&mut tx, &d).await?;
                }
            }
        }

        tx.commit().await?;
        Ok(summary)
    }

    async fn upsert(&self, dataset: &Dataset) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        write_dataset(&mut tx, dataset).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Dataset>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM datasets WHERE id = ?",
            DATASET_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(dataset_from_row).transpose()
    }

    async fn select(
        &self,
        source: Source,
        status_in: &[EnrichmentStatus],
        limit: usize,
    ) -> Result<Vec<Dataset>> {
        if status_in.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; status_in.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM datasets \
             WHERE source = ? AND is_active = 1 AND attempt_count < ? AND status IN ({}) \
             ORDER BY created_at ASC, rowid ASC LIMIT ?",
            DATASET_COLUMNS, placeholders
        );

        let mut query = sqlx::query(&sql)
            .bind(source.as_str())
            .bind(i64::from(MAX_ATTEMPTS));
        for status in status_in {
            query = query.bind(status.as_str());
        }
        let rows = query.bind(limit as i64).fetch_all(&self.pool).await?;

        rows.iter().map(dataset_from_row).collect()
    }

    async fn select_for_embedding(&self, limit: usize) -> Result<Vec<Dataset>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM datasets \
             WHERE status = 'ENRICHED' AND embedding IS NULL AND is_active = 1 \
             ORDER BY updated_at ASC, rowid ASC LIMIT ?",
            DATASET_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(dataset_from_row).collect()
    }

    async fn commit_embeddings(&self, writes: &[EmbeddingWrite]) -> Result<Vec<WriteOutcome>> {
        let dims = self.embedding_dims().await?;
        let mut outcomes = Vec::with_capacity(writes.len());
        let mut tx = self.pool.begin().await?;

        for write in writes {
            if let Err(reason) = validate_vector(&write.vector, dims) {
                outcomes.push(WriteOutcome::Rejected(reason));
                continue;
            }

            let result = sqlx::query(
                "UPDATE datasets SET embedding = ? \
                 WHERE id = ? AND status = 'ENRICHED' AND is_active = 1 AND content_hash = ?",
            )
            .bind(vec_to_blob(&write.vector))
            .bind(&write.dataset_id)
            .bind(&write.content_hash)
            .execute(&mut *tx)
            .await;

            let outcome = match result {
                Ok(r) if r.rows_affected() == 1 => WriteOutcome::Stored,
                Ok(_) => WriteOutcome::Rejected(
                    "dataset missing, no longer embeddable, or content changed since selection"
                        .into(),
                ),
                Err(e) => WriteOutcome::Rejected(e.to_string()),
            };
            outcomes.push(outcome);
        }

        tx.commit().await?;
        Ok(outcomes)
    }

    async fn mark_failed(&self, id: &str, reason: &str) -> Result<()> {
        sqlx::query(
            "UPDATE datasets SET status = 'FAILED', is_active = 0, embedding = NULL, last_error = ? \
             WHERE id = ?",
        )
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_log(&self, entry: &EnrichmentLog) -> Result<()> {
        sqlx::query(
            "INSERT INTO enrichment_logs (dataset_id, outcome, message, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&entry.dataset_id)
        .bind(entry.outcome.as_str())
        .bind(&entry.message)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn logs_for(&self, dataset_id: &str) -> Result<Vec<EnrichmentLog>> {
        let rows = sqlx::query(
            "SELECT dataset_id, outcome, message, created_at FROM enrichment_logs \
             WHERE dataset_id = ? ORDER BY id ASC",
        )
        .bind(dataset_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let outcome: String = row.try_get("outcome")?;
                Ok(EnrichmentLog {
                    dataset_id: row.try_get("dataset_id")?,
                    outcome: outcome.parse()?,
                    message: row.try_get("message")?,
                    timestamp: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn search_candidates(
        &self,
        query_vec: Option<&[f32]>,
        terms: &[String],
        source: Option<Source>,
        k: usize,
    ) -> Result<Vec<Dataset>> {
        let ready = "status = 'ENRICHED' AND is_active = 1 AND embedding IS NOT NULL \
                     AND (? IS NULL OR source = ?)";
        let source_str = source.map(|s| s.as_str());

        let mut ids: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        if let Some(qv) = query_vec {
            let rows = sqlx::query(&format!("SELECT id, embedding FROM datasets WHERE {}", ready))
                .bind(source_str)
                .bind(source_str)
                .fetch_all(&self.pool)
                .await?;

            let mut by_sim: Vec<(f32, String)> = Vec::with_capacity(rows.len());
            for row in &rows {
                let blob: Vec<u8> = row.try_get("embedding")?;
                let id: String = row.try_get("id")?;
                by_sim.push((cosine_similarity(qv, &blob_to_vec(&blob)), id));
            }
            by_sim.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

            for (_, id) in by_sim.into_iter().take(k) {
                if seen.insert(id.clone()) {
                    ids.push(id);
                }
            }
        }

        if !terms.is_empty() {
            let clause = vec![
                "(lower(title) LIKE ? ESCAPE '\\' OR lower(coalesce(description, '')) LIKE ? ESCAPE '\\')";
                terms.len()
            ]
            .join(" OR ");
            let sql = format!(
                "SELECT id FROM datasets WHERE {} AND ({}) ORDER BY static_score DESC, id ASC LIMIT ?",
                ready, clause
            );

            let mut query = sqlx::query(&sql).bind(source_str).bind(source_str);
            for term in terms {
                let pattern = like_pattern(term);
                query = query.bind(pattern.clone()).bind(pattern);
            }
            let rows = query.bind(k as i64).fetch_all(&self.pool).await?;

            for row in &rows {
                let id: String = row.try_get("id")?;
                if seen.insert(id.clone()) {
                    ids.push(id);
                }
            }
        }

        self.fetch_by_ids(&ids).await
    }

    async fn status_counts(&self, source: Source) -> Result<StatusCounts> {
        let rows = sqlx::query(
            r#"
            SELECT status,
                   COUNT(*) AS n,
                   COALESCE(SUM(embedding IS NOT NULL), 0) AS embedded,
                   COALESCE(SUM(is_active), 0) AS active
            FROM datasets
            WHERE source = ?
            GROUP BY status
            "#,
        )
        .bind(source.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut counts = StatusCounts::default();
        for status in EnrichmentStatus::ALL {
            counts.by_status.insert(status.as_str(), 0);
        }
        for row in &rows {
            let status: String = row.try_get("status")?;
            let status: EnrichmentStatus = status.parse()?;
            let n: i64 = row.try_get("n")?;
            let embedded: i64 = row.try_get("embedded")?;
            let active: i64 = row.try_get("active")?;
            counts.by_status.insert(status.as_str(), n as u64);
            counts.embedded += embedded as u64;
            counts.active += active as u64;
        }
        Ok(counts)
    }

    async fn embedding_dims(&self) -> Result<usize> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM store_meta WHERE key = 'embedding_dims'")
                .fetch_optional(&self.pool)
                .await?;
        let value = value.ok_or_else(|| {
            anyhow!("embedding dimension not recorded; run `dsearch init` first")
        })?;
        value
            .parse()
            .with_context(|| format!("invalid stored embedding dimension: '{}'", value))
    }
}
