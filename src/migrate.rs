use anyhow::{bail, Result};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the schema and record the embedding dimension.
///
/// Idempotent. Fails if the database was initialised with a different
/// embedding dimension than `db.embedding_dims`.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let result = migrate_pool(&pool, config.db.embedding_dims).await;
    pool.close().await;
    result
}

pub async fn migrate_pool(pool: &SqlitePool, embedding_dims: usize) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS datasets (
            id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            external_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            url TEXT NOT NULL,
            tags_json TEXT NOT NULL DEFAULT '[]',
            metadata_json TEXT NOT NULL DEFAULT '{}',
            status TEXT NOT NULL,
            attempt_count INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            last_enriched_at INTEGER,
            last_error TEXT,
            embedding BLOB,
            static_score REAL NOT NULL DEFAULT 0,
            content_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(source, external_id),
            CHECK (embedding IS NULL OR status = 'ENRICHED'),
            CHECK (status <> 'FAILED' OR is_active = 0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS enrichment_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            dataset_id TEXT NOT NULL,
            outcome TEXT NOT NULL,
            message TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS store_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS task_leases (
            task TEXT PRIMARY KEY,
            holder TEXT NOT NULL,
            expires_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_datasets_enrich ON datasets(source, status, is_active, created_at)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_datasets_embed ON datasets(status, is_active, updated_at)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_logs_dataset ON enrichment_logs(dataset_id)")
        .execute(pool)
        .await?;

    sqlx::query("INSERT OR IGNORE INTO store_meta (key, value) VALUES ('embedding_dims', ?)")
        .bind(embedding_dims.to_string())
        .execute(pool)
        .await?;

    let stored: String =
        sqlx::query_scalar("SELECT value FROM store_meta WHERE key = 'embedding_dims'")
            .fetch_one(pool)
            .await?;
    if stored != embedding_dims.to_string() {
        bail!(
            "database holds {}-dimensional embeddings but db.embedding_dims is {}",
            stored,
            embedding_dims
        );
    }

    Ok(())
}
