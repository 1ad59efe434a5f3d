//! Catalog statistics.
//!
//! Per-source lifecycle counts and embedding coverage, so operators can
//! see whether the enrichment and embedding phases are keeping up.

use anyhow::Result;

use datasearch_core::models::Source;
use datasearch_core::status::EnrichmentStatus;
use datasearch_core::store::StatusCounts;

use crate::app::AppContext;

pub async fn run_stats(ctx: &AppContext) -> Result<()> {
    let store = ctx.store();
    let mut rows: Vec<(Source, StatusCounts)> = Vec::new();
    for source in Source::ALL {
        rows.push((source, store.status_counts(source).await?));
    }

    let db_size = std::fs::metadata(&ctx.config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);
    let total: u64 = rows.iter().map(|(_, c)| c.total()).sum();
    let enriched: u64 = rows.iter().map(|(_, c)| c.get(EnrichmentStatus::Enriched)).sum();
    let embedded: u64 = rows.iter().map(|(_, c)| c.embedded).sum();

    println!("datasearch: Catalog Stats");
    println!("=========================");
    println!();
    println!("  Database:    {}", ctx.config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Datasets:    {}", total);
    println!(
        "  Embedded:    {} / {} enriched ({}%)",
        embedded,
        enriched,
        if enriched > 0 { embedded * 100 / enriched } else { 0 }
    );
    println!();
    println!(
        "  {:<12} {:>8} {:>9} {:>8} {:>9} {:>7} {:>8} {:>8}",
        "SOURCE", "MINIMAL", "ENRICHING", "PENDING", "ENRICHED", "FAILED", "ACTIVE", "EMBEDDED"
    );
    println!("  {}", "-".repeat(78));
    for (source, c) in &rows {
        println!(
            "  {:<12} {:>8} {:>9} {:>8} {:>9} {:>7} {:>8} {:>8}",
            source.as_str(),
            c.get(EnrichmentStatus::Minimal),
            c.get(EnrichmentStatus::Enriching),
            c.get(EnrichmentStatus::Pending),
            c.get(EnrichmentStatus::Enriched),
            c.get(EnrichmentStatus::Failed),
            c.active,
            c.embedded
        );
    }
    println!();

    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
