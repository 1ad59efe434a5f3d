//! `dsearch search`: hybrid ranking over ready-for-search datasets.
//!
//! The query is embedded with the configured provider when one is
//! enabled; otherwise (or if encoding fails) ranking uses only the keyword
//! and static signals.

use anyhow::Result;
use tracing::warn;

use datasearch_core::models::Source;
use datasearch_core::scoring::{search, SearchHit, SearchRequest};

use crate::app::AppContext;

/// Rank datasets for `query`. Shared by the CLI and tests.
pub async fn search_catalog(
    ctx: &AppContext,
    query: &str,
    source: Option<Source>,
    limit: Option<usize>,
    explain: bool,
) -> Result<Vec<SearchHit>> {
    let query_vec = if ctx.config.embedding.is_enabled() && !query.trim().is_empty() {
        let provider = ctx.provider()?;
        match provider.embed_batch(&[query.to_string()]).await {
            Ok(mut v) if v.len() == 1 => v.pop(),
            Ok(_) => {
                warn!("query encoder returned no vector; ranking without semantic signal");
                None
            }
            Err(e) => {
                warn!(error = %e, "query encoding failed; ranking without semantic signal");
                None
            }
        }
    } else {
        None
    };

    let scoring = &ctx.config.scoring;
    let req = SearchRequest {
        query,
        query_vec,
        source,
        weights: scoring.weights(),
        candidate_k: scoring.candidate_k,
        limit: limit.unwrap_or(scoring.final_limit),
        now: chrono::Utc::now().timestamp(),
        explain,
    };

    search(ctx.store().as_ref(), &req).await
}

pub async fn run_search(
    ctx: &AppContext,
    query: &str,
    source: Option<Source>,
    limit: Option<usize>,
    explain: bool,
    json: bool,
) -> Result<()> {
    let hits = search_catalog(ctx, query, source, limit, explain).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} ({}: {})",
            i + 1,
            hit.score,
            hit.title,
            hit.source,
            hit.external_id
        );
        println!("    url: {}", hit.url);
        println!("    updated: {}  static: {:.3}", hit.updated_at, hit.static_score);
        if let Some(b) = &hit.explain {
            println!(
                "    semantic={:.3} keyword={:.3} static={:.3} decay={:.3}",
                b.semantic, b.keyword, b.static_score, b.decay
            );
        }
        println!("    id: {}", hit.id);
    }

    Ok(())
}
