//! CLI entry points for the enrichment phases.
//!
//! Every phase runs under the task lease `"{phase}:{source}"`, so
//! overlapping scheduled invocations of the same phase skip instead of
//! double-processing datasets.

use anyhow::Result;

use datasearch_core::models::{PhaseReport, SortOrder, Source};

use crate::app::AppContext;
use crate::embed_cmd::run_embed;

fn print_report(phase: &str, source: Source, report: &PhaseReport) {
    println!("{} {}", phase, source);
    println!("  succeeded: {}", report.succeeded);
    println!("  failed: {}", report.failed);
    println!("  rate_limited: {}", report.rate_limited);
    if report.skipped > 0 {
        println!("  skipped: {}", report.skipped);
    }
    if report.timed_out {
        println!("  timed out: partial counts");
    }
}

pub async fn run_seed(
    ctx: &AppContext,
    source: Source,
    batch_size: Option<usize>,
    force_refresh: bool,
) -> Result<()> {
    let batch_size = batch_size.unwrap_or(ctx.config.jobs.seed_batch);
    let orchestrator = ctx.orchestrator(source)?;
    let task = format!("seed:{}", source);

    if let Some(report) = ctx
        .with_lease(&task, orchestrator.seed(batch_size, force_refresh))
        .await?
    {
        print_report("seed", source, &report);
    }
    Ok(())
}

pub async fn run_enrich(ctx: &AppContext, source: Source, batch_size: Option<usize>) -> Result<()> {
    let batch_size = batch_size.unwrap_or(ctx.config.jobs.enrich_batch);
    let orchestrator = ctx.orchestrator(source)?;
    let task = format!("enrich:{}", source);

    if let Some(report) = ctx
        .with_lease(&task, orchestrator.enrich_pending(batch_size))
        .await?
    {
        print_report("enrich", source, &report);
    }
    Ok(())
}

pub async fn run_latest(
    ctx: &AppContext,
    source: Source,
    limit: Option<usize>,
    order: Option<SortOrder>,
) -> Result<()> {
    let limit = limit.unwrap_or(ctx.config.jobs.latest_limit);
    let order = order.unwrap_or(ctx.config.jobs.latest_sort);
    let orchestrator = ctx.orchestrator(source)?;
    let task = format!("latest:{}", source);

    if let Some(report) = ctx
        .with_lease(&task, orchestrator.fetch_latest(limit, order))
        .await?
    {
        print_report("latest", source, &report);
    }
    Ok(())
}

/// One scheduled pass: latest then enrich for every configured source,
/// then one embedding batch when a provider is configured.
pub async fn run_cycle(ctx: &AppContext) -> Result<()> {
    if ctx.registry().is_empty() {
        println!("cycle: no sources configured");
    }

    let sources: Vec<Source> = ctx
        .registry()
        .connectors()
        .iter()
        .map(|c| c.source())
        .collect();

    for source in sources {
        run_latest(ctx, source, None, None).await?;
        run_enrich(ctx, source, None).await?;
    }

    if ctx.config.embedding.is_enabled() {
        run_embed(ctx, None, false).await?;
    }
    Ok(())
}
