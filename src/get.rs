//! `dsearch get` and `dsearch logs`: inspect one dataset and its
//! enrichment history.

use anyhow::{bail, Result};

use crate::app::AppContext;

pub async fn run_get(ctx: &AppContext, id: &str) -> Result<()> {
    let Some(d) = ctx.store().get(id).await? else {
        bail!("dataset not found: {}", id);
    };

    println!("--- Dataset ---");
    println!("id:            {}", d.id);
    println!("title:         {}", d.title);
    println!("source:        {}", d.source);
    println!("external_id:   {}", d.external_id);
    println!("url:           {}", d.url);
    println!("status:        {}", d.status);
    println!("active:        {}", d.is_active);
    println!("attempts:      {}", d.attempt_count);
    println!("static_score:  {:.4}", d.static_score);
    println!(
        "embedding:     {}",
        match &d.embedding {
            Some(v) => format!("{} dims", v.len()),
            None => "none".to_string(),
        }
    );
    println!("created_at:    {}", format_ts_iso(d.created_at));
    println!("updated_at:    {}", format_ts_iso(d.updated_at));
    if let Some(ts) = d.last_enriched_at {
        println!("enriched_at:   {}", format_ts_iso(ts));
    }
    if let Some(err) = &d.last_error {
        println!("last_error:    {}", err);
    }
    if !d.tags.is_empty() {
        let tags: Vec<&str> = d.tags.iter().map(String::as_str).collect();
        println!("tags:          {}", tags.join(", "));
    }
    println!("metadata:      {}", d.metadata);
    println!();

    println!("--- Description ---");
    println!("{}", d.description.as_deref().unwrap_or("(none)"));

    Ok(())
}

pub async fn run_logs(ctx: &AppContext, id: &str) -> Result<()> {
    let logs = ctx.store().logs_for(id).await?;
    if logs.is_empty() {
        println!("No enrichment log entries for {}.", id);
        return Ok(());
    }

    println!("{:<21} {:<13} MESSAGE", "TIME", "OUTCOME");
    for entry in &logs {
        println!(
            "{:<21} {:<13} {}",
            format_ts_iso(entry.timestamp),
            entry.outcome.as_str(),
            entry.message
        );
    }
    Ok(())
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
