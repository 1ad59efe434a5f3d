//! Enrichment orchestrator: the seed, enrich and latest phases.
//!
//! Each phase is an independent unit of work that runs to completion (or
//! to the run deadline) and returns a [`PhaseReport`]. Source failures
//! never escape a phase; they become counts, tracing events and
//! [`EnrichmentLog`] entries. Only store failures propagate as errors.
//!
//! # Per-item outcomes in `enrich_pending`
//!
//! | Connector result | Dataset | Log | Batch |
//! |------------------|---------|-----|-------|
//! | success | ENRICHED, or PENDING when partial | SUCCESS | continue |
//! | rate limited | unchanged | RATE_LIMITED | **abort** |
//! | not found | FAILED, inactive | FAILED | continue |
//! | transient / call timeout | `attempt_count + 1`, FAILED at 3 | FAILED | continue |
//! | mapping error | unchanged | FAILED | continue |

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use datasearch_core::connector::SourceConnector;
use datasearch_core::error::SourceError;
use datasearch_core::models::{
    Dataset, EnrichmentLog, LogOutcome, MappedRecord, PhaseReport, RawRecord, SortOrder, Source,
};
use datasearch_core::status::{EnrichmentStatus, MAX_ATTEMPTS};
use datasearch_core::store::{CatalogStore, ConflictPolicy};

use crate::rate_limit::RateLimiter;

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Drives the enrichment lifecycle for one source.
pub struct Orchestrator {
    store: Arc<dyn CatalogStore>,
    connector: Arc<dyn SourceConnector>,
    limiter: Arc<RateLimiter>,
    call_timeout: Duration,
    run_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        connector: Arc<dyn SourceConnector>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            store,
            connector,
            limiter,
            call_timeout: Duration::from_secs(30),
            run_timeout: Duration::from_secs(900),
        }
    }

    /// Per-call and whole-run time limits.
    pub fn with_timeouts(mut self, call_timeout: Duration, run_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self.run_timeout = run_timeout;
        self
    }

    pub fn source(&self) -> Source {
        self.connector.source()
    }

    /// One connector call through the rate limiter, bounded by the call
    /// timeout and by the run deadline. `None` means the deadline passed.
    async fn call<T, F, Fut>(&self, deadline: Instant, f: F) -> Option<Result<T, SourceError>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, SourceError>>,
    {
        let call_timeout = self.call_timeout;
        let limited = self.limiter.run(|| async move {
            match tokio::time::timeout(call_timeout, f()).await {
                Ok(result) => result,
                Err(_) => Err(SourceError::Transient(format!(
                    "call timed out after {}s",
                    call_timeout.as_secs()
                ))),
            }
        });
        tokio::time::timeout_at(deadline, limited).await.ok()
    }

    /// Map raw records, splitting them into mapped records and a count of
    /// mapping failures.
    fn map_all(&self, raws: &[RawRecord]) -> (Vec<MappedRecord>, u64) {
        let source = self.source();
        let mut mapped = Vec::with_capacity(raws.len());
        let mut failed = 0u64;
        for raw in raws {
            match self.connector.map(raw) {
                Ok(m) => mapped.push(m),
                Err(e) => {
                    failed += 1;
                    warn!(
                        %source,
                        external_id = %raw.external_id,
                        error = %e,
                        "skipping unmappable record"
                    );
                }
            }
        }
        (mapped, failed)
    }

    /// Bulk-load the seed feed as MINIMAL datasets.
    ///
    /// Existing `(source, external_id)` pairs are left alone unless
    /// `force_refresh` is set, in which case their content is rewritten
    /// and their status kept.
    pub async fn seed(&self, batch_size: usize, force_refresh: bool) -> Result<PhaseReport> {
        let source = self.source();
        let deadline = Instant::now() + self.run_timeout;
        let mut report = PhaseReport::default();
        info!(%source, force_refresh, "seed started");

        let raws = match self.call(deadline, || self.connector.fetch_seed()).await {
            None => {
                report.timed_out = true;
                warn!(%source, "seed feed did not finish before the run deadline");
                return Ok(report);
            }
            Some(Ok(raws)) => raws,
            Some(Err(e)) => {
                feed_failure(&mut report, source, "seed", &e);
                return Ok(report);
            }
        };

        let (mapped, unmappable) = self.map_all(&raws);
        report.failed += unmappable;

        let policy = if force_refresh {
            ConflictPolicy::RefreshContent
        } else {
            ConflictPolicy::KeepExisting
        };

        for chunk in mapped.chunks(batch_size.max(1)) {
            if Instant::now() >= deadline {
                report.timed_out = true;
                break;
            }
            let summary = self
                .store
                .bulk_upsert(source, chunk, EnrichmentStatus::Minimal, policy)
                .await?;
            report.succeeded += summary.written();
            report.skipped += summary.unchanged;
            debug!(
                %source,
                inserted = summary.inserted,
                refreshed = summary.refreshed,
                unchanged = summary.unchanged,
                "seed chunk stored"
            );
        }

        info!(
            %source,
            succeeded = report.succeeded,
            skipped = report.skipped,
            failed = report.failed,
            timed_out = report.timed_out,
            "seed finished"
        );
        Ok(report)
    }

    /// Enrich up to `batch_size` MINIMAL/PENDING datasets, one at a time.
    pub async fn enrich_pending(&self, batch_size: usize) -> Result<PhaseReport> {
        let source = self.source();
        let deadline = Instant::now() + self.run_timeout;
        let mut report = PhaseReport::default();

        let batch = self
            .store
            .select(source, &EnrichmentStatus::ENRICHABLE, batch_size)
            .await?;
        info!(%source, selected = batch.len(), "enrichment started");

        for mut dataset in batch {
            let key = dataset.lookup_key().to_string();
            let result = match self
                .call(deadline, || self.connector.fetch_by_id(&key))
                .await
            {
                Some(r) => r,
                None => {
                    report.timed_out = true;
                    warn!(%source, "run deadline reached; stopping with partial counts");
                    break;
                }
            };
            let now = now_ts();

            let fetched = result.and_then(|raw| self.connector.map(&raw));
            match fetched {
                Ok(mapped) => {
                    let status = dataset.record_success(&mapped, now)?;
                    self.store.upsert(&dataset).await?;
                    let message = match status {
                        EnrichmentStatus::Pending => "partially enriched; awaiting another pass",
                        _ => "enriched",
                    };
                    self.log(&dataset, LogOutcome::Success, message, now).await?;
                    report.succeeded += 1;
                    debug!(%source, dataset_id = %dataset.id, %status, "dataset enriched");
                }
                Err(SourceError::RateLimited(msg)) => {
                    self.log(&dataset, LogOutcome::RateLimited, &msg, now).await?;
                    report.rate_limited += 1;
                    warn!(%source, dataset_id = %dataset.id, "rate limited; aborting batch");
                    break;
                }
                Err(SourceError::NotFound(msg)) => {
                    dataset.record_not_found(&format!("not found: {}", msg))?;
                    self.store.upsert(&dataset).await?;
                    self.log(&dataset, LogOutcome::Failed, &format!("not found: {}", msg), now)
                        .await?;
                    report.failed += 1;
                    info!(%source, dataset_id = %dataset.id, "dataset no longer exists upstream");
                }
                Err(SourceError::Transient(msg)) => {
                    let status = dataset.record_attempt_failure(&msg)?;
                    self.store.upsert(&dataset).await?;
                    let message = format!(
                        "attempt {}/{} failed: {}",
                        dataset.attempt_count, MAX_ATTEMPTS, msg
                    );
                    self.log(&dataset, LogOutcome::Failed, &message, now).await?;
                    report.failed += 1;
                    warn!(
                        %source,
                        dataset_id = %dataset.id,
                        attempts = dataset.attempt_count,
                        %status,
                        error = %msg,
                        "enrichment attempt failed"
                    );
                }
                Err(SourceError::Mapping(msg)) => {
                    self.log(&dataset, LogOutcome::Failed, &format!("mapping error: {}", msg), now)
                        .await?;
                    report.failed += 1;
                    warn!(%source, dataset_id = %dataset.id, error = %msg, "unmappable response");
                }
            }
        }

        info!(
            %source,
            succeeded = report.succeeded,
            failed = report.failed,
            rate_limited = report.rate_limited,
            timed_out = report.timed_out,
            "enrichment finished"
        );
        Ok(report)
    }

    /// Pull a page of recent datasets. New ids enter as PENDING; known
    /// ones get their content refreshed and keep their status.
    pub async fn fetch_latest(&self, limit: usize, order: SortOrder) -> Result<PhaseReport> {
        let source = self.source();
        let deadline = Instant::now() + self.run_timeout;
        let mut report = PhaseReport::default();
        info!(%source, limit, order = order.as_str(), "latest started");

        let raws = match self
            .call(deadline, || self.connector.fetch_latest(limit, order))
            .await
        {
            None => {
                report.timed_out = true;
                return Ok(report);
            }
            Some(Ok(raws)) => raws,
            Some(Err(e)) => {
                feed_failure(&mut report, source, "latest", &e);
                return Ok(report);
            }
        };

        let (mapped, unmappable) = self.map_all(&raws);
        report.failed += unmappable;

        let summary = self
            .store
            .bulk_upsert(
                source,
                &mapped,
                EnrichmentStatus::Pending,
                ConflictPolicy::RefreshContent,
            )
            .await?;
        report.succeeded += summary.written();
        report.skipped += summary.unchanged;

        info!(
            %source,
            inserted = summary.inserted,
            refreshed = summary.refreshed,
            unchanged = summary.unchanged,
            failed = report.failed,
            "latest finished"
        );
        Ok(report)
    }

    async fn log(
        &self,
        dataset: &Dataset,
        outcome: LogOutcome,
        message: &str,
        now: i64,
    ) -> Result<()> {
        self.store
            .append_log(&EnrichmentLog::new(&dataset.id, outcome, message, now))
            .await
    }
}

/// A feed-level failure ends the phase: a rate limit is reported as such,
/// anything else as one failure.
fn feed_failure(report: &mut PhaseReport, source: Source, phase: &str, err: &SourceError) {
    match err {
        SourceError::RateLimited(_) => report.rate_limited += 1,
        _ => report.failed += 1,
    }
    warn!(%source, phase, kind = err.kind(), error = %err, "feed request failed");
}
