//! Orchestrator behaviour against scripted connectors.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use datasearch::enrich::Orchestrator;
use datasearch::models::{LogOutcome, PhaseReport, SortOrder, Source};
use datasearch::rate_limit::RateLimiter;
use datasearch::status::EnrichmentStatus;
use datasearch::store::memory::InMemoryStore;
use datasearch::store::{CatalogStore, ConflictPolicy};
use datasearch_core::error::SourceError;

use common::{feed_record, full, minimal, partial, sqlite_store, ScriptedConnector};

fn orchestrator(store: Arc<dyn CatalogStore>, connector: Arc<ScriptedConnector>) -> Orchestrator {
    Orchestrator::new(store, connector, Arc::new(RateLimiter::new(Duration::ZERO)))
}

async fn seed_minimal(store: &dyn CatalogStore, ids: &[&str]) {
    let records: Vec<_> = ids.iter().map(|id| minimal(id)).collect();
    store
        .bulk_upsert(
            Source::Kaggle,
            &records,
            EnrichmentStatus::Minimal,
            ConflictPolicy::KeepExisting,
        )
        .await
        .unwrap();
}

async fn dataset(store: &InMemoryStore, external_id: &str) -> datasearch::models::Dataset {
    store.find(Source::Kaggle, external_id).unwrap().unwrap()
}

#[tokio::test]
async fn test_rate_limit_aborts_batch() {
    let store = Arc::new(InMemoryStore::new(4));
    seed_minimal(store.as_ref(), &["a", "b", "c"]).await;

    let connector = Arc::new(ScriptedConnector::new(Source::Kaggle));
    connector.reply("a", full("A", "first"));
    connector.reply("b", Err(SourceError::RateLimited("HTTP 429".into())));
    connector.reply("c", full("C", "third"));

    let report = orchestrator(store.clone(), connector.clone())
        .enrich_pending(10)
        .await
        .unwrap();

    assert_eq!(
        report,
        PhaseReport {
            succeeded: 1,
            failed: 0,
            rate_limited: 1,
            skipped: 0,
            timed_out: false
        }
    );
    assert_eq!(connector.calls(), vec!["a", "b"]);

    assert_eq!(dataset(&store, "a").await.status, EnrichmentStatus::Enriched);
    for id in ["b", "c"] {
        let d = dataset(&store, id).await;
        assert_eq!(d.status, EnrichmentStatus::Minimal);
        assert_eq!(d.attempt_count, 0);
        assert!(d.is_active);
    }

    let b = dataset(&store, "b").await;
    let logs = store.logs_for(&b.id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].outcome, LogOutcome::RateLimited);
    let c = dataset(&store, "c").await;
    assert!(store.logs_for(&c.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_not_found_is_terminal_on_first_attempt() {
    let store = Arc::new(InMemoryStore::new(4));
    seed_minimal(store.as_ref(), &["gone", "next"]).await;

    let connector = Arc::new(ScriptedConnector::new(Source::Kaggle));
    connector.reply("gone", Err(SourceError::NotFound("kaggle dataset gone".into())));
    connector.reply("next", full("Next", "still here"));

    let report = orchestrator(store.clone(), connector)
        .enrich_pending(10)
        .await
        .unwrap();
    assert_eq!((report.succeeded, report.failed, report.rate_limited), (1, 1, 0));

    let gone = dataset(&store, "gone").await;
    assert_eq!(gone.status, EnrichmentStatus::Failed);
    assert!(!gone.is_active);
    assert_eq!(gone.attempt_count, 0);
    assert_eq!(store.logs_for(&gone.id).await.unwrap()[0].outcome, LogOutcome::Failed);
}

#[tokio::test]
async fn test_transient_failures_exhaust_after_three_runs() {
    let store = Arc::new(InMemoryStore::new(4));
    seed_minimal(store.as_ref(), &["flaky"]).await;

    let connector = Arc::new(ScriptedConnector::new(Source::Kaggle));
    for _ in 0..3 {
        connector.reply("flaky", Err(SourceError::Transient("HTTP 502".into())));
    }
    let orch = orchestrator(store.clone(), connector.clone());

    for expected in [1, 2] {
        let report = orch.enrich_pending(10).await.unwrap();
        assert_eq!(report.failed, 1);
        let d = dataset(&store, "flaky").await;
        assert_eq!(d.attempt_count, expected);
        assert_eq!(d.status, EnrichmentStatus::Minimal);
        assert!(d.is_active);
    }

    orch.enrich_pending(10).await.unwrap();
    let d = dataset(&store, "flaky").await;
    assert_eq!(d.attempt_count, 3);
    assert_eq!(d.status, EnrichmentStatus::Failed);
    assert!(!d.is_active);
    assert_eq!(store.logs_for(&d.id).await.unwrap().len(), 3);

    // Nothing left to select.
    let report = orch.enrich_pending(10).await.unwrap();
    assert_eq!(report, PhaseReport::default());
    assert_eq!(connector.calls().len(), 3);
}

#[tokio::test]
async fn test_mapping_error_logged_without_attempt() {
    let store = Arc::new(InMemoryStore::new(4));
    seed_minimal(store.as_ref(), &["odd", "fine"]).await;

    let connector = Arc::new(ScriptedConnector::new(Source::Kaggle));
    connector.reply("odd", Ok(json!({ "malformed": true })));
    connector.reply("fine", full("Fine", "ok"));

    let report = orchestrator(store.clone(), connector)
        .enrich_pending(10)
        .await
        .unwrap();
    assert_eq!((report.succeeded, report.failed), (1, 1));

    let odd = dataset(&store, "odd").await;
    assert_eq!(odd.status, EnrichmentStatus::Minimal);
    assert_eq!(odd.attempt_count, 0);
    let logs = store.logs_for(&odd.id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].outcome, LogOutcome::Failed);
    assert!(logs[0].message.contains("mapping"));
}

#[tokio::test]
async fn test_partial_then_full_enrichment() {
    let store = Arc::new(InMemoryStore::new(4));
    seed_minimal(store.as_ref(), &["p"]).await;

    let connector = Arc::new(ScriptedConnector::new(Source::Kaggle));
    connector.reply("p", partial("Titled"));
    connector.reply("p", full("Titled", "Now described"));
    let orch = orchestrator(store.clone(), connector);

    orch.enrich_pending(10).await.unwrap();
    let d = dataset(&store, "p").await;
    assert_eq!(d.status, EnrichmentStatus::Pending);
    assert_eq!(d.title, "Titled");
    assert!(d.last_enriched_at.is_some());

    orch.enrich_pending(10).await.unwrap();
    let d = dataset(&store, "p").await;
    assert_eq!(d.status, EnrichmentStatus::Enriched);
    assert_eq!(d.description.as_deref(), Some("Now described"));
}

#[tokio::test(start_paused = true)]
async fn test_call_timeout_counts_as_attempt() {
    let store = Arc::new(InMemoryStore::new(4));
    seed_minimal(store.as_ref(), &["slow"]).await;

    let connector =
        Arc::new(ScriptedConnector::new(Source::Kaggle).with_delay(Duration::from_secs(60)));
    connector.reply("slow", full("Slow", "eventually"));

    let report = orchestrator(store.clone(), connector)
        .with_timeouts(Duration::from_secs(5), Duration::from_secs(600))
        .enrich_pending(10)
        .await
        .unwrap();
    assert_eq!(report.failed, 1);

    let d = dataset(&store, "slow").await;
    assert_eq!(d.attempt_count, 1);
    assert_eq!(d.status, EnrichmentStatus::Minimal);
    assert!(d.last_error.unwrap().contains("timed out"));
}

#[tokio::test(start_paused = true)]
async fn test_run_deadline_returns_partial_counts() {
    let store = Arc::new(InMemoryStore::new(4));
    seed_minimal(store.as_ref(), &["one", "two", "three"]).await;

    let connector =
        Arc::new(ScriptedConnector::new(Source::Kaggle).with_delay(Duration::from_secs(3)));
    for id in ["one", "two", "three"] {
        connector.reply(id, full(id, "described"));
    }

    let orch = Orchestrator::new(
        store.clone(),
        connector,
        Arc::new(RateLimiter::new(Duration::from_secs(2))),
    )
    .with_timeouts(Duration::from_secs(10), Duration::from_secs(5));

    let report = orch.enrich_pending(10).await.unwrap();
    assert!(report.timed_out);
    assert_eq!(report.succeeded, 1);

    assert_eq!(dataset(&store, "one").await.status, EnrichmentStatus::Enriched);
    let two = dataset(&store, "two").await;
    assert_eq!(two.status, EnrichmentStatus::Minimal);
    assert_eq!(two.attempt_count, 0);
}

#[tokio::test]
async fn test_seed_keeps_existing_unless_forced() {
    let store = Arc::new(InMemoryStore::new(4));
    let connector = Arc::new(ScriptedConnector::new(Source::Kaggle));
    connector.set_feed(Ok(vec![feed_record("x", "Old X"), feed_record("y", "Old Y")]));
    connector.reply("x", full("Enriched X", "desc"));
    let orch = orchestrator(store.clone(), connector.clone());

    let report = orch.seed(1, false).await.unwrap();
    assert_eq!(report.succeeded, 2);
    assert_eq!(dataset(&store, "x").await.status, EnrichmentStatus::Minimal);

    orch.enrich_pending(1).await.unwrap();
    assert_eq!(dataset(&store, "x").await.status, EnrichmentStatus::Enriched);

    connector.set_feed(Ok(vec![feed_record("x", "New X"), feed_record("y", "New Y")]));
    let kept = orch.seed(10, false).await.unwrap();
    assert_eq!((kept.succeeded, kept.skipped), (0, 2));
    assert_eq!(dataset(&store, "y").await.title, "Old Y");
    assert_eq!(dataset(&store, "x").await.title, "Enriched X");

    let forced = orch.seed(10, true).await.unwrap();
    assert_eq!((forced.succeeded, forced.skipped), (2, 0));
    let x = dataset(&store, "x").await;
    assert_eq!(x.title, "New X");
    assert_eq!(x.status, EnrichmentStatus::Enriched);
    assert_eq!(dataset(&store, "y").await.title, "New Y");
    assert_eq!(store.all().unwrap().len(), 2);
}

#[tokio::test]
async fn test_seed_feed_rate_limited() {
    let store = Arc::new(InMemoryStore::new(4));
    let connector = Arc::new(ScriptedConnector::new(Source::Kaggle));
    connector.set_feed(Err(SourceError::RateLimited("HTTP 429".into())));

    let report = orchestrator(store.clone(), connector).seed(100, false).await.unwrap();
    assert_eq!((report.succeeded, report.failed, report.rate_limited), (0, 0, 1));
    assert!(store.all().unwrap().is_empty());
}

#[tokio::test]
async fn test_latest_inserts_pending_and_refreshes_known() {
    let store = Arc::new(InMemoryStore::new(4));
    seed_minimal(store.as_ref(), &["known"]).await;

    let connector = Arc::new(ScriptedConnector::new(Source::Kaggle));
    connector.set_feed(Ok(vec![
        feed_record("known", "Known, retitled"),
        feed_record("fresh", "Fresh"),
        datasearch::models::RawRecord {
            external_id: "broken".into(),
            shape: datasearch::models::RecordShape::Listing,
            payload: json!({ "malformed": true }),
        },
    ]));

    let report = orchestrator(store.clone(), connector)
        .fetch_latest(10, SortOrder::Updated)
        .await
        .unwrap();
    assert_eq!((report.succeeded, report.failed), (2, 1));

    let known = dataset(&store, "known").await;
    assert_eq!(known.status, EnrichmentStatus::Minimal);
    assert_eq!(known.title, "Known, retitled");
    assert_eq!(dataset(&store, "fresh").await.status, EnrichmentStatus::Pending);
    assert!(store.find(Source::Kaggle, "broken").unwrap().is_none());
}

#[tokio::test]
async fn test_invariants_hold_after_mixed_run() {
    let store = Arc::new(InMemoryStore::new(4));
    let ids = ["s1", "s2", "n1", "t1", "m1"];
    seed_minimal(store.as_ref(), &ids).await;

    let connector = Arc::new(ScriptedConnector::new(Source::Kaggle));
    connector.reply("s1", full("S1", "d"));
    connector.reply("s2", partial("S2"));
    connector.reply("n1", Err(SourceError::NotFound("n1".into())));
    connector.reply("t1", Err(SourceError::Transient("boom".into())));
    connector.reply("m1", Ok(json!({ "malformed": true })));

    let report = orchestrator(store.clone(), connector)
        .enrich_pending(10)
        .await
        .unwrap();
    assert_eq!(report.succeeded + report.failed, ids.len() as u64);

    for d in store.all().unwrap() {
        assert!(d.invariants_hold(), "invariant broken for {}", d.external_id);
        assert_ne!(d.status, EnrichmentStatus::Enriching);
    }
}

#[tokio::test]
async fn test_sqlite_rate_limit_and_retry() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir, 4).await;
    seed_minimal(store.as_ref(), &["a", "b", "c"]).await;

    let connector = Arc::new(ScriptedConnector::new(Source::Kaggle));
    connector.reply("a", full("A", "first"));
    connector.reply("b", Err(SourceError::RateLimited("HTTP 429".into())));
    connector.reply("b", Err(SourceError::Transient("HTTP 503".into())));
    connector.reply("c", full("C", "third"));
    let orch = orchestrator(store.clone(), connector.clone());

    let first = orch.enrich_pending(10).await.unwrap();
    assert_eq!((first.succeeded, first.failed, first.rate_limited), (1, 0, 1));

    let remaining = store
        .select(Source::Kaggle, &EnrichmentStatus::ENRICHABLE, 10)
        .await
        .unwrap();
    let ids: Vec<&str> = remaining.iter().map(|d| d.external_id.as_str()).collect();
    assert_eq!(ids, vec!["b", "c"]);
    assert!(remaining.iter().all(|d| d.attempt_count == 0));

    let second = orch.enrich_pending(10).await.unwrap();
    assert_eq!((second.succeeded, second.failed, second.rate_limited), (1, 1, 0));

    let remaining = store
        .select(Source::Kaggle, &EnrichmentStatus::ENRICHABLE, 10)
        .await
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].external_id, "b");
    assert_eq!(remaining[0].attempt_count, 1);

    let logs = store.logs_for(&remaining[0].id).await.unwrap();
    let outcomes: Vec<LogOutcome> = logs.iter().map(|l| l.outcome).collect();
    assert_eq!(outcomes, vec![LogOutcome::RateLimited, LogOutcome::Failed]);
}
