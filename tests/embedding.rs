//! Embedding batch processor and search over embedded datasets.

mod common;

use std::sync::Arc;

use tempfile::TempDir;

use datasearch::embed_cmd::EmbeddingProcessor;
use datasearch::models::Source;
use datasearch::scoring::{search, ScoringWeights, SearchRequest};
use datasearch::status::EnrichmentStatus;
use datasearch::store::memory::InMemoryStore;
use datasearch::store::{CatalogStore, ConflictPolicy, EmbeddingWrite, WriteOutcome};

use common::{described, minimal, sqlite_store, text_vector, EncoderMode, FakeEncoder};

const DIMS: usize = 8;

async fn insert_enriched(store: &dyn CatalogStore, records: &[(&str, &str, &str)]) {
    let records: Vec<_> = records
        .iter()
        .map(|(id, title, desc)| described(id, title, desc))
        .collect();
    store
        .bulk_upsert(
            Source::HuggingFace,
            &records,
            EnrichmentStatus::Enriched,
            ConflictPolicy::KeepExisting,
        )
        .await
        .unwrap();
}

const CORPUS: [(&str, &str, &str); 3] = [
    ("imdb", "IMDB movie reviews", "Sentiment labelled movie reviews"),
    ("squad", "SQuAD", "Reading comprehension questions on Wikipedia"),
    ("mnist", "MNIST digits", "Handwritten digit images"),
];

#[tokio::test]
async fn test_second_run_processes_nothing() {
    let store = Arc::new(InMemoryStore::new(DIMS));
    insert_enriched(store.as_ref(), &CORPUS).await;
    let encoder = Arc::new(FakeEncoder::new(DIMS, EncoderMode::Ok));

    let processor = EmbeddingProcessor::new(store.clone(), encoder.clone())
        .await
        .unwrap();
    let first = processor.process_batch(10).await.unwrap();
    assert_eq!((first.processed, first.failed), (3, 0));
    assert!(first.aborted.is_none());

    let second = processor.process_batch(10).await.unwrap();
    assert_eq!(second.processed, 0);
    assert_eq!(encoder.calls(), 1);

    for d in store.all().unwrap() {
        assert!(d.is_ready_for_search());
        assert!(d.invariants_hold());
    }
}

#[tokio::test]
async fn test_only_enriched_datasets_are_embedded() {
    let store = Arc::new(InMemoryStore::new(DIMS));
    insert_enriched(store.as_ref(), &CORPUS[..1]).await;
    store
        .bulk_upsert(
            Source::HuggingFace,
            &[minimal("bare")],
            EnrichmentStatus::Minimal,
            ConflictPolicy::KeepExisting,
        )
        .await
        .unwrap();

    let processor = EmbeddingProcessor::new(
        store.clone(),
        Arc::new(FakeEncoder::new(DIMS, EncoderMode::Ok)),
    )
    .await
    .unwrap();
    let report = processor.process_batch(10).await.unwrap();
    assert_eq!(report.processed, 1);

    let bare = store.find(Source::HuggingFace, "bare").unwrap().unwrap();
    assert!(bare.embedding.is_none());
}

#[tokio::test]
async fn test_dimension_disagreement_is_fatal() {
    let store = Arc::new(InMemoryStore::new(DIMS));
    let result = EmbeddingProcessor::new(
        store,
        Arc::new(FakeEncoder::new(DIMS + 1, EncoderMode::Ok)),
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_encoder_failure_aborts_run() {
    let store = Arc::new(InMemoryStore::new(DIMS));
    insert_enriched(store.as_ref(), &CORPUS).await;

    for mode in [EncoderMode::Fail, EncoderMode::DropOne] {
        let encoder = Arc::new(FakeEncoder::new(DIMS, mode));
        let processor = EmbeddingProcessor::new(store.clone(), encoder)
            .await
            .unwrap();
        let report = processor.process_batch(10).await.unwrap();
        assert!(report.aborted.is_some());
        assert_eq!(report.processed, 0);
        assert!(store.all().unwrap().iter().all(|d| d.embedding.is_none()));
    }
}

#[tokio::test]
async fn test_rejected_vector_does_not_block_others() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir, DIMS).await;
    insert_enriched(store.as_ref(), &CORPUS).await;

    let processor = EmbeddingProcessor::new(
        store.clone(),
        Arc::new(FakeEncoder::new(DIMS, EncoderMode::ShortSecond)),
    )
    .await
    .unwrap();
    let report = processor.process_batch(10).await.unwrap();
    assert_eq!((report.processed, report.failed), (2, 1));

    // The rejected dataset is selected again on the next run.
    let pending = store.select_for_embedding(10).await.unwrap();
    assert_eq!(pending.len(), 1);

    let retry = EmbeddingProcessor::new(
        store.clone(),
        Arc::new(FakeEncoder::new(DIMS, EncoderMode::Ok)),
    )
    .await
    .unwrap();
    assert_eq!(retry.process_batch(10).await.unwrap().processed, 1);
    assert!(store.select_for_embedding(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_vector_of_refreshed_content_is_not_stored() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir, DIMS).await;
    insert_enriched(store.as_ref(), &[("imdb", "Old title", "old")]).await;

    let selected = store.select_for_embedding(10).await.unwrap();
    assert_eq!(selected.len(), 1);
    let stale = &selected[0];

    // A latest run rewrites the content while the encoder is busy.
    let summary = store
        .bulk_upsert(
            Source::HuggingFace,
            &[described("imdb", "Brand new title", "new")],
            EnrichmentStatus::Pending,
            ConflictPolicy::RefreshContent,
        )
        .await
        .unwrap();
    assert_eq!(summary.refreshed, 1);

    let outcomes = store
        .commit_embeddings(&[EmbeddingWrite {
            dataset_id: stale.id.clone(),
            content_hash: stale.content_hash.clone(),
            vector: text_vector(&stale.encode_text(), DIMS),
        }])
        .await
        .unwrap();
    assert!(matches!(outcomes[0], WriteOutcome::Rejected(_)));

    let current = store.get(&stale.id).await.unwrap().unwrap();
    assert_eq!(current.title, "Brand new title");
    assert!(current.embedding.is_none());

    // The refreshed text is picked up by the next run.
    let processor = EmbeddingProcessor::new(
        store.clone(),
        Arc::new(FakeEncoder::new(DIMS, EncoderMode::Ok)),
    )
    .await
    .unwrap();
    assert_eq!(processor.process_batch(10).await.unwrap().processed, 1);
    let current = store.get(&stale.id).await.unwrap().unwrap();
    assert_eq!(
        current.embedding,
        Some(text_vector(&current.encode_text(), DIMS))
    );
}

#[tokio::test]
async fn test_batches_take_oldest_first() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir, DIMS).await;
    insert_enriched(store.as_ref(), &CORPUS).await;

    // Touch "imdb" so it becomes the most recently updated.
    let mut imdb = store
        .select_for_embedding(10)
        .await
        .unwrap()
        .into_iter()
        .find(|d| d.external_id == "imdb")
        .unwrap();
    imdb.updated_at += 100;
    store.upsert(&imdb).await.unwrap();

    let processor = EmbeddingProcessor::new(
        store.clone(),
        Arc::new(FakeEncoder::new(DIMS, EncoderMode::Ok)),
    )
    .await
    .unwrap();
    assert_eq!(processor.process_batch(2).await.unwrap().processed, 2);

    let left = store.select_for_embedding(10).await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].external_id, "imdb");
}

#[tokio::test]
async fn test_search_ranks_embedded_datasets() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir, DIMS).await;
    insert_enriched(store.as_ref(), &CORPUS).await;

    let processor = EmbeddingProcessor::new(
        store.clone(),
        Arc::new(FakeEncoder::new(DIMS, EncoderMode::Ok)),
    )
    .await
    .unwrap();
    processor.process_batch(10).await.unwrap();

    let imdb_text = "IMDB movie reviews IMDB movie reviews Sentiment labelled movie reviews";
    let req = SearchRequest {
        query: "movie reviews",
        query_vec: Some(text_vector(imdb_text, DIMS)),
        source: None,
        weights: ScoringWeights::default(),
        candidate_k: 10,
        limit: 3,
        now: chrono::Utc::now().timestamp(),
        explain: true,
    };

    let first = search(store.as_ref(), &req).await.unwrap();
    let second = search(store.as_ref(), &req).await.unwrap();
    assert!(!first.is_empty());
    assert_eq!(first[0].external_id, "imdb");
    assert!(first[0].explain.is_some());

    let ids = |hits: &[datasearch::scoring::SearchHit]| {
        hits.iter().map(|h| h.id.clone()).collect::<Vec<_>>()
    };
    assert_eq!(ids(&first), ids(&second));

    let filtered = search(
        store.as_ref(),
        &SearchRequest {
            source: Some(Source::Kaggle),
            ..req.clone()
        },
    )
    .await
    .unwrap();
    assert!(filtered.is_empty());
}
