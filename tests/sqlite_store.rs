// tests/sqlite_store.rs
use chrono::{Duration, Utc};
use osint_pipeline::analyze::types::{Entity, Sentiment, SentimentMethod};
use osint_pipeline::analyze::AnalysisResult;
use osint_pipeline::ingest::sqlite::SqliteStore;
use osint_pipeline::ingest::{CollectedRecord, InsertOutcome, ProcessingState, RecordQuery, RecordStore};
use std::sync::Arc;
use uuid::Uuid;

fn record(source: Uuid, hash: &str) -> CollectedRecord {
    CollectedRecord {
        id: Uuid::new_v4(),
        source_id: source,
        content_hash: hash.into(),
        external_id: Some(format!("ext-{hash}")),
        title: format!("Title {hash}"),
        text: "Body text".into(),
        url: Some("https://example.test/a".into()),
        author: None,
        published_at: None,
        collected_at: Utc::now(),
        raw: serde_json::json!({ "k": hash }),
        state: ProcessingState::Pending,
    }
}

fn analysis(r: &CollectedRecord, score: f64) -> AnalysisResult {
    AnalysisResult {
        id: Uuid::new_v4(),
        record_id: r.id,
        source_id: r.source_id,
        sentiment: Sentiment::from_score(score, SentimentMethod::Lexicon),
        entities: vec![Entity::new("hashtag", "breach")],
        trend_tags: vec!["hashtag:breach".into()],
        computed_at: Utc::now(),
    }
}

#[tokio::test]
async fn records_and_analyses_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("osint.db");
    let path = path.to_str().unwrap();
    let source = Uuid::new_v4();
    let window_start = Utc::now() - Duration::hours(1);

    let rec = record(source, "h1");
    {
        let store = SqliteStore::open(path).await.unwrap();
        assert_eq!(
            store.insert_if_new(rec.clone(), window_start).await.unwrap(),
            InsertOutcome::Inserted(rec.id)
        );
        assert!(matches!(
            store.insert_if_new(record(source, "h1"), window_start).await.unwrap(),
            InsertOutcome::Duplicate(id) if id == rec.id
        ));
        store.put_analysis(analysis(&rec, -0.6)).await.unwrap();
        store.set_state(rec.id, ProcessingState::Analyzed).await.unwrap();
    }

    let store = SqliteStore::open(path).await.unwrap();
    let got = store.get_record(rec.id).await.unwrap().unwrap();
    assert_eq!(got.title, rec.title);
    assert_eq!(got.raw, rec.raw);
    assert_eq!(got.state, ProcessingState::Analyzed);

    let analyses = store.analyses_for(rec.id).await.unwrap();
    assert_eq!(analyses.len(), 1);
    assert_eq!(analyses[0].entities, vec![Entity::new("hashtag", "breach")]);
    assert!(analyses[0].sentiment.score < 0.0);
}

#[tokio::test]
async fn claimed_work_is_requeued_on_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("requeue.db");
    let path = path.to_str().unwrap();
    let rec = record(Uuid::new_v4(), "h");

    {
        let store = SqliteStore::open(path).await.unwrap();
        store.insert_if_new(rec.clone(), Utc::now() - Duration::hours(1)).await.unwrap();
        assert_eq!(store.claim_pending(10).await.unwrap().len(), 1);
        assert_eq!(store.stats().await.unwrap().processing, 1);
    }

    let store = SqliteStore::open(path).await.unwrap();
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.processing, 0);
    assert_eq!(stats.pending, 1);
}

#[tokio::test]
async fn analysis_for_unknown_record_is_rejected() {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let orphan = record(Uuid::new_v4(), "orphan");
    assert!(store.put_analysis(analysis(&orphan, 0.2)).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_inserts_of_same_content_store_one() {
    let store: Arc<dyn RecordStore> = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let source = Uuid::new_v4();
    let window_start = Utc::now() - Duration::hours(1);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.insert_if_new(record(source, "same"), window_start).await.unwrap()
        }));
    }
    let mut inserted = 0;
    for h in handles {
        if matches!(h.await.unwrap(), InsertOutcome::Inserted(_)) {
            inserted += 1;
        }
    }
    assert_eq!(inserted, 1);
    let all = store.list_records(RecordQuery::default()).await.unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_record_is_claimed_by_one_caller() {
    let store: Arc<dyn RecordStore> = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let rec = record(Uuid::new_v4(), "claim");
    store.insert_if_new(rec.clone(), Utc::now() - Duration::hours(1)).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..6 {
        let store = store.clone();
        let id = rec.id;
        handles.push(tokio::spawn(async move { store.claim_records(&[id]).await.unwrap().len() }));
    }
    let mut won = 0;
    for h in handles {
        won += h.await.unwrap();
    }
    assert_eq!(won, 1);
}

#[tokio::test]
async fn purge_removes_old_rows_and_their_analyses() {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let mut old = record(Uuid::new_v4(), "old");
    old.collected_at = Utc::now() - Duration::days(40);
    let fresh = record(old.source_id, "fresh");
    let window_start = Utc::now() - Duration::days(60);
    store.insert_if_new(old.clone(), window_start).await.unwrap();
    store.insert_if_new(fresh.clone(), window_start).await.unwrap();
    store.put_analysis(analysis(&old, 0.1)).await.unwrap();

    let report = store.purge_before(Utc::now() - Duration::days(30)).await.unwrap();
    assert_eq!(report.records, 1);
    assert_eq!(report.analyses, 1);
    assert!(store.get_record(old.id).await.unwrap().is_none());
    assert!(store.get_record(fresh.id).await.unwrap().is_some());
}
