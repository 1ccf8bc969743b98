// tests/ingest_dedup.rs
use chrono::{Duration, Utc};
use osint_pipeline::collect::RawItem;
use osint_pipeline::ingest::{Ingestor, MemoryStore, RecordStore};
use osint_pipeline::registry::{NewSource, SourceKind, SourceRegistry};
use std::sync::Arc;

fn registry_with_source() -> (SourceRegistry, osint_pipeline::registry::DataSource) {
    let reg = SourceRegistry::new();
    let src = reg
        .create(
            NewSource {
                name: "newsroom".into(),
                kind: SourceKind::News,
                cadence_secs: 600,
                credentials_ref: Some("NEWS_API_KEY".into()),
                query: vec!["acme".into()],
                endpoint: None,
            },
            Utc::now(),
        )
        .unwrap();
    (reg, src)
}

#[tokio::test]
async fn repeated_content_in_window_is_ignored() {
    let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
    let ing = Ingestor::new(store.clone(), 600);
    let (_reg, src) = registry_with_source();
    let now = Utc::now();

    let mut a = RawItem::new("Acme recalls device", "Faulty batteries reported");
    a.url = Some("https://a.example/1".into());
    // Same story, different URL and casing.
    let mut b = RawItem::new("ACME recalls  device", "faulty batteries reported");
    b.url = Some("https://b.example/2".into());

    let first = ing.ingest(&src, vec![a.clone()], now).await.unwrap();
    assert_eq!(first.inserted, 1);
    let second = ing.ingest(&src, vec![b], now + Duration::seconds(60)).await.unwrap();
    assert_eq!(second.duplicates, 1);
    assert_eq!(second.inserted, 0);

    // Outside the window the same content is new again.
    let later = ing.ingest(&src, vec![a], now + Duration::seconds(601)).await.unwrap();
    assert_eq!(later.inserted, 1);
    assert_eq!(store.stats().await.unwrap().records, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_batches_insert_each_story_once() {
    let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
    let ing = Ingestor::new(store.clone(), 3600);
    let (_reg, src) = registry_with_source();
    let now = Utc::now();
    let batch: Vec<RawItem> = (0..5)
        .map(|i| RawItem::new(format!("Story {i}"), "shared body"))
        .collect();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let ing = ing.clone();
        let src = src.clone();
        let batch = batch.clone();
        handles.push(tokio::spawn(async move { ing.ingest(&src, batch, now).await.unwrap() }));
    }
    let mut inserted = 0;
    let mut duplicates = 0;
    for h in handles {
        let r = h.await.unwrap();
        inserted += r.inserted;
        duplicates += r.duplicates;
    }
    assert_eq!(inserted, 5);
    assert_eq!(duplicates, 35);
    assert_eq!(store.stats().await.unwrap().records, 5);
}
