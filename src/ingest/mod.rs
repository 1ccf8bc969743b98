// src/ingest/mod.rs
pub mod fingerprint;
pub mod sqlite;
pub mod store;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use metrics::{counter, describe_counter, gauge, describe_gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::collect::{normalize_text, RawItem};
use crate::registry::DataSource;
pub use fingerprint::fingerprint;
pub use store::{CollectedRecord, InsertOutcome, MemoryStore, ProcessingState, RecordQuery, RecordStore};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_fetched_total", "Raw items handed to ingestion.");
        describe_counter!("ingest_inserted_total", "New records stored.");
        describe_counter!(
            "ingest_duplicates_total",
            "Items dropped because the content hash was seen inside the dedup window."
        );
        describe_counter!("ingest_filtered_total", "Items dropped as empty after normalization.");
        describe_gauge!("ingest_last_run_ts", "Unix ts of the last ingestion.");
    });
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub fetched: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub filtered: usize,
    pub inserted_ids: Vec<Uuid>,
}

#[derive(Clone)]
pub struct Ingestor {
    store: Arc<dyn RecordStore>,
    dedup_window: Duration,
}

impl Ingestor {
    pub fn new(store: Arc<dyn RecordStore>, dedup_window_secs: u64) -> Self {
        Self {
            store,
            dedup_window: i64::try_from(dedup_window_secs)
                .ok()
                .and_then(Duration::try_seconds)
                .unwrap_or(Duration::MAX),
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Normalize, fingerprint and store a batch. Duplicates inside the batch
    /// and against earlier batches are both caught by the store.
    pub async fn ingest(
        &self,
        source: &DataSource,
        items: Vec<RawItem>,
        now: DateTime<Utc>,
    ) -> Result<IngestReport> {
        ensure_metrics_described();
        let window_start = now
            .checked_sub_signed(self.dedup_window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut report = IngestReport {
            fetched: items.len(),
            ..Default::default()
        };

        for item in items {
            let Some(record) = to_record(source.id, item, now) else {
                report.filtered += 1;
                continue;
            };
            match self.store.insert_if_new(record, window_start).await? {
                InsertOutcome::Inserted(id) => {
                    report.inserted += 1;
                    report.inserted_ids.push(id);
                }
                InsertOutcome::Duplicate(_) => report.duplicates += 1,
            }
        }

        counter!("ingest_fetched_total").increment(report.fetched as u64);
        counter!("ingest_inserted_total").increment(report.inserted as u64);
        counter!("ingest_duplicates_total").increment(report.duplicates as u64);
        counter!("ingest_filtered_total").increment(report.filtered as u64);
        gauge!("ingest_last_run_ts").set(now.timestamp() as f64);

        tracing::info!(
            source_id = %source.id,
            kind = source.kind.as_str(),
            fetched = report.fetched,
            inserted = report.inserted,
            duplicates = report.duplicates,
            filtered = report.filtered,
            "ingest done"
        );
        Ok(report)
    }
}

/// Returns `None` when nothing is left after normalization.
fn to_record(source_id: Uuid, item: RawItem, now: DateTime<Utc>) -> Option<CollectedRecord> {
    let title = normalize_text(&item.title);
    let text = normalize_text(&item.text);
    if title.is_empty() && text.is_empty() {
        return None;
    }
    Some(CollectedRecord {
        id: Uuid::new_v4(),
        source_id,
        content_hash: fingerprint(&title, &text),
        external_id: item.external_id,
        title,
        text,
        url: item.url,
        author: item.author,
        published_at: item.published_at,
        collected_at: now,
        raw: item.raw,
        state: ProcessingState::Pending,
    })
}
