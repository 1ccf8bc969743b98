// src/ingest/store.rs
//! Record storage. `insert_if_new` is the only write path for records and
//! performs the dedup check and the insert as one step.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::analyze::types::AnalysisResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
    Pending,
    Processing,
    Analyzed,
    Failed,
}

impl ProcessingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingState::Pending => "pending",
            ProcessingState::Processing => "processing",
            ProcessingState::Analyzed => "analyzed",
            ProcessingState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ProcessingState::Pending),
            "processing" => Some(ProcessingState::Processing),
            "analyzed" => Some(ProcessingState::Analyzed),
            "failed" => Some(ProcessingState::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectedRecord {
    pub id: Uuid,
    pub source_id: Uuid,
    pub content_hash: String,
    pub external_id: Option<String>,
    pub title: String,
    pub text: String,
    pub url: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub collected_at: DateTime<Utc>,
    pub raw: serde_json::Value,
    pub state: ProcessingState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(Uuid),
    Duplicate(Uuid),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordQuery {
    pub source_id: Option<Uuid>,
    pub state: Option<ProcessingState>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl RecordQuery {
    pub const DEFAULT_LIMIT: usize = 50;
    pub const MAX_LIMIT: usize = 500;

    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    fn matches(&self, r: &CollectedRecord) -> bool {
        self.source_id.is_none_or(|s| r.source_id == s)
            && self.state.is_none_or(|s| r.state == s)
            && self.since.is_none_or(|t| r.collected_at >= t)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub records: usize,
    pub analyses: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub records: usize,
    pub pending: usize,
    pub processing: usize,
    pub analyzed: usize,
    pub failed: usize,
    pub analyses: usize,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert unless a record with the same `(source_id, content_hash)` was
    /// collected at or after `window_start`.
    async fn insert_if_new(
        &self,
        record: CollectedRecord,
        window_start: DateTime<Utc>,
    ) -> Result<InsertOutcome>;

    async fn get_record(&self, id: Uuid) -> Result<Option<CollectedRecord>>;

    /// Newest first.
    async fn list_records(&self, query: RecordQuery) -> Result<Vec<CollectedRecord>>;

    /// Move the given records from `pending` to `processing`. Returns only
    /// the records this caller won.
    async fn claim_records(&self, ids: &[Uuid]) -> Result<Vec<CollectedRecord>>;

    /// Claim up to `limit` of the oldest pending records.
    async fn claim_pending(&self, limit: usize) -> Result<Vec<CollectedRecord>>;

    async fn set_state(&self, id: Uuid, state: ProcessingState) -> Result<()>;

    /// Fails when `analysis.record_id` is unknown.
    async fn put_analysis(&self, analysis: AnalysisResult) -> Result<()>;

    async fn analyses_for(&self, record_id: Uuid) -> Result<Vec<AnalysisResult>>;

    /// Analyses computed at or after `since`, oldest first.
    async fn analyses_since(
        &self,
        since: DateTime<Utc>,
        source_id: Option<Uuid>,
    ) -> Result<Vec<AnalysisResult>>;

    /// Delete records collected before `cutoff` along with their analyses.
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<PurgeReport>;

    async fn stats(&self) -> Result<StoreStats>;
}

#[derive(Default)]
struct Inner {
    records: HashMap<Uuid, CollectedRecord>,
    /// Latest record id per (source, hash).
    by_hash: HashMap<(Uuid, String), Uuid>,
    analyses: Vec<AnalysisResult>,
}

/// In-process store; the default when no `DATABASE_URL` is configured.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn claim(inner: &mut Inner, id: &Uuid) -> Option<CollectedRecord> {
    let r = inner.records.get_mut(id)?;
    if r.state != ProcessingState::Pending {
        return None;
    }
    r.state = ProcessingState::Processing;
    Some(r.clone())
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert_if_new(
        &self,
        record: CollectedRecord,
        window_start: DateTime<Utc>,
    ) -> Result<InsertOutcome> {
        let mut inner = self.lock();
        let key = (record.source_id, record.content_hash.clone());
        if let Some(existing) = inner.by_hash.get(&key).and_then(|id| inner.records.get(id)) {
            if existing.collected_at >= window_start {
                return Ok(InsertOutcome::Duplicate(existing.id));
            }
        }
        let id = record.id;
        inner.by_hash.insert(key, id);
        inner.records.insert(id, record);
        Ok(InsertOutcome::Inserted(id))
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<CollectedRecord>> {
        Ok(self.lock().records.get(&id).cloned())
    }

    async fn list_records(&self, query: RecordQuery) -> Result<Vec<CollectedRecord>> {
        let inner = self.lock();
        let mut v: Vec<&CollectedRecord> =
            inner.records.values().filter(|r| query.matches(r)).collect();
        v.sort_by(|a, b| b.collected_at.cmp(&a.collected_at).then(b.id.cmp(&a.id)));
        Ok(v.into_iter()
            .skip(query.offset.unwrap_or(0))
            .take(query.effective_limit())
            .cloned()
            .collect())
    }

    async fn claim_records(&self, ids: &[Uuid]) -> Result<Vec<CollectedRecord>> {
        let mut inner = self.lock();
        Ok(ids.iter().filter_map(|id| claim(&mut inner, id)).collect())
    }

    async fn claim_pending(&self, limit: usize) -> Result<Vec<CollectedRecord>> {
        let mut inner = self.lock();
        let mut pending: Vec<(DateTime<Utc>, Uuid)> = inner
            .records
            .values()
            .filter(|r| r.state == ProcessingState::Pending)
            .map(|r| (r.collected_at, r.id))
            .collect();
        pending.sort();
        Ok(pending
            .into_iter()
            .take(limit)
            .filter_map(|(_, id)| claim(&mut inner, &id))
            .collect())
    }

    async fn set_state(&self, id: Uuid, state: ProcessingState) -> Result<()> {
        let mut inner = self.lock();
        match inner.records.get_mut(&id) {
            Some(r) => {
                r.state = state;
                Ok(())
            }
            None => bail!("record {id} not found"),
        }
    }

    async fn put_analysis(&self, analysis: AnalysisResult) -> Result<()> {
        let mut inner = self.lock();
        if !inner.records.contains_key(&analysis.record_id) {
            bail!("cannot store analysis for unknown record {}", analysis.record_id);
        }
        inner.analyses.push(analysis);
        Ok(())
    }

    async fn analyses_for(&self, record_id: Uuid) -> Result<Vec<AnalysisResult>> {
        Ok(self
            .lock()
            .analyses
            .iter()
            .filter(|a| a.record_id == record_id)
            .cloned()
            .collect())
    }

    async fn analyses_since(
        &self,
        since: DateTime<Utc>,
        source_id: Option<Uuid>,
    ) -> Result<Vec<AnalysisResult>> {
        let inner = self.lock();
        let mut v: Vec<AnalysisResult> = inner
            .analyses
            .iter()
            .filter(|a| a.computed_at >= since && source_id.is_none_or(|s| a.source_id == s))
            .cloned()
            .collect();
        v.sort_by_key(|a| a.computed_at);
        Ok(v)
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<PurgeReport> {
        let mut inner = self.lock();
        let doomed: Vec<Uuid> = inner
            .records
            .values()
            .filter(|r| r.collected_at < cutoff)
            .map(|r| r.id)
            .collect();
        for id in &doomed {
            if let Some(r) = inner.records.remove(id) {
                let key = (r.source_id, r.content_hash);
                if inner.by_hash.get(&key) == Some(id) {
                    inner.by_hash.remove(&key);
                }
            }
        }
        let before = inner.analyses.len();
        let Inner { records, analyses, .. } = &mut *inner;
        analyses.retain(|a| records.contains_key(&a.record_id));
        Ok(PurgeReport {
            records: doomed.len(),
            analyses: before - analyses.len(),
        })
    }

    async fn stats(&self) -> Result<StoreStats> {
        let inner = self.lock();
        let mut s = StoreStats {
            records: inner.records.len(),
            analyses: inner.analyses.len(),
            ..Default::default()
        };
        for r in inner.records.values() {
            match r.state {
                ProcessingState::Pending => s.pending += 1,
                ProcessingState::Processing => s.processing += 1,
                ProcessingState::Analyzed => s.analyzed += 1,
                ProcessingState::Failed => s.failed += 1,
            }
        }
        Ok(s)
    }
}
