// src/ingest/sqlite.rs
//! SQLite-backed `RecordStore` (enabled by `DATABASE_URL`).
//!
//! Timestamps are stored as unix milliseconds, ids as text, payloads and
//! entity lists as JSON text. All statements run on the single connection
//! thread owned by `tokio_rusqlite`, and multi-statement operations use a
//! transaction.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, types::Value, OptionalExtension, Row};
use tokio_rusqlite::Connection;
use uuid::Uuid;

use super::store::{
    CollectedRecord, InsertOutcome, ProcessingState, PurgeReport, RecordQuery, RecordStore,
    StoreStats,
};
use crate::analyze::types::{AnalysisResult, Sentiment, SentimentLabel, SentimentMethod};

const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS records (
    id           TEXT PRIMARY KEY,
    source_id    TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    external_id  TEXT,
    title        TEXT NOT NULL,
    text         TEXT NOT NULL,
    url          TEXT,
    author       TEXT,
    published_at INTEGER,
    collected_at INTEGER NOT NULL,
    raw          TEXT NOT NULL,
    state        TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_dedup ON records (source_id, content_hash, collected_at);
CREATE INDEX IF NOT EXISTS idx_records_state ON records (state, collected_at);
CREATE INDEX IF NOT EXISTS idx_records_collected ON records (collected_at);

CREATE TABLE IF NOT EXISTS analyses (
    id          TEXT PRIMARY KEY,
    record_id   TEXT NOT NULL REFERENCES records (id) ON DELETE CASCADE,
    source_id   TEXT NOT NULL,
    score       REAL NOT NULL,
    label       TEXT NOT NULL,
    confidence  REAL NOT NULL,
    method      TEXT NOT NULL,
    entities    TEXT NOT NULL,
    trend_tags  TEXT NOT NULL,
    computed_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_analyses_record ON analyses (record_id);
CREATE INDEX IF NOT EXISTS idx_analyses_time ON analyses (computed_at, source_id);
"#;

const RECORD_COLUMNS: &str = "id, source_id, content_hash, external_id, title, text, url, author, \
                              published_at, collected_at, raw, state";
const ANALYSIS_COLUMNS: &str =
    "id, record_id, source_id, score, label, confidence, method, entities, trend_tags, computed_at";

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub async fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .await
            .with_context(|| format!("opening sqlite database {path}"))?;
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .await
            .context("opening in-memory sqlite")?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        let requeued = conn
            .call(|conn| {
                conn.execute_batch(SCHEMA)?;
                // Work claimed by a process that died is handed back out.
                let n = conn.execute(
                    "UPDATE records SET state = 'pending' WHERE state = 'processing'",
                    [],
                )?;
                Ok(n)
            })
            .await
            .context("applying sqlite schema")?;
        if requeued > 0 {
            tracing::info!(requeued, "requeued records left in processing state");
        }
        Ok(Self { conn })
    }
}

fn millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn conversion_err(idx: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn parse_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s).map_err(|e| conversion_err(idx, e))
}

fn parse_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

#[derive(Debug, thiserror::Error)]
#[error("unknown enum value {0:?}")]
struct UnknownValue(String);

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<CollectedRecord> {
    let published: Option<i64> = row.get(8)?;
    let raw: String = row.get(10)?;
    let state: String = row.get(11)?;
    Ok(CollectedRecord {
        id: parse_uuid(row, 0)?,
        source_id: parse_uuid(row, 1)?,
        content_hash: row.get(2)?,
        external_id: row.get(3)?,
        title: row.get(4)?,
        text: row.get(5)?,
        url: row.get(6)?,
        author: row.get(7)?,
        published_at: published.and_then(DateTime::from_timestamp_millis),
        collected_at: parse_time(row, 9)?,
        raw: serde_json::from_str(&raw).map_err(|e| conversion_err(10, e))?,
        state: ProcessingState::parse(&state)
            .ok_or_else(|| conversion_err(11, UnknownValue(state.clone())))?,
    })
}

fn analysis_from_row(row: &Row<'_>) -> rusqlite::Result<AnalysisResult> {
    let label: String = row.get(4)?;
    let method: String = row.get(6)?;
    let entities: String = row.get(7)?;
    let tags: String = row.get(8)?;
    Ok(AnalysisResult {
        id: parse_uuid(row, 0)?,
        record_id: parse_uuid(row, 1)?,
        source_id: parse_uuid(row, 2)?,
        sentiment: Sentiment {
            score: row.get(3)?,
            label: SentimentLabel::parse(&label)
                .ok_or_else(|| conversion_err(4, UnknownValue(label.clone())))?,
            confidence: row.get(5)?,
            method: SentimentMethod::parse(&method)
                .ok_or_else(|| conversion_err(6, UnknownValue(method.clone())))?,
        },
        entities: serde_json::from_str(&entities).map_err(|e| conversion_err(7, e))?,
        trend_tags: serde_json::from_str(&tags).map_err(|e| conversion_err(8, e))?,
        computed_at: parse_time(row, 9)?,
    })
}

fn claim_one(
    tx: &rusqlite::Transaction<'_>,
    id: &str,
) -> rusqlite::Result<Option<CollectedRecord>> {
    let n = tx.execute(
        "UPDATE records SET state = 'processing' WHERE id = ?1 AND state = 'pending'",
        params![id],
    )?;
    if n == 0 {
        return Ok(None);
    }
    tx.query_row(
        &format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?1"),
        params![id],
        record_from_row,
    )
    .optional()
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn insert_if_new(
        &self,
        record: CollectedRecord,
        window_start: DateTime<Utc>,
    ) -> Result<InsertOutcome> {
        let raw = serde_json::to_string(&record.raw)?;
        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let existing: Option<String> = tx
                    .query_row(
                        "SELECT id FROM records
                         WHERE source_id = ?1 AND content_hash = ?2 AND collected_at >= ?3
                         ORDER BY collected_at DESC LIMIT 1",
                        params![
                            record.source_id.to_string(),
                            record.content_hash,
                            millis(window_start)
                        ],
                        |r| r.get(0),
                    )
                    .optional()?;
                if let Some(id) = existing {
                    let id = Uuid::parse_str(&id).map_err(|e| conversion_err(0, e))?;
                    return Ok(InsertOutcome::Duplicate(id));
                }
                tx.execute(
                    &format!(
                        "INSERT INTO records ({RECORD_COLUMNS})
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
                    ),
                    params![
                        record.id.to_string(),
                        record.source_id.to_string(),
                        record.content_hash,
                        record.external_id,
                        record.title,
                        record.text,
                        record.url,
                        record.author,
                        record.published_at.map(millis),
                        millis(record.collected_at),
                        raw,
                        record.state.as_str(),
                    ],
                )?;
                tx.commit()?;
                Ok(InsertOutcome::Inserted(record.id))
            })
            .await?;
        Ok(outcome)
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<CollectedRecord>> {
        let rec = self
            .conn
            .call(move |conn| {
                let r = conn
                    .query_row(
                        &format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?1"),
                        params![id.to_string()],
                        record_from_row,
                    )
                    .optional()?;
                Ok(r)
            })
            .await?;
        Ok(rec)
    }

    async fn list_records(&self, query: RecordQuery) -> Result<Vec<CollectedRecord>> {
        let rows = self
            .conn
            .call(move |conn| {
                let mut sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE 1 = 1");
                let mut args: Vec<Value> = Vec::new();
                if let Some(s) = query.source_id {
                    args.push(Value::Text(s.to_string()));
                    sql.push_str(&format!(" AND source_id = ?{}", args.len()));
                }
                if let Some(st) = query.state {
                    args.push(Value::Text(st.as_str().to_string()));
                    sql.push_str(&format!(" AND state = ?{}", args.len()));
                }
                if let Some(t) = query.since {
                    args.push(Value::Integer(millis(t)));
                    sql.push_str(&format!(" AND collected_at >= ?{}", args.len()));
                }
                args.push(Value::Integer(query.effective_limit() as i64));
                sql.push_str(&format!(
                    " ORDER BY collected_at DESC, id DESC LIMIT ?{}",
                    args.len()
                ));
                args.push(Value::Integer(query.offset.unwrap_or(0) as i64));
                sql.push_str(&format!(" OFFSET ?{}", args.len()));

                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params_from_iter(args), record_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    async fn claim_records(&self, ids: &[Uuid]) -> Result<Vec<CollectedRecord>> {
        let ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();
        let claimed = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut out = Vec::with_capacity(ids.len());
                for id in &ids {
                    if let Some(r) = claim_one(&tx, id)? {
                        out.push(r);
                    }
                }
                tx.commit()?;
                Ok(out)
            })
            .await?;
        Ok(claimed)
    }

    async fn claim_pending(&self, limit: usize) -> Result<Vec<CollectedRecord>> {
        let claimed = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let ids: Vec<String> = {
                    let mut stmt = tx.prepare(
                        "SELECT id FROM records WHERE state = 'pending'
                         ORDER BY collected_at ASC LIMIT ?1",
                    )?;
                    let ids = stmt
                        .query_map(params![limit as i64], |r| r.get(0))?
                        .collect::<std::result::Result<Vec<String>, _>>()?;
                    ids
                };
                let mut out = Vec::with_capacity(ids.len());
                for id in &ids {
                    if let Some(r) = claim_one(&tx, id)? {
                        out.push(r);
                    }
                }
                tx.commit()?;
                Ok(out)
            })
            .await?;
        Ok(claimed)
    }

    async fn set_state(&self, id: Uuid, state: ProcessingState) -> Result<()> {
        let n = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE records SET state = ?2 WHERE id = ?1",
                    params![id.to_string(), state.as_str()],
                )?;
                Ok(n)
            })
            .await?;
        anyhow::ensure!(n == 1, "record {id} not found");
        Ok(())
    }

    async fn put_analysis(&self, a: AnalysisResult) -> Result<()> {
        let entities = serde_json::to_string(&a.entities)?;
        let tags = serde_json::to_string(&a.trend_tags)?;
        let record_id = a.record_id;
        let inserted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let exists: Option<i64> = tx
                    .query_row(
                        "SELECT 1 FROM records WHERE id = ?1",
                        params![a.record_id.to_string()],
                        |r| r.get(0),
                    )
                    .optional()?;
                if exists.is_none() {
                    return Ok(false);
                }
                tx.execute(
                    &format!(
                        "INSERT INTO analyses ({ANALYSIS_COLUMNS})
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                    ),
                    params![
                        a.id.to_string(),
                        a.record_id.to_string(),
                        a.source_id.to_string(),
                        a.sentiment.score,
                        a.sentiment.label.as_str(),
                        a.sentiment.confidence,
                        a.sentiment.method.as_str(),
                        entities,
                        tags,
                        millis(a.computed_at),
                    ],
                )?;
                tx.commit()?;
                Ok(true)
            })
            .await?;
        anyhow::ensure!(inserted, "cannot store analysis for unknown record {record_id}");
        Ok(())
    }

    async fn analyses_for(&self, record_id: Uuid) -> Result<Vec<AnalysisResult>> {
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ANALYSIS_COLUMNS} FROM analyses WHERE record_id = ?1
                     ORDER BY computed_at ASC"
                ))?;
                let rows = stmt
                    .query_map(params![record_id.to_string()], analysis_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    async fn analyses_since(
        &self,
        since: DateTime<Utc>,
        source_id: Option<Uuid>,
    ) -> Result<Vec<AnalysisResult>> {
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ANALYSIS_COLUMNS} FROM analyses
                     WHERE computed_at >= ?1 AND (?2 IS NULL OR source_id = ?2)
                     ORDER BY computed_at ASC"
                ))?;
                let rows = stmt
                    .query_map(
                        params![millis(since), source_id.map(|s| s.to_string())],
                        analysis_from_row,
                    )?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<PurgeReport> {
        let report = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let analyses = tx.execute(
                    "DELETE FROM analyses WHERE record_id IN
                     (SELECT id FROM records WHERE collected_at < ?1)",
                    params![millis(cutoff)],
                )?;
                let records = tx.execute(
                    "DELETE FROM records WHERE collected_at < ?1",
                    params![millis(cutoff)],
                )?;
                tx.commit()?;
                Ok(PurgeReport { records, analyses })
            })
            .await?;
        Ok(report)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let stats = self
            .conn
            .call(|conn| {
                let mut s = StoreStats::default();
                let mut stmt = conn.prepare("SELECT state, COUNT(*) FROM records GROUP BY state")?;
                let mut rows = stmt.query([])?;
                while let Some(row) = rows.next()? {
                    let state: String = row.get(0)?;
                    let n: i64 = row.get(1)?;
                    let n = usize::try_from(n).unwrap_or(0);
                    s.records += n;
                    match ProcessingState::parse(&state) {
                        Some(ProcessingState::Pending) => s.pending = n,
                        Some(ProcessingState::Processing) => s.processing = n,
                        Some(ProcessingState::Analyzed) => s.analyzed = n,
                        Some(ProcessingState::Failed) => s.failed = n,
                        None => {}
                    }
                }
                let analyses: i64 =
                    conn.query_row("SELECT COUNT(*) FROM analyses", [], |r| r.get(0))?;
                s.analyses = usize::try_from(analyses).unwrap_or(0);
                Ok(s)
            })
            .await?;
        Ok(stats)
    }
}
