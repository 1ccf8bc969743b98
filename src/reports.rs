// src/reports.rs
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::alerts::{AlertEvaluator, AlertEvent};
use crate::analyze::trends::Trend;
use crate::analyze::{AnalysisEngine, EntityCount, SentimentSummary};

pub const DEFAULT_WINDOW_HOURS: u32 = 24;
pub const MAX_WINDOW_HOURS: u32 = 24 * 30;
const TOP_ENTITIES: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct SummaryReport {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub window_hours: u32,
    pub source_id: Option<Uuid>,
    pub sentiment: SentimentSummary,
    pub top_entities: Vec<EntityCount>,
    pub trends: Vec<Trend>,
    pub alerts: Vec<AlertEvent>,
}

/// Sentiment, top entities, current trends and alerts for the last
/// `window_hours` (clamped to 1..=720).
pub async fn build_summary(
    engine: &AnalysisEngine,
    alerts: &AlertEvaluator,
    window_hours: u32,
    source_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<SummaryReport> {
    let window_hours = window_hours.clamp(1, MAX_WINDOW_HOURS);
    let since = now - Duration::hours(i64::from(window_hours));

    let sentiment = engine.sentiment_summary(since, source_id).await?;
    let top_entities = engine.top_entities(since, source_id, TOP_ENTITIES).await?;

    Ok(SummaryReport {
        window_start: since,
        window_end: now,
        window_hours,
        source_id,
        sentiment,
        top_entities,
        trends: engine.trends(now),
        alerts: alerts.events_since(since, source_id),
    })
}
