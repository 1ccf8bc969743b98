// src/analyze/mod.rs
//! Analysis engine: sentiment, entities and trend tags for collected records.

pub mod ai;
pub mod entities;
pub mod sentiment;
pub mod trends;
pub mod types;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::ingest::store::{CollectedRecord, ProcessingState, RecordStore};
use entities::{trend_terms, TopicMatcher};
use sentiment::SentimentModel;
use trends::{Trend, TrendTracker};
pub use types::{AnalysisResult, Entity, Sentiment, SentimentLabel, SentimentMethod};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("analysis_records_total", "Records analysed, by outcome.");
        describe_counter!("analysis_ai_calls_total", "Remote sentiment calls, by outcome.");
    });
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AnalysisReport {
    pub claimed: usize,
    pub analyzed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SentimentDistribution {
    pub positive: usize,
    pub neutral: usize,
    pub negative: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SentimentSummary {
    pub average: f64,
    pub total: usize,
    pub distribution: SentimentDistribution,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityCount {
    pub kind: String,
    pub value: String,
    pub count: usize,
}

pub struct AnalysisEngine {
    store: Arc<dyn RecordStore>,
    sentiment: Arc<dyn SentimentModel>,
    topics: Arc<TopicMatcher>,
    trends: Arc<TrendTracker>,
}

impl AnalysisEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        sentiment: Arc<dyn SentimentModel>,
        topics: Arc<TopicMatcher>,
        trends: Arc<TrendTracker>,
    ) -> Self {
        Self {
            store,
            sentiment,
            topics,
            trends,
        }
    }

    /// Rebuild trend buckets from the last day of stored analyses.
    pub async fn warm_up(&self, now: DateTime<Utc>) -> Result<usize> {
        let recent = self.store.analyses_since(now - Duration::hours(24), None).await?;
        for a in &recent {
            self.trends.observe(&trend_terms(&a.entities), a.computed_at);
        }
        Ok(recent.len())
    }

    /// Analyse the given records, skipping any another worker already holds.
    pub async fn process_records(&self, ids: &[Uuid], now: DateTime<Utc>) -> Result<AnalysisReport> {
        if ids.is_empty() {
            return Ok(AnalysisReport::default());
        }
        let claimed = self.store.claim_records(ids).await?;
        self.process_claimed(claimed, now).await
    }

    /// Pick up records left pending (crashed jobs, manual runs).
    pub async fn process_pending(&self, limit: usize, now: DateTime<Utc>) -> Result<AnalysisReport> {
        let claimed = self.store.claim_pending(limit).await?;
        self.process_claimed(claimed, now).await
    }

    async fn process_claimed(
        &self,
        claimed: Vec<CollectedRecord>,
        now: DateTime<Utc>,
    ) -> Result<AnalysisReport> {
        ensure_metrics_described();
        let mut report = AnalysisReport {
            claimed: claimed.len(),
            ..Default::default()
        };

        for rec in claimed {
            let analysis = self.analyze_record(&rec, now).await;
            let stored = self.store.put_analysis(analysis).await;
            let state = match &stored {
                Ok(()) => {
                    report.analyzed += 1;
                    ProcessingState::Analyzed
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(record_id = %rec.id, error = %e, "storing analysis failed");
                    ProcessingState::Failed
                }
            };
            if let Err(e) = self.store.set_state(rec.id, state).await {
                tracing::warn!(record_id = %rec.id, error = %e, "updating record state failed");
            }
        }

        counter!("analysis_records_total", "outcome" => "analyzed").increment(report.analyzed as u64);
        counter!("analysis_records_total", "outcome" => "failed").increment(report.failed as u64);
        if report.claimed > 0 {
            tracing::info!(
                claimed = report.claimed,
                analyzed = report.analyzed,
                failed = report.failed,
                "analysis batch done"
            );
        }
        Ok(report)
    }

    /// Analyse one record. Also feeds its terms to the trend tracker.
    pub async fn analyze_record(&self, rec: &CollectedRecord, now: DateTime<Utc>) -> AnalysisResult {
        let text = if rec.title.is_empty() {
            rec.text.clone()
        } else if rec.text.is_empty() {
            rec.title.clone()
        } else {
            format!("{}. {}", rec.title, rec.text)
        };

        let sentiment = self.sentiment.analyze(&text).await;
        let entities = self.topics.extract(&text);
        let terms = trend_terms(&entities);
        self.trends.observe(&terms, now);
        let trending = self.trends.trending(now);
        let trend_tags = terms
            .into_iter()
            .filter(|t| trending.iter().any(|tr| &tr.term == t))
            .collect();

        AnalysisResult {
            id: Uuid::new_v4(),
            record_id: rec.id,
            source_id: rec.source_id,
            sentiment,
            entities,
            trend_tags,
            computed_at: now,
        }
    }

    /// Average polarity and label distribution over analyses since `since`.
    /// Re-analysed records count once, using their latest analysis.
    pub async fn sentiment_summary(
        &self,
        since: DateTime<Utc>,
        source_id: Option<Uuid>,
    ) -> Result<SentimentSummary> {
        let analyses = self.store.analyses_since(since, source_id).await?;
        Ok(summarize(&latest_per_record(analyses)))
    }

    pub fn trends(&self, now: DateTime<Utc>) -> Vec<Trend> {
        self.trends.trending(now)
    }

    /// Most frequent entities since `since`, ties broken by kind/value.
    pub async fn top_entities(
        &self,
        since: DateTime<Utc>,
        source_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<EntityCount>> {
        let analyses = latest_per_record(self.store.analyses_since(since, source_id).await?);
        let mut counts: HashMap<(String, String), usize> = HashMap::new();
        for a in &analyses {
            for e in &a.entities {
                *counts.entry((e.kind.clone(), e.value.clone())).or_insert(0) += 1;
            }
        }
        let mut v: Vec<EntityCount> = counts
            .into_iter()
            .map(|((kind, value), count)| EntityCount { kind, value, count })
            .collect();
        v.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then(a.kind.cmp(&b.kind))
                .then(a.value.cmp(&b.value))
        });
        v.truncate(limit);
        Ok(v)
    }
}

/// Keep the newest analysis per record; input order is oldest first.
pub fn latest_per_record(analyses: Vec<AnalysisResult>) -> Vec<AnalysisResult> {
    let mut by_record: HashMap<Uuid, AnalysisResult> = HashMap::new();
    for a in analyses {
        match by_record.get(&a.record_id) {
            Some(prev) if prev.computed_at > a.computed_at => {}
            _ => {
                by_record.insert(a.record_id, a);
            }
        }
    }
    let mut v: Vec<AnalysisResult> = by_record.into_values().collect();
    v.sort_by_key(|a| (a.computed_at, a.id));
    v
}

pub fn summarize(analyses: &[AnalysisResult]) -> SentimentSummary {
    let mut dist = SentimentDistribution::default();
    let mut sum = 0.0;
    for a in analyses {
        sum += a.sentiment.score;
        match a.sentiment.label {
            SentimentLabel::Positive => dist.positive += 1,
            SentimentLabel::Neutral => dist.neutral += 1,
            SentimentLabel::Negative => dist.negative += 1,
        }
    }
    let total = analyses.len();
    SentimentSummary {
        average: if total == 0 { 0.0 } else { sum / total as f64 },
        total,
        distribution: dist,
    }
}
