// src/alerts/evaluator.rs
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use uuid::Uuid;

use super::rules::{AlertMetric, AlertRule, Comparator, NewAlertRule, Priority, RuleError, RulesFile};
use crate::analyze::{latest_per_record, AnalysisResult, SentimentLabel};
use crate::config::files;
use crate::ingest::store::RecordStore;

pub const DEFAULT_HISTORY_CAP: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub rule_name: String,
    pub metric: String,
    pub comparator: Comparator,
    pub observed: f64,
    pub threshold: f64,
    pub samples: usize,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub source_id: Option<Uuid>,
    pub priority: Priority,
    pub triggered_at: DateTime<Utc>,
    pub is_read: bool,
}

/// Capped in-memory event log, oldest dropped first.
#[derive(Debug)]
struct AlertHistory {
    inner: Mutex<VecDeque<AlertEvent>>,
    cap: usize,
}

impl AlertHistory {
    fn with_capacity(cap: usize) -> Self {
        let cap = cap.clamp(1, 100_000);
        Self {
            inner: Mutex::new(VecDeque::with_capacity(cap.min(1024))),
            cap,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<AlertEvent>> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

pub struct AlertEvaluator {
    store: Arc<dyn RecordStore>,
    rules: RwLock<HashMap<Uuid, AlertRule>>,
    /// Last bucket each rule fired in.
    ledger: Mutex<HashMap<Uuid, i64>>,
    history: AlertHistory,
}

/// Observed value and sample count for one rule over a window.
pub fn compute_metric(metric: &AlertMetric, analyses: &[AnalysisResult]) -> (f64, usize) {
    let n = analyses.len();
    let value = match metric {
        AlertMetric::AvgSentiment => {
            if n == 0 {
                0.0
            } else {
                analyses.iter().map(|a| a.sentiment.score).sum::<f64>() / n as f64
            }
        }
        AlertMetric::NegativeShare => {
            if n == 0 {
                0.0
            } else {
                let neg = analyses
                    .iter()
                    .filter(|a| a.sentiment.label == SentimentLabel::Negative)
                    .count();
                neg as f64 / n as f64
            }
        }
        AlertMetric::RecordVolume => n as f64,
        AlertMetric::Mentions { term } => analyses
            .iter()
            .filter(|a| a.entities.iter().any(|e| e.value.eq_ignore_ascii_case(term)))
            .count() as f64,
    };
    (value, n)
}

fn bucket_of(now: DateTime<Utc>, window_secs: u64) -> i64 {
    let w = i64::try_from(window_secs.max(1)).unwrap_or(i64::MAX);
    now.timestamp().div_euclid(w)
}

impl AlertEvaluator {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self::with_history_cap(store, DEFAULT_HISTORY_CAP)
    }

    pub fn with_history_cap(store: Arc<dyn RecordStore>, cap: usize) -> Self {
        Self {
            store,
            rules: RwLock::new(HashMap::new()),
            ledger: Mutex::new(HashMap::new()),
            history: AlertHistory::with_capacity(cap),
        }
    }

    // ---- rules ----

    pub fn create_rule(&self, new: NewAlertRule, now: DateTime<Utc>) -> Result<AlertRule, RuleError> {
        let rule = new.into_rule(now)?;
        self.rules
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(rule.id, rule.clone());
        tracing::info!(rule_id = %rule.id, metric = %rule.metric.label(), "alert rule created");
        Ok(rule)
    }

    pub fn list_rules(&self) -> Vec<AlertRule> {
        let mut v: Vec<AlertRule> = self
            .rules
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect();
        v.sort_by(|a, b| a.name.cmp(&b.name).then(a.created_at.cmp(&b.created_at)));
        v
    }

    pub fn get_rule(&self, id: Uuid) -> Option<AlertRule> {
        self.rules
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&id)
            .cloned()
    }

    pub fn delete_rule(&self, id: Uuid) -> Result<AlertRule, RuleError> {
        let removed = self
            .rules
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&id)
            .ok_or(RuleError::NotFound(id))?;
        self.ledger.lock().unwrap_or_else(|p| p.into_inner()).remove(&id);
        Ok(removed)
    }

    /// Load `[[rules]]` from TOML or a JSON array. Invalid rules are skipped.
    pub fn seed_from_path(&self, path: Option<&Path>, now: DateTime<Utc>) -> Result<usize> {
        let Some(file) = files::load_optional::<RulesFile>(path, "alert_rules")
            .context("loading alert rules")?
        else {
            return Ok(0);
        };
        let mut created = 0;
        for def in file.into_rules() {
            let name = def.name.clone();
            match self.create_rule(def, now) {
                Ok(_) => created += 1,
                Err(e) => tracing::warn!(%name, error = %e, "skipping invalid alert rule"),
            }
        }
        Ok(created)
    }

    // ---- evaluation ----

    /// Evaluate every enabled rule over `[now - window, now)`. A rule fires
    /// at most once per window bucket, however often this runs.
    pub async fn evaluate(&self, now: DateTime<Utc>) -> Result<Vec<AlertEvent>> {
        let rules: Vec<AlertRule> = self.list_rules().into_iter().filter(|r| r.enabled).collect();
        let mut fired = Vec::new();

        for rule in rules {
            let Some(start) = i64::try_from(rule.window_secs)
                .ok()
                .and_then(Duration::try_seconds)
                .and_then(|w| now.checked_sub_signed(w))
            else {
                tracing::warn!(rule_id = %rule.id, window_secs = rule.window_secs, "alert window out of range, skipping rule");
                continue;
            };
            let analyses: Vec<AnalysisResult> = self
                .store
                .analyses_since(start, rule.source_id)
                .await?
                .into_iter()
                .filter(|a| a.computed_at < now)
                .collect();
            let analyses = latest_per_record(analyses);

            let (observed, samples) = compute_metric(&rule.metric, &analyses);
            if samples < rule.min_samples || !rule.comparator.holds(observed, rule.threshold) {
                continue;
            }

            let bucket = bucket_of(now, rule.window_secs);
            let event = {
                let mut ledger = self.ledger.lock().unwrap_or_else(|p| p.into_inner());
                if ledger.get(&rule.id).is_some_and(|&b| b >= bucket) {
                    continue;
                }
                // A rule deleted while we computed must not fire.
                if self.get_rule(rule.id).is_none() {
                    continue;
                }
                ledger.insert(rule.id, bucket);
                let event = AlertEvent {
                    id: Uuid::new_v4(),
                    rule_id: rule.id,
                    rule_name: rule.name.clone(),
                    metric: rule.metric.label(),
                    comparator: rule.comparator,
                    observed,
                    threshold: rule.threshold,
                    samples,
                    window_start: start,
                    window_end: now,
                    source_id: rule.source_id,
                    priority: rule.priority,
                    triggered_at: now,
                    is_read: false,
                };
                self.push_event(event.clone());
                event
            };

            counter!("alerts_fired_total").increment(1);
            tracing::info!(
                rule_id = %rule.id,
                metric = %event.metric,
                observed,
                threshold = rule.threshold,
                samples,
                "alert fired"
            );
            fired.push(event);
        }
        Ok(fired)
    }

    fn push_event(&self, event: AlertEvent) {
        let mut h = self.history.lock();
        h.push_back(event);
        while h.len() > self.history.cap {
            h.pop_front();
        }
    }

    // ---- events ----

    /// Newest first.
    pub fn list_events(&self, limit: usize, unread_only: bool) -> Vec<AlertEvent> {
        self.history
            .lock()
            .iter()
            .rev()
            .filter(|e| !unread_only || !e.is_read)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Events triggered at or after `since`, newest first.
    pub fn events_since(&self, since: DateTime<Utc>, source_id: Option<Uuid>) -> Vec<AlertEvent> {
        self.history
            .lock()
            .iter()
            .rev()
            .filter(|e| e.triggered_at >= since)
            .filter(|e| source_id.is_none() || e.source_id == source_id)
            .cloned()
            .collect()
    }

    /// Returns the updated event, or `None` for an unknown id.
    pub fn mark_read(&self, id: Uuid) -> Option<AlertEvent> {
        let mut h = self.history.lock();
        let ev = h.iter_mut().find(|e| e.id == id)?;
        ev.is_read = true;
        Some(ev.clone())
    }
}
