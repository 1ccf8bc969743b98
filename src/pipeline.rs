// src/pipeline.rs
//! One collection job end to end:
//! collect -> ingest -> analyse inserted ids -> evaluate alerts -> notify.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::alerts::AlertEvaluator;
use crate::analyze::{AnalysisEngine, AnalysisReport};
use crate::collect::CollectorSet;
use crate::ingest::{IngestReport, Ingestor};
use crate::notify::NotifierMux;
use crate::registry::DataSource;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_runs_total", "Collection jobs, by kind and outcome.");
    });
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub source_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub ingest: IngestReport,
    pub analysis: AnalysisReport,
    pub alerts_fired: usize,
    pub notifications_sent: usize,
}

#[derive(Clone)]
pub struct Pipeline {
    collectors: Arc<CollectorSet>,
    ingestor: Ingestor,
    engine: Arc<AnalysisEngine>,
    alerts: Arc<AlertEvaluator>,
    notifier: NotifierMux,
}

impl Pipeline {
    pub fn new(
        collectors: Arc<CollectorSet>,
        ingestor: Ingestor,
        engine: Arc<AnalysisEngine>,
        alerts: Arc<AlertEvaluator>,
        notifier: NotifierMux,
    ) -> Self {
        Self {
            collectors,
            ingestor,
            engine,
            alerts,
            notifier,
        }
    }

    pub fn engine(&self) -> &Arc<AnalysisEngine> {
        &self.engine
    }

    pub fn alerts(&self) -> &Arc<AlertEvaluator> {
        &self.alerts
    }

    pub async fn run_source(&self, source: &DataSource) -> Result<RunReport> {
        ensure_metrics_described();
        let kind = source.kind.as_str();
        match self.run_inner(source).await {
            Ok(r) => {
                counter!("pipeline_runs_total", "kind" => kind, "outcome" => "ok").increment(1);
                Ok(r)
            }
            Err(e) => {
                counter!("pipeline_runs_total", "kind" => kind, "outcome" => "error").increment(1);
                Err(e)
            }
        }
    }

    async fn run_inner(&self, source: &DataSource) -> Result<RunReport> {
        let started_at = Utc::now();
        let items = self
            .collectors
            .collect(source)
            .await
            .with_context(|| format!("collecting {} source {}", source.kind.as_str(), source.id))?;

        let ingest = self
            .ingestor
            .ingest(source, items, Utc::now())
            .await
            .context("ingesting collected items")?;

        // Records stay pending on failure and are picked up by the sweep.
        let analysis = match self
            .engine
            .process_records(&ingest.inserted_ids, Utc::now())
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(source_id = %source.id, error = %e, "analysis step failed");
                AnalysisReport::default()
            }
        };

        let (alerts_fired, notifications_sent) = self.evaluate_and_notify(Utc::now()).await;

        let report = RunReport {
            source_id: source.id,
            started_at,
            finished_at: Utc::now(),
            ingest,
            analysis,
            alerts_fired,
            notifications_sent,
        };
        tracing::info!(
            source_id = %source.id,
            kind = source.kind.as_str(),
            inserted = report.ingest.inserted,
            duplicates = report.ingest.duplicates,
            analyzed = report.analysis.analyzed,
            alerts = alerts_fired,
            "pipeline run complete"
        );
        Ok(report)
    }

    /// Evaluate alert rules and dispatch whatever fired. Errors are logged.
    pub async fn evaluate_and_notify(&self, now: DateTime<Utc>) -> (usize, usize) {
        let events = match self.alerts.evaluate(now).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "alert evaluation failed");
                return (0, 0);
            }
        };
        let sent = self.notifier.notify_all(&events).await;
        (events.len(), sent)
    }
}
