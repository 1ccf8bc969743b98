// src/scheduler/mod.rs
//! Periodic driver: picks due sources from the registry and runs one pipeline
//! job per source, bounded by a semaphore.

pub mod backoff;

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::settings::SchedulerSettings;
use crate::ingest::store::{PurgeReport, RecordStore};
use crate::pipeline::{Pipeline, RunReport};
use crate::registry::{DataSource, SourceRegistry};
pub use backoff::BackoffPolicy;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_gauge!("scheduler_in_flight", "Collection jobs currently running.");
        describe_counter!("scheduler_jobs_total", "Collection jobs started by the scheduler.");
        describe_counter!("retention_purged_total", "Rows removed by the retention sweep.");
        describe_gauge!("scheduler_last_tick_ts", "Unix ts of the last scheduler tick.");
    });
}

#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("data source {0} not found")]
    NotFound(Uuid),
    #[error("data source {0} already has a collection job in flight")]
    AlreadyRunning(Uuid),
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Removes the source from the in-flight set when the job ends, even on panic.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<Uuid>>>,
    id: Uuid,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut set = self.set.lock().unwrap_or_else(|p| p.into_inner());
        set.remove(&self.id);
        gauge!("scheduler_in_flight").set(set.len() as f64);
    }
}

#[derive(Clone)]
pub struct Scheduler {
    registry: Arc<SourceRegistry>,
    pipeline: Pipeline,
    backoff: BackoffPolicy,
    permits: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
    tick: Duration,
    sweep_limit: usize,
}

impl Scheduler {
    pub fn new(registry: Arc<SourceRegistry>, pipeline: Pipeline, settings: &SchedulerSettings) -> Self {
        Self {
            registry,
            pipeline,
            backoff: BackoffPolicy::new(settings.backoff_base_secs, settings.backoff_max_secs),
            permits: Arc::new(Semaphore::new(settings.max_concurrent.max(1))),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            tick: Duration::from_secs(settings.tick_secs.max(1)),
            sweep_limit: settings.pending_sweep_limit,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn in_flight(&self) -> Vec<Uuid> {
        self.in_flight
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .copied()
            .collect()
    }

    fn try_reserve(&self, id: Uuid) -> Option<InFlightGuard> {
        let mut set = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        if !set.insert(id) {
            return None;
        }
        gauge!("scheduler_in_flight").set(set.len() as f64);
        Some(InFlightGuard {
            set: self.in_flight.clone(),
            id,
        })
    }

    /// Spawn one job per due source not already in flight.
    pub fn run_tick(&self, now: DateTime<Utc>) -> Vec<JoinHandle<Result<RunReport>>> {
        ensure_metrics_described();
        gauge!("scheduler_last_tick_ts").set(now.timestamp() as f64);

        let due = self.registry.due(now);
        self.spawn_due(due, now)
    }

    fn spawn_due(&self, due: Vec<DataSource>, now: DateTime<Utc>) -> Vec<JoinHandle<Result<RunReport>>> {
        let mut handles = Vec::new();
        for candidate in due {
            let Some(guard) = self.try_reserve(candidate.id) else {
                tracing::debug!(source_id = %candidate.id, "still in flight, skipping");
                continue;
            };
            // A job that finished after `due` was read has already moved
            // next_run_at, so look again now that the source is reserved.
            let source = match self.registry.get(candidate.id) {
                Some(fresh) if fresh.is_due(now) => fresh,
                _ => {
                    tracing::debug!(source_id = %candidate.id, "no longer due, skipping");
                    continue;
                }
            };
            counter!("scheduler_jobs_total").increment(1);
            let this = self.clone();
            handles.push(tokio::spawn(async move {
                let _guard = guard;
                this.run_job(source).await
            }));
        }
        handles
    }

    /// Run one source immediately, outside the tick. Still honours the
    /// concurrency bound and the one-job-per-source rule.
    pub async fn run_now(&self, id: Uuid) -> Result<RunReport, TriggerError> {
        let source = self.registry.get(id).ok_or(TriggerError::NotFound(id))?;
        let _guard = self.try_reserve(id).ok_or(TriggerError::AlreadyRunning(id))?;
        self.run_job(source).await.map_err(TriggerError::Failed)
    }

    async fn run_job(&self, source: DataSource) -> Result<RunReport> {
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| anyhow::anyhow!("scheduler semaphore closed: {e}"))?;

        let result = self.pipeline.run_source(&source).await;
        let now = Utc::now();
        let bookkeeping = match &result {
            Ok(_) => self.registry.record_success(source.id, now),
            Err(e) => {
                tracing::warn!(
                    source_id = %source.id,
                    kind = source.kind.as_str(),
                    error = %format!("{e:#}"),
                    "collection job failed"
                );
                self.registry
                    .record_failure(source.id, &format!("{e:#}"), now, &self.backoff)
            }
        };
        match bookkeeping {
            Ok(updated) => tracing::debug!(
                source_id = %updated.id,
                status = ?updated.status,
                next_run_at = ?updated.next_run_at,
                "source bookkeeping updated"
            ),
            Err(e) => tracing::debug!(source_id = %source.id, error = %e, "source removed during job"),
        }
        result
    }

    /// Analyse records left pending and evaluate alert rules.
    pub async fn sweep(&self, now: DateTime<Utc>) {
        if self.sweep_limit > 0 {
            if let Err(e) = self.pipeline.engine().process_pending(self.sweep_limit, now).await {
                tracing::warn!(error = %e, "pending sweep failed");
            }
        }
        self.pipeline.evaluate_and_notify(now).await;
    }

    /// Tick until `shutdown` turns true (or its sender is dropped).
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!(tick_secs = self.tick.as_secs(), "scheduler started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now = Utc::now();
                        let spawned = self.run_tick(now).len();
                        if spawned > 0 {
                            tracing::info!(jobs = spawned, "scheduler tick");
                        }
                        self.sweep(now).await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("scheduler stopped");
        })
    }
}

/// Delete records (and their analyses) collected before `now - retention`.
pub async fn purge_once(
    store: &Arc<dyn RecordStore>,
    retention_secs: u64,
    now: DateTime<Utc>,
) -> Result<PurgeReport> {
    ensure_metrics_described();
    let cutoff = i64::try_from(retention_secs)
        .ok()
        .and_then(ChronoDuration::try_seconds)
        .and_then(|keep| now.checked_sub_signed(keep))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let report = store.purge_before(cutoff).await?;
    counter!("retention_purged_total", "kind" => "records").increment(report.records as u64);
    counter!("retention_purged_total", "kind" => "analyses").increment(report.analyses as u64);
    tracing::info!(
        records = report.records,
        analyses = report.analyses,
        cutoff = %cutoff,
        "retention sweep done"
    );
    Ok(report)
}

/// Daily retention task; the first sweep runs immediately.
pub fn spawn_retention(
    store: Arc<dyn RecordStore>,
    retention_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(24 * 3600));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = purge_once(&store, retention_secs, Utc::now()).await {
                        tracing::warn!(error = %e, "retention sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
