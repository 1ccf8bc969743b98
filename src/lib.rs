// src/lib.rs
//! OSINT collection and analysis pipeline.
//!
//! Sources in the [`registry`] are collected on a cadence by the
//! [`scheduler`], deduplicated into the [`ingest`] store, analysed by
//! [`analyze`], checked against [`alerts`] rules and fanned out through
//! [`notify`]. The [`api`] module exposes all of it over HTTP.

pub mod alerts;
pub mod analyze;
pub mod api;
pub mod auth;
pub mod collect;
pub mod config;
pub mod envelope;
pub mod error;
pub mod ingest;
pub mod notify;
pub mod pipeline;
pub mod registry;
pub mod reports;
pub mod scheduler;
pub mod telemetry;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::alerts::AlertEvaluator;
use crate::analyze::entities::TopicMatcher;
use crate::analyze::trends::TrendTracker;
use crate::analyze::AnalysisEngine;
use crate::auth::{JwtService, RateLimiter, UserStore};
use crate::collect::CollectorSet;
use crate::config::AppConfig;
use crate::ingest::sqlite::SqliteStore;
use crate::ingest::{Ingestor, MemoryStore, RecordStore};
use crate::notify::NotifierMux;
use crate::pipeline::Pipeline;
use crate::registry::SourceRegistry;
use crate::scheduler::Scheduler;

pub use crate::api::router;

/// Shared handles for handlers and background tasks.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<SourceRegistry>,
    pub store: Arc<dyn RecordStore>,
    pub engine: Arc<AnalysisEngine>,
    pub alerts: Arc<AlertEvaluator>,
    pub scheduler: Scheduler,
    pub users: Arc<UserStore>,
    pub jwt: Arc<JwtService>,
    pub rate_limiter: Arc<RateLimiter>,
    pub metrics: Option<PrometheusHandle>,
    pub started_at: DateTime<Utc>,
}

/// Build state with the HTTP collectors and the env-configured notifier.
pub async fn build_state(cfg: AppConfig) -> Result<AppState> {
    let collectors = CollectorSet::http().context("building collectors")?;
    build_state_with(cfg, collectors, NotifierMux::from_env()).await
}

pub async fn build_state_with(
    cfg: AppConfig,
    collectors: CollectorSet,
    notifier: NotifierMux,
) -> Result<AppState> {
    let now = Utc::now();

    let store: Arc<dyn RecordStore> = match cfg.database_url.as_deref() {
        Some(url) => {
            let path = url.strip_prefix("sqlite://").unwrap_or(url);
            tracing::info!(path, "using sqlite record store");
            Arc::new(SqliteStore::open(path).await?)
        }
        None => Arc::new(MemoryStore::new()),
    };

    let registry = Arc::new(SourceRegistry::new());
    let alerts = Arc::new(AlertEvaluator::new(store.clone()));
    let topics = if cfg.seed_config_files {
        let sources = registry.seed_from_path(cfg.sources_path.as_deref(), now)?;
        let rules = alerts.seed_from_path(cfg.alert_rules_path.as_deref(), now)?;
        tracing::info!(sources, rules, "seeded from config files");
        TopicMatcher::load(cfg.topics_path.as_deref())?
    } else {
        TopicMatcher::default()
    };

    let engine = Arc::new(AnalysisEngine::new(
        store.clone(),
        analyze::ai::model_from_settings(&cfg.ai),
        Arc::new(topics),
        Arc::new(TrendTracker::default()),
    ));
    engine.warm_up(now).await.context("warming up trend tracker")?;

    let pipeline = Pipeline::new(
        Arc::new(collectors),
        Ingestor::new(store.clone(), cfg.dedup_window_secs),
        engine.clone(),
        alerts.clone(),
        notifier,
    );
    let scheduler = Scheduler::new(registry.clone(), pipeline, &cfg.scheduler);

    let users = Arc::new(UserStore::new());
    if let (Some(email), Some(password)) = (&cfg.auth.admin_email, &cfg.auth.admin_password) {
        if users.bootstrap_admin(email, password).await?.is_some() {
            tracing::info!("bootstrap admin created");
        }
    }

    let jwt = Arc::new(JwtService::new(
        &cfg.auth.jwt_secret,
        cfg.auth.jwt_issuer.clone(),
        cfg.auth.access_ttl_secs,
        cfg.auth.refresh_ttl_secs,
    ));
    let rate_limiter = Arc::new(RateLimiter::new(cfg.auth.rate_limit_per_minute));
    let metrics = if cfg.metrics_enabled {
        Some(telemetry::install_metrics()?)
    } else {
        None
    };

    Ok(AppState {
        config: Arc::new(cfg),
        registry,
        store,
        engine,
        alerts,
        scheduler,
        users,
        jwt,
        rate_limiter,
        metrics,
        started_at: now,
    })
}
