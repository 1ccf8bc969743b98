// src/api/analysis.rs
use axum::extract::State;
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::WindowQuery;
use crate::analyze::trends::Trend;
use crate::analyze::{AnalysisReport, SentimentSummary};
use crate::auth::{AuthUser, Permission};
use crate::envelope::{ApiJson, ApiQuery, ApiResponse, ApiResult};
use crate::reports::{DEFAULT_WINDOW_HOURS, MAX_WINDOW_HOURS};
use crate::AppState;

const DEFAULT_RUN_LIMIT: usize = 100;
const MAX_RUN_LIMIT: usize = 1000;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/analysis/sentiment", get(sentiment))
        .route("/analysis/trends", get(trends))
        .route("/analysis/run", post(run))
}

#[derive(Serialize)]
struct SentimentResp {
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    source_id: Option<Uuid>,
    #[serde(flatten)]
    summary: SentimentSummary,
}

async fn sentiment(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiQuery(q): ApiQuery<WindowQuery>,
) -> ApiResult<SentimentResp> {
    caller.require(Permission::ReadData)?;
    let hours = q.hours.unwrap_or(DEFAULT_WINDOW_HOURS).clamp(1, MAX_WINDOW_HOURS);
    let now = Utc::now();
    let since = now - Duration::hours(i64::from(hours));
    let summary = state.engine.sentiment_summary(since, q.source_id).await?;
    Ok(ApiResponse::ok(SentimentResp {
        window_start: since,
        window_end: now,
        source_id: q.source_id,
        summary,
    }))
}

async fn trends(State(state): State<AppState>, caller: AuthUser) -> ApiResult<Vec<Trend>> {
    caller.require(Permission::ReadData)?;
    Ok(ApiResponse::ok(state.engine.trends(Utc::now())))
}

#[derive(Debug, Default, Deserialize)]
struct RunReq {
    #[serde(default)]
    record_ids: Vec<Uuid>,
    #[serde(default)]
    limit: Option<usize>,
}

/// Analyse the given records, or up to `limit` pending ones when none are named.
async fn run(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiJson(req): ApiJson<RunReq>,
) -> ApiResult<AnalysisReport> {
    caller.require(Permission::ExecuteCollectors)?;
    let now = Utc::now();
    let report = if req.record_ids.is_empty() {
        let limit = req.limit.unwrap_or(DEFAULT_RUN_LIMIT).clamp(1, MAX_RUN_LIMIT);
        state.engine.process_pending(limit, now).await?
    } else {
        state.engine.process_records(&req.record_ids, now).await?
    };
    let (fired, _) = state.scheduler.pipeline().evaluate_and_notify(now).await;
    tracing::info!(analyzed = report.analyzed, alerts = fired, user_id = %caller.id, "manual analysis run");
    Ok(ApiResponse::ok(report))
}
