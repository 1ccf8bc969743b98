// src/api/reports.rs
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use chrono::Utc;

use super::WindowQuery;
use crate::auth::{AuthUser, Permission};
use crate::envelope::{ApiQuery, ApiResponse, ApiResult};
use crate::reports::{build_summary, SummaryReport, DEFAULT_WINDOW_HOURS};
use crate::AppState;

pub(super) fn routes() -> Router<AppState> {
    Router::new().route("/reports/summary", get(summary))
}

async fn summary(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiQuery(q): ApiQuery<WindowQuery>,
) -> ApiResult<SummaryReport> {
    caller.require(Permission::ReadReports)?;
    let report = build_summary(
        &state.engine,
        &state.alerts,
        q.hours.unwrap_or(DEFAULT_WINDOW_HOURS),
        q.source_id,
        Utc::now(),
    )
    .await?;
    Ok(ApiResponse::ok(report))
}
