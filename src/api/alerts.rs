// src/api/alerts.rs
use axum::extract::State;
use axum::routing::{delete, get, post};
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::alerts::{AlertEvent, AlertRule, NewAlertRule};
use crate::auth::{AuthUser, Permission};
use crate::envelope::{ApiJson, ApiPath, ApiQuery, ApiResponse, ApiResult};
use crate::error::ApiError;
use crate::AppState;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/alerts", get(list_events))
        .route("/alerts/{id}/read", post(mark_read))
        .route("/alerts/rules", get(list_rules).post(create_rule))
        .route("/alerts/rules/{id}", delete(delete_rule))
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    limit: Option<usize>,
    #[serde(default)]
    unread_only: bool,
}

async fn list_events(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiQuery(q): ApiQuery<EventsQuery>,
) -> ApiResult<Vec<AlertEvent>> {
    caller.require(Permission::ReadData)?;
    let limit = q.limit.unwrap_or(50).clamp(1, 500);
    Ok(ApiResponse::ok(state.alerts.list_events(limit, q.unread_only)))
}

async fn mark_read(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<AlertEvent> {
    caller.require(Permission::ReadData)?;
    let ev = state
        .alerts
        .mark_read(id)
        .ok_or_else(|| ApiError::NotFound(format!("alert {id} not found")))?;
    Ok(ApiResponse::ok(ev))
}

async fn list_rules(State(state): State<AppState>, caller: AuthUser) -> ApiResult<Vec<AlertRule>> {
    caller.require(Permission::ReadData)?;
    Ok(ApiResponse::ok(state.alerts.list_rules()))
}

async fn create_rule(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiJson(req): ApiJson<NewAlertRule>,
) -> ApiResult<AlertRule> {
    caller.require(Permission::WriteData)?;
    let rule = state.alerts.create_rule(req, Utc::now())?;
    Ok(ApiResponse::created(rule))
}

async fn delete_rule(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<AlertRule> {
    caller.require(Permission::WriteData)?;
    let rule = state.alerts.delete_rule(id)?;
    Ok(ApiResponse::ok(rule).with_message("deleted"))
}
