// src/api/sources.rs
use axum::extract::State;
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use uuid::Uuid;

use crate::auth::{AuthUser, Permission};
use crate::envelope::{ApiJson, ApiPath, ApiResponse, ApiResult};
use crate::error::ApiError;
use crate::pipeline::RunReport;
use crate::registry::{DataSource, NewSource, RegistryError, SourcePatch};
use crate::AppState;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/data-sources", get(list).post(create))
        .route("/data-sources/{id}", get(fetch).patch(update).delete(remove))
        .route("/data-sources/{id}/collect", post(collect_now))
}

async fn list(State(state): State<AppState>, caller: AuthUser) -> ApiResult<Vec<DataSource>> {
    caller.require(Permission::ReadCollectors)?;
    Ok(ApiResponse::ok(state.registry.list()))
}

async fn create(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiJson(req): ApiJson<NewSource>,
) -> ApiResult<DataSource> {
    caller.require(Permission::WriteCollectors)?;
    let src = state.registry.create(req, Utc::now())?;
    tracing::info!(source_id = %src.id, kind = src.kind.as_str(), user_id = %caller.id, "data source created");
    Ok(ApiResponse::created(src))
}

async fn fetch(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<DataSource> {
    caller.require(Permission::ReadCollectors)?;
    let src = state.registry.get(id).ok_or(RegistryError::NotFound(id))?;
    Ok(ApiResponse::ok(src))
}

async fn update(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(patch): ApiJson<SourcePatch>,
) -> ApiResult<DataSource> {
    caller.require(Permission::WriteCollectors)?;
    let src = state.registry.update(id, patch, Utc::now())?;
    tracing::info!(source_id = %id, status = ?src.status, "data source updated");
    Ok(ApiResponse::ok(src))
}

async fn remove(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<DataSource> {
    caller.require(Permission::WriteCollectors)?;
    let src = state.registry.delete(id)?;
    tracing::info!(source_id = %id, "data source deleted");
    Ok(ApiResponse::ok(src).with_message("deleted; collected records are kept until retention"))
}

async fn collect_now(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<RunReport> {
    caller.require(Permission::ExecuteCollectors)?;
    let report = state.scheduler.run_now(id).await.map_err(ApiError::from)?;
    Ok(ApiResponse::ok(report))
}
