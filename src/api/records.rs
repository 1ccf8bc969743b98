// src/api/records.rs
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use uuid::Uuid;

use crate::analyze::AnalysisResult;
use crate::auth::{AuthUser, Permission};
use crate::envelope::{ApiPath, ApiQuery, ApiResponse, ApiResult};
use crate::error::ApiError;
use crate::ingest::store::{CollectedRecord, RecordQuery};
use crate::AppState;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/records", get(list))
        .route("/records/{id}", get(fetch))
}

async fn list(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiQuery(q): ApiQuery<RecordQuery>,
) -> ApiResult<Vec<CollectedRecord>> {
    caller.require(Permission::ReadData)?;
    let rows = state.store.list_records(q).await?;
    Ok(ApiResponse::ok(rows))
}

#[derive(Serialize)]
struct RecordDetail {
    record: CollectedRecord,
    analyses: Vec<AnalysisResult>,
}

async fn fetch(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<RecordDetail> {
    caller.require(Permission::ReadData)?;
    let record = state
        .store
        .get_record(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("record {id} not found")))?;
    let analyses = state.store.analyses_for(id).await?;
    Ok(ApiResponse::ok(RecordDetail { record, analyses }))
}
