// src/api/mod.rs
//! HTTP surface: `/health`, `/metrics` and everything under `/api/v1`.

mod alerts;
mod analysis;
mod auth;
mod records;
mod reports;
mod sources;

use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::{middleware, routing::get, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::envelope::{self, ApiResponse, ApiResult};
use crate::ingest::store::StoreStats;
use crate::AppState;

pub fn router(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/health", get(health_detailed))
        .merge(auth::routes())
        .merge(sources::routes())
        .merge(records::routes())
        .merge(analysis::routes())
        .merge(alerts::routes())
        .merge(reports::routes());

    let mut app = Router::new()
        .route("/health", get(health))
        .nest("/api/v1", v1);

    if let Some(handle) = state.metrics.clone() {
        app = app.merge(crate::telemetry::metrics_router(handle));
    }

    let cors = cors_layer(&state.config.cors_origins);
    app.fallback(not_found)
        .layer(middleware::from_fn(envelope::request_id))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// No configured origins means permissive CORS, as in development.
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return CorsLayer::very_permissive();
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(parsed))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(envelope::REQUEST_ID_HEADER),
        ])
        .expose_headers([HeaderName::from_static(envelope::REQUEST_ID_HEADER)])
        .allow_credentials(true)
}

async fn not_found() -> crate::error::ApiError {
    crate::error::ApiError::NotFound("route not found".into())
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
    environment: &'static str,
}

async fn health(axum::extract::State(state): axum::extract::State<AppState>) -> ApiResponse<Health> {
    ApiResponse::ok(Health {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.env.as_str(),
    })
}

#[derive(Serialize)]
struct HealthDetailed {
    status: &'static str,
    version: &'static str,
    environment: &'static str,
    uptime_secs: i64,
    sources: usize,
    jobs_in_flight: usize,
    alert_rules: usize,
    store: StoreStats,
}

async fn health_detailed(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> ApiResult<HealthDetailed> {
    let (status, store) = match state.store.stats().await {
        Ok(s) => ("healthy", s),
        Err(e) => {
            tracing::warn!(error = %e, "store health check failed");
            ("degraded", StoreStats::default())
        }
    };
    Ok(ApiResponse::ok(HealthDetailed {
        status,
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.env.as_str(),
        uptime_secs: (chrono::Utc::now() - state.started_at).num_seconds(),
        sources: state.registry.list().len(),
        jobs_in_flight: state.scheduler.in_flight().len(),
        alert_rules: state.alerts.list_rules().len(),
        store,
    }))
}

/// `?hours=&source_id=` shared by analysis and report endpoints.
#[derive(Debug, Deserialize)]
pub(crate) struct WindowQuery {
    pub hours: Option<u32>,
    pub source_id: Option<uuid::Uuid>,
}
