// src/error.rs
//! HTTP-facing errors. Every variant renders as the error envelope.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::alerts::RuleError;
use crate::auth::AuthError;
use crate::envelope::{current_request_id, now_rfc3339};
use crate::registry::RegistryError;
use crate::scheduler::TriggerError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{message}")]
    Validation { message: String, details: Value },
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation {
            message: message.into(),
            details: Value::Null,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Validation { .. } => "VALIDATION_ERROR",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::RateLimited { .. } => "RATE_LIMITED",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let request_id = current_request_id();
        let (message, details) = match &self {
            ApiError::Internal(e) => {
                // Details stay in the log, keyed by request id.
                tracing::error!(%request_id, error = %format!("{e:#}"), "internal error");
                ("Internal server error".to_string(), Value::Null)
            }
            ApiError::Validation { message, details } => (message.clone(), details.clone()),
            other => (other.to_string(), Value::Null),
        };
        let body = json!({
            "success": false,
            "error": { "code": self.code(), "message": message, "details": details },
            "timestamp": now_rfc3339(),
            "request_id": request_id,
        });
        let mut resp = (status, Json(body)).into_response();
        if let ApiError::RateLimited { retry_after_secs } = self {
            if let Ok(v) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                resp.headers_mut().insert("retry-after", v);
            }
        }
        resp
    }
}

impl From<JsonRejection> for ApiError {
    fn from(r: JsonRejection) -> Self {
        ApiError::BadRequest(r.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(r: QueryRejection) -> Self {
        ApiError::BadRequest(r.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(r: PathRejection) -> Self {
        ApiError::BadRequest(r.body_text())
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::MissingToken
            | AuthError::InvalidToken
            | AuthError::TokenExpired
            | AuthError::InvalidCredentials
            | AuthError::Inactive => ApiError::Unauthorized(e.to_string()),
            AuthError::EmailTaken => ApiError::Conflict(e.to_string()),
            AuthError::InvalidEmail => ApiError::validation(e.to_string()),
            AuthError::WeakPassword(missing) => ApiError::Validation {
                message: "password is too weak".into(),
                details: json!({ "password": missing }),
            },
            AuthError::Forbidden(_) => ApiError::Forbidden(e.to_string()),
            AuthError::RateLimited { retry_after_secs } => ApiError::RateLimited { retry_after_secs },
            AuthError::Internal(inner) => ApiError::Internal(inner),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound(_) => ApiError::NotFound(e.to_string()),
            RegistryError::Invalid(m) => ApiError::validation(m),
        }
    }
}

impl From<RuleError> for ApiError {
    fn from(e: RuleError) -> Self {
        match e {
            RuleError::NotFound(_) => ApiError::NotFound(e.to_string()),
            RuleError::Invalid(m) => ApiError::validation(m),
        }
    }
}

impl From<TriggerError> for ApiError {
    fn from(e: TriggerError) -> Self {
        match e {
            TriggerError::NotFound(_) => ApiError::NotFound(e.to_string()),
            TriggerError::AlreadyRunning(_) => ApiError::Conflict(e.to_string()),
            // Upstream failure is the caller's answer, not a server bug.
            TriggerError::Failed(inner) => ApiError::Validation {
                message: "collection failed".into(),
                details: json!({ "error": format!("{inner:#}") }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use uuid::Uuid;

    async fn body(e: ApiError) -> (StatusCode, Value) {
        let resp = e.into_response();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn not_found_envelope() {
        let (s, v) = body(RegistryError::NotFound(Uuid::nil()).into()).await;
        assert_eq!(s, StatusCode::NOT_FOUND);
        assert_eq!(v["success"], false);
        assert_eq!(v["error"]["code"], "NOT_FOUND");
        assert!(v["request_id"].as_str().is_some_and(|s| !s.is_empty()));
    }

    #[tokio::test]
    async fn internal_error_hides_details() {
        let (s, v) = body(ApiError::Internal(anyhow::anyhow!("db password=hunter2"))).await;
        assert_eq!(s, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(v["error"]["message"], "Internal server error");
    }

    #[tokio::test]
    async fn weak_password_lists_requirements() {
        let e: ApiError = AuthError::WeakPassword(vec!["a digit".into()]).into();
        let (s, v) = body(e).await;
        assert_eq!(s, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(v["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(v["error"]["details"]["password"][0], "a digit");
    }

    #[test]
    fn rate_limited_sets_retry_after() {
        let resp = ApiError::RateLimited { retry_after_secs: 12 }.into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers()["retry-after"], "12");
    }
}
