// src/api/auth.rs
use axum::extract::State;
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::auth::{AuthError, AuthUser, Role, TokenKind, TokenPair, User};
use crate::envelope::{ApiJson, ApiResponse, ApiResult};
use crate::error::ApiError;
use crate::AppState;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
}

#[derive(Deserialize)]
struct RegisterReq {
    email: String,
    password: String,
    #[serde(default)]
    full_name: Option<String>,
}

#[derive(Deserialize)]
struct LoginReq {
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct RefreshReq {
    refresh_token: String,
}

#[derive(Serialize)]
struct AuthResp {
    #[serde(flatten)]
    tokens: TokenPair,
    user: User,
}

async fn register(State(state): State<AppState>, ApiJson(req): ApiJson<RegisterReq>) -> ApiResult<AuthResp> {
    let user = state
        .users
        .register(&req.email, &req.password, req.full_name, Role::Viewer)
        .await?;
    let tokens = state.jwt.issue_pair(&user, Utc::now())?;
    Ok(ApiResponse::created(AuthResp { tokens, user }).with_message("registered"))
}

async fn login(State(state): State<AppState>, ApiJson(req): ApiJson<LoginReq>) -> ApiResult<AuthResp> {
    let user = state.users.authenticate(&req.email, &req.password).await.map_err(|e| {
        tracing::info!(error = %e, "login rejected");
        e
    })?;
    let tokens = state.jwt.issue_pair(&user, Utc::now())?;
    tracing::info!(user_id = %user.id, "login");
    Ok(ApiResponse::ok(AuthResp { tokens, user }))
}

/// Spend a refresh token for a new pair; the old refresh token is revoked.
async fn refresh(State(state): State<AppState>, ApiJson(req): ApiJson<RefreshReq>) -> ApiResult<AuthResp> {
    let claims = state.jwt.verify(&req.refresh_token, TokenKind::Refresh)?;
    let user = state
        .users
        .get(claims.user_id()?)
        .ok_or(AuthError::InvalidToken)?;
    if !user.is_active {
        return Err(AuthError::Inactive.into());
    }
    if !state.jwt.revoke(&claims) {
        return Err(AuthError::InvalidToken.into());
    }
    let tokens = state.jwt.issue_pair(&user, Utc::now())?;
    Ok(ApiResponse::ok(AuthResp { tokens, user }))
}

async fn logout(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiJson(req): ApiJson<RefreshReq>,
) -> ApiResult<serde_json::Value> {
    let claims = state.jwt.verify(&req.refresh_token, TokenKind::Refresh)?;
    if claims.user_id()? != caller.id {
        return Err(ApiError::Forbidden("refresh token belongs to another user".into()));
    }
    state.jwt.revoke(&claims);
    tracing::info!(user_id = %caller.id, "logout");
    Ok(ApiResponse::ok(serde_json::json!({ "revoked": true })).with_message("logged out"))
}

async fn me(State(state): State<AppState>, caller: AuthUser) -> ApiResult<User> {
    let user = state.users.get(caller.id).ok_or(AuthError::InvalidToken)?;
    Ok(ApiResponse::ok(user))
}
