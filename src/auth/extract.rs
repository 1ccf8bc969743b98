// src/auth/extract.rs
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};
use std::time::Instant;
use uuid::Uuid;

use super::jwt::TokenKind;
use super::permissions::{Permission, Role};
use super::AuthError;
use crate::error::ApiError;
use crate::AppState;

/// Caller authenticated by a bearer access token. Extracting it also spends
/// one slot of the caller's per-minute rate limit.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
}

impl AuthUser {
    pub fn require(&self, p: Permission) -> Result<(), ApiError> {
        if self.role.can(p) {
            Ok(())
        } else {
            tracing::debug!(user_id = %self.id, permission = p.as_str(), "permission denied");
            Err(AuthError::Forbidden(p).into())
        }
    }
}

pub(crate) fn bearer_token(parts: &Parts) -> Option<&str> {
    let raw = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = raw.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(AuthError::MissingToken)?;
        let claims = state.jwt.verify(token, TokenKind::Access)?;
        let user = state
            .users
            .get(claims.user_id()?)
            .ok_or(AuthError::InvalidToken)?;
        if !user.is_active {
            return Err(AuthError::Inactive.into());
        }
        state
            .rate_limiter
            .check(user.id, Instant::now())
            .map_err(|retry_after_secs| AuthError::RateLimited { retry_after_secs })?;

        Ok(AuthUser {
            id: user.id,
            email: user.email,
            // Current role, not the one baked into the token.
            role: user.role,
        })
    }
}
