// src/auth/mod.rs
//! Users, JWT access/refresh tokens, role permissions and per-user rate limits.

pub mod extract;
pub mod jwt;
pub mod permissions;
pub mod rate_limit;
pub mod users;

pub use extract::AuthUser;
pub use jwt::{Claims, JwtService, TokenKind, TokenPair};
pub use permissions::{Permission, Role};
pub use rate_limit::RateLimiter;
pub use users::{User, UserStore};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("invalid token")]
    InvalidToken,
    #[error("token expired")]
    TokenExpired,
    #[error("incorrect email or password")]
    InvalidCredentials,
    #[error("user is inactive")]
    Inactive,
    #[error("email is already registered")]
    EmailTaken,
    #[error("invalid email address")]
    InvalidEmail,
    #[error("password is too weak")]
    WeakPassword(Vec<String>),
    #[error("missing permission {}", .0.as_str())]
    Forbidden(Permission),
    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
