// src/auth/users.rs
use anyhow::anyhow;
use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use super::permissions::Role;
use super::AuthError;

pub const PASSWORD_MIN_LENGTH: usize = 8;
const SPECIAL_CHARS: &str = "!@#$%^&*()_+-=[]{}|;:,.<>?";

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    #[cfg(test)]
    pub(crate) fn for_tests(email: &str, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.to_string(),
            full_name: None,
            password_hash: String::new(),
            role,
            is_active: true,
            created_at: Utc::now(),
            last_login: None,
        }
    }
}

/// Length plus upper, lower, digit and special character.
pub fn check_password_strength(password: &str) -> Result<(), AuthError> {
    let mut missing = Vec::new();
    if password.chars().count() < PASSWORD_MIN_LENGTH {
        missing.push(format!("at least {PASSWORD_MIN_LENGTH} characters"));
    }
    if !password.chars().any(char::is_uppercase) {
        missing.push("an uppercase letter".into());
    }
    if !password.chars().any(char::is_lowercase) {
        missing.push("a lowercase letter".into());
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        missing.push("a digit".into());
    }
    if !password.chars().any(|c| SPECIAL_CHARS.contains(c)) {
        missing.push("a special character".into());
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(AuthError::WeakPassword(missing))
    }
}

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| anyhow!("hashing password: {e}"))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    }
}

#[derive(Debug, Default)]
pub struct UserStore {
    inner: RwLock<HashMap<Uuid, User>>,
}

impl UserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: Uuid) -> Option<User> {
        self.inner
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&id)
            .cloned()
    }

    pub fn find_by_email(&self, email: &str) -> Option<User> {
        let email = normalize_email(email);
        self.inner
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .find(|u| u.email == email)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create a user. Email is unique ignoring case.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        full_name: Option<String>,
        role: Role,
    ) -> Result<User, AuthError> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(AuthError::InvalidEmail);
        }
        check_password_strength(password)?;
        if self.find_by_email(&email).is_some() {
            return Err(AuthError::EmailTaken);
        }

        let pw = password.to_string();
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&pw))
            .await
            .map_err(|e| AuthError::Internal(anyhow!("hash task: {e}")))??;

        let user = User {
            id: Uuid::new_v4(),
            email: email.clone(),
            full_name: full_name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
            password_hash,
            role,
            is_active: true,
            created_at: Utc::now(),
            last_login: None,
        };

        let mut map = self.inner.write().unwrap_or_else(|p| p.into_inner());
        // Re-check under the write lock; hashing ran unlocked.
        if map.values().any(|u| u.email == email) {
            return Err(AuthError::EmailTaken);
        }
        map.insert(user.id, user.clone());
        drop(map);
        tracing::info!(user_id = %user.id, role = user.role.as_str(), "user registered");
        Ok(user)
    }

    /// Check credentials and stamp `last_login`.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let user = self.find_by_email(email).ok_or(AuthError::InvalidCredentials)?;
        let pw = password.to_string();
        let hash = user.password_hash.clone();
        let ok = tokio::task::spawn_blocking(move || verify_password(&pw, &hash))
            .await
            .map_err(|e| AuthError::Internal(anyhow!("verify task: {e}")))?;
        if !ok {
            return Err(AuthError::InvalidCredentials);
        }
        if !user.is_active {
            return Err(AuthError::Inactive);
        }
        let mut map = self.inner.write().unwrap_or_else(|p| p.into_inner());
        let stored = map.get_mut(&user.id).ok_or(AuthError::InvalidCredentials)?;
        stored.last_login = Some(Utc::now());
        Ok(stored.clone())
    }

    pub fn set_active(&self, id: Uuid, active: bool) -> Option<User> {
        let mut map = self.inner.write().unwrap_or_else(|p| p.into_inner());
        let u = map.get_mut(&id)?;
        u.is_active = active;
        Some(u.clone())
    }

    /// Create the configured admin unless a user with that email exists.
    pub async fn bootstrap_admin(&self, email: &str, password: &str) -> anyhow::Result<Option<User>> {
        if self.find_by_email(email).is_some() {
            return Ok(None);
        }
        let user = self
            .register(email, password, Some("Administrator".into()), Role::Admin)
            .await
            .map_err(|e| anyhow!("bootstrapping admin {email}: {e}"))?;
        Ok(Some(user))
    }
}
