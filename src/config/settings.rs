// src/config/settings.rs
//! Process-wide settings read from the environment (after `.env` via dotenvy).
//!
//! Every field has a development-friendly default; production deployments are
//! expected to set at least `JWT_SECRET` and `DATABASE_URL`.

use anyhow::{bail, Context, Result};
use rand::distr::{Alphanumeric, SampleString};
use std::path::PathBuf;
use std::str::FromStr;

pub const ENV_APP_ENV: &str = "APP_ENV";
pub const ENV_JWT_SECRET: &str = "JWT_SECRET";

const SECS_PER_DAY: u64 = 24 * 3600;
/// Upper bound for any duration setting.
const MAX_DURATION_SECS: u64 = 100 * 365 * SECS_PER_DAY;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Test => "test",
        }
    }

    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            "test" => Environment::Test,
            _ => Environment::Development,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub access_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
    pub rate_limit_per_minute: u32,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub tick_secs: u64,
    pub max_concurrent: usize,
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
    pub pending_sweep_limit: usize,
}

#[derive(Debug, Clone)]
pub struct AiSettings {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub model: String,
    pub daily_limit: u32,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub env: Environment,
    pub log_format: LogFormat,
    /// `None` keeps records in memory; otherwise a SQLite file path.
    pub database_url: Option<String>,
    pub dedup_window_secs: u64,
    pub retention_secs: u64,
    pub sources_path: Option<PathBuf>,
    pub alert_rules_path: Option<PathBuf>,
    pub topics_path: Option<PathBuf>,
    /// Load sources, alert rules and topics from files at startup.
    pub seed_config_files: bool,
    pub cors_origins: Vec<String>,
    pub metrics_enabled: bool,
    pub auth: AuthSettings,
    pub scheduler: SchedulerSettings,
    pub ai: AiSettings,
}

impl AppConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Same as `from_env` but with an injectable lookup, so tests never touch
    /// the real process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let env = get(ENV_APP_ENV)
            .map(|v| Environment::parse(&v))
            .unwrap_or(Environment::Development);

        let log_format = match get("LOG_FORMAT").as_deref() {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        };

        let jwt_secret = match get(ENV_JWT_SECRET) {
            Some(s) => s,
            None if env == Environment::Production => {
                bail!("{ENV_JWT_SECRET} must be set when APP_ENV=production")
            }
            None => {
                tracing::warn!("JWT_SECRET not set; generating an ephemeral development secret");
                Alphanumeric.sample_string(&mut rand::rng(), 48)
            }
        };

        let dedup_window_secs = duration_or(&get, "DEDUP_WINDOW_SECS", 7 * SECS_PER_DAY, 1)?;
        // Retention never drops below the dedup window.
        let retention_secs =
            duration_or(&get, "RETENTION_DAYS", 30, SECS_PER_DAY)?.max(dedup_window_secs);

        let database_url = get("DATABASE_URL").filter(|u| u != ":memory:");

        let cors_origins = get("CORS_ORIGINS")
            .map(|v| split_list(&v))
            .unwrap_or_default();

        let auth = AuthSettings {
            jwt_secret,
            jwt_issuer: get("JWT_ISSUER").unwrap_or_else(|| "osint-pipeline".to_string()),
            access_ttl_secs: duration_or(&get, "ACCESS_TOKEN_EXPIRE_MINUTES", 60, 60)? as i64,
            refresh_ttl_secs: duration_or(&get, "REFRESH_TOKEN_EXPIRE_DAYS", 30, SECS_PER_DAY)?
                as i64,
            admin_email: get("ADMIN_EMAIL"),
            admin_password: get("ADMIN_PASSWORD"),
            rate_limit_per_minute: parse_or(&get, "RATE_LIMIT_PER_MINUTE", 60)?,
        };

        let scheduler = SchedulerSettings {
            tick_secs: parse_or::<u64, _>(&get, "SCHEDULER_TICK_SECS", 15)?.max(1),
            max_concurrent: parse_or::<usize, _>(&get, "SCHEDULER_MAX_CONCURRENT", 4)?.max(1),
            backoff_base_secs: parse_or::<u64, _>(&get, "BACKOFF_BASE_SECS", 30)?.max(1),
            backoff_max_secs: parse_or(&get, "BACKOFF_MAX_SECS", 3600)?,
            pending_sweep_limit: parse_or(&get, "PENDING_SWEEP_LIMIT", 200)?,
        };

        let ai = AiSettings {
            enabled: get("AI_SENTIMENT_ENABLED").is_some_and(|v| is_truthy(&v)),
            api_key: get("OPENAI_API_KEY"),
            model: get("AI_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            daily_limit: parse_or(&get, "AI_DAILY_LIMIT", 500)?,
        };

        Ok(Self {
            env,
            log_format,
            database_url,
            dedup_window_secs,
            retention_secs,
            sources_path: get("SOURCES_CONFIG_PATH").map(PathBuf::from),
            alert_rules_path: get("ALERT_RULES_PATH").map(PathBuf::from),
            topics_path: get("TOPICS_CONFIG_PATH").map(PathBuf::from),
            seed_config_files: get("SEED_CONFIG_FILES").map(|v| is_truthy(&v)).unwrap_or(true),
            cors_origins,
            metrics_enabled: get("METRICS_ENABLED").map(|v| is_truthy(&v)).unwrap_or(true),
            auth,
            scheduler,
            ai,
        })
    }

    /// Deterministic configuration for tests: in-memory store, fixed secret.
    pub fn for_tests() -> Self {
        let mut cfg = Self::from_lookup(|k| match k {
            ENV_APP_ENV => Some("test".into()),
            ENV_JWT_SECRET => Some("test-secret-key-with-enough-entropy".into()),
            "METRICS_ENABLED" => Some("0".into()),
            "SEED_CONFIG_FILES" => Some("0".into()),
            _ => None,
        })
        .unwrap_or_else(|e| panic!("test config: {e:#}"));
        cfg.auth.admin_email = Some("admin@example.test".into());
        cfg.auth.admin_password = Some("Admin-Passw0rd!".into());
        cfg
    }

    pub fn is_production(&self) -> bool {
        self.env == Environment::Production
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}

/// `key` counted in units of `unit_secs`, returned as seconds.
fn duration_or<G>(get: &G, key: &str, default: u64, unit_secs: u64) -> Result<u64>
where
    G: Fn(&str) -> Option<String>,
{
    let n: u64 = parse_or(get, key, default)?;
    match n.checked_mul(unit_secs) {
        Some(secs) if secs <= MAX_DURATION_SECS => Ok(secs),
        _ => bail!("invalid value for {key}: {n} is out of range"),
    }
}

fn is_truthy(v: &str) -> bool {
    matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Accepts `a,b,c` as well as a JSON array (`["a","b"]`).
fn split_list(raw: &str) -> Vec<String> {
    if raw.starts_with('[') {
        if let Ok(v) = serde_json::from_str::<Vec<String>>(raw) {
            return v.into_iter().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
    }
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
