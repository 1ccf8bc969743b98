// src/registry.rs
//! Source registry: configured data sources, their cadence and health.
//!
//! The registry is the only owner of `DataSource` state. Users mutate the
//! definition (name, cadence, query, pause/resume); the scheduler mutates the
//! run bookkeeping through `record_success` / `record_failure`.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use uuid::Uuid;

use crate::config::files;
use crate::scheduler::backoff::BackoffPolicy;

pub const MIN_CADENCE_SECS: u64 = 60;
pub const MAX_CADENCE_SECS: u64 = 30 * 24 * 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    SocialMedia,
    News,
    Rss,
    CompanyRegistry,
    Web,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::SocialMedia => "social_media",
            SourceKind::News => "news",
            SourceKind::Rss => "rss",
            SourceKind::CompanyRegistry => "company_registry",
            SourceKind::Web => "web",
        }
    }

    fn requires_endpoint(&self) -> bool {
        matches!(self, SourceKind::Rss | SourceKind::Web)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Active,
    Paused,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataSource {
    pub id: Uuid,
    pub name: String,
    pub kind: SourceKind,
    pub cadence_secs: u64,
    pub status: SourceStatus,
    /// Name of the env var that holds the credential, never the secret.
    pub credentials_ref: Option<String>,
    pub query: Vec<String>,
    pub endpoint: Option<String>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DataSource {
    /// Resolve `credentials_ref` against the environment.
    pub fn credential(&self) -> Option<String> {
        self.credentials_ref
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status != SourceStatus::Paused && self.next_run_at.is_none_or(|t| t <= now)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSource {
    pub name: String,
    pub kind: SourceKind,
    pub cadence_secs: u64,
    #[serde(default)]
    pub credentials_ref: Option<String>,
    #[serde(default)]
    pub query: Vec<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourcePatch {
    pub name: Option<String>,
    pub cadence_secs: Option<u64>,
    pub credentials_ref: Option<String>,
    pub query: Option<Vec<String>>,
    pub endpoint: Option<String>,
    pub status: Option<SourceStatus>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RegistryError {
    #[error("data source {0} not found")]
    NotFound(Uuid),
    #[error("invalid data source: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SourcesFile {
    Table { sources: Vec<NewSource> },
    List(Vec<NewSource>),
}

#[derive(Debug, Default)]
pub struct SourceRegistry {
    inner: RwLock<HashMap<Uuid, DataSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, new: NewSource, now: DateTime<Utc>) -> Result<DataSource, RegistryError> {
        let name = new.name.trim().to_string();
        validate(&name, new.kind, new.cadence_secs, new.endpoint.as_deref())?;

        let src = DataSource {
            id: Uuid::new_v4(),
            name,
            kind: new.kind,
            cadence_secs: new.cadence_secs,
            status: SourceStatus::Active,
            credentials_ref: clean_opt(new.credentials_ref),
            query: clean_list(new.query),
            endpoint: clean_opt(new.endpoint),
            consecutive_failures: 0,
            last_error: None,
            last_run_at: None,
            next_run_at: None,
            created_at: now,
            updated_at: now,
        };
        self.write().insert(src.id, src.clone());
        tracing::info!(source_id = %src.id, kind = src.kind.as_str(), name = %src.name, "data source created");
        Ok(src)
    }

    pub fn get(&self, id: Uuid) -> Option<DataSource> {
        self.read().get(&id).cloned()
    }

    /// All sources ordered by name.
    pub fn list(&self) -> Vec<DataSource> {
        let mut v: Vec<DataSource> = self.read().values().cloned().collect();
        v.sort_by(|a, b| a.name.cmp(&b.name).then(a.created_at.cmp(&b.created_at)));
        v
    }

    pub fn update(
        &self,
        id: Uuid,
        patch: SourcePatch,
        now: DateTime<Utc>,
    ) -> Result<DataSource, RegistryError> {
        let mut map = self.write();
        let current = map.get(&id).ok_or(RegistryError::NotFound(id))?;
        let mut next = current.clone();

        if let Some(name) = patch.name {
            next.name = name.trim().to_string();
        }
        if let Some(c) = patch.cadence_secs {
            next.cadence_secs = c;
        }
        if let Some(q) = patch.query {
            next.query = clean_list(q);
        }
        if patch.endpoint.is_some() {
            next.endpoint = clean_opt(patch.endpoint);
        }
        if patch.credentials_ref.is_some() {
            next.credentials_ref = clean_opt(patch.credentials_ref);
        }
        match patch.status {
            Some(SourceStatus::Error) => {
                return Err(RegistryError::Invalid(
                    "status 'error' is set by the scheduler only".into(),
                ))
            }
            Some(SourceStatus::Active) if current.status != SourceStatus::Active => {
                // Resuming makes the source due right away with a clean slate.
                next.status = SourceStatus::Active;
                next.consecutive_failures = 0;
                next.next_run_at = None;
            }
            Some(s) => next.status = s,
            None => {}
        }

        validate(&next.name, next.kind, next.cadence_secs, next.endpoint.as_deref())?;
        next.updated_at = now;
        map.insert(id, next.clone());
        Ok(next)
    }

    pub fn delete(&self, id: Uuid) -> Result<DataSource, RegistryError> {
        self.write().remove(&id).ok_or(RegistryError::NotFound(id))
    }

    /// Sources eligible to run at `now`, never-run sources first.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<DataSource> {
        let mut v: Vec<DataSource> = self
            .read()
            .values()
            .filter(|s| s.is_due(now))
            .cloned()
            .collect();
        v.sort_by_key(|s| (s.next_run_at, s.created_at));
        v
    }

    pub fn record_success(&self, id: Uuid, now: DateTime<Utc>) -> Result<DataSource, RegistryError> {
        let mut map = self.write();
        let src = map.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        if src.status != SourceStatus::Paused {
            src.status = SourceStatus::Active;
        }
        src.consecutive_failures = 0;
        src.last_error = None;
        src.last_run_at = Some(now);
        let cadence = i64::try_from(src.cadence_secs).ok().and_then(ChronoDuration::try_seconds);
        src.next_run_at = Some(later(now, cadence));
        src.updated_at = now;
        Ok(src.clone())
    }

    pub fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        now: DateTime<Utc>,
        backoff: &BackoffPolicy,
    ) -> Result<DataSource, RegistryError> {
        let mut map = self.write();
        let src = map.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        src.consecutive_failures = src.consecutive_failures.saturating_add(1);
        if src.status != SourceStatus::Paused {
            src.status = SourceStatus::Error;
        }
        src.last_error = Some(truncate(error, 500));
        src.last_run_at = Some(now);
        let delay = backoff.delay(src.consecutive_failures);
        src.next_run_at = Some(later(now, ChronoDuration::from_std(delay).ok()));
        src.updated_at = now;
        Ok(src.clone())
    }

    /// Register every source defined in a TOML (`[[sources]]`) or JSON file.
    /// Returns how many were created; invalid entries are logged and skipped.
    pub fn seed_from_path(&self, path: Option<&Path>, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let Some(file) = files::load_optional::<SourcesFile>(path, "sources")? else {
            return Ok(0);
        };
        let defs = match file {
            SourcesFile::Table { sources } => sources,
            SourcesFile::List(v) => v,
        };
        let mut created = 0usize;
        for def in defs {
            let name = def.name.clone();
            match self.create(def, now) {
                Ok(_) => created += 1,
                Err(e) => tracing::warn!(%name, error = %e, "skipping invalid seeded source"),
            }
        }
        Ok(created)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Uuid, DataSource>> {
        self.inner.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Uuid, DataSource>> {
        self.inner.write().unwrap_or_else(|p| p.into_inner())
    }
}

fn validate(
    name: &str,
    kind: SourceKind,
    cadence_secs: u64,
    endpoint: Option<&str>,
) -> Result<(), RegistryError> {
    if name.is_empty() {
        return Err(RegistryError::Invalid("name must not be empty".into()));
    }
    if !(MIN_CADENCE_SECS..=MAX_CADENCE_SECS).contains(&cadence_secs) {
        return Err(RegistryError::Invalid(format!(
            "cadence_secs must be within [{MIN_CADENCE_SECS}, {MAX_CADENCE_SECS}]"
        )));
    }
    if kind.requires_endpoint() {
        match endpoint.map(str::trim) {
            Some(e) if e.starts_with("http://") || e.starts_with("https://") => {}
            _ => {
                return Err(RegistryError::Invalid(format!(
                    "{} sources need an http(s) endpoint",
                    kind.as_str()
                )))
            }
        }
    }
    Ok(())
}

/// `now + by`, saturating at the far future.
fn later(now: DateTime<Utc>, by: Option<ChronoDuration>) -> DateTime<Utc> {
    by.and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn clean_opt(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for it in items {
        let t = it.trim();
        if !t.is_empty() && !out.iter().any(|o| o.eq_ignore_ascii_case(t)) {
            out.push(t.to_string());
        }
    }
    out
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn news(name: &str) -> NewSource {
        NewSource {
            name: name.into(),
            kind: SourceKind::News,
            cadence_secs: 600,
            credentials_ref: Some("NEWS_API_KEY".into()),
            query: vec![" acme ".into(), "ACME".into(), "".into(), "widgets".into()],
            endpoint: None,
        }
    }

    #[test]
    fn create_cleans_query_and_is_due_immediately() {
        let reg = SourceRegistry::new();
        let s = reg.create(news("Acme news"), t0()).unwrap();
        assert_eq!(s.query, vec!["acme", "widgets"]);
        assert_eq!(s.status, SourceStatus::Active);
        assert_eq!(reg.due(t0()).len(), 1);
    }

    #[test]
    fn rejects_short_cadence_and_missing_endpoint() {
        let reg = SourceRegistry::new();
        let mut bad = news("x");
        bad.cadence_secs = 5;
        assert!(matches!(reg.create(bad, t0()), Err(RegistryError::Invalid(_))));

        let rss = NewSource {
            name: "feed".into(),
            kind: SourceKind::Rss,
            cadence_secs: 600,
            credentials_ref: None,
            query: vec![],
            endpoint: Some("ftp://nope".into()),
        };
        assert!(matches!(reg.create(rss, t0()), Err(RegistryError::Invalid(_))));
    }

    #[test]
    fn rejects_oversized_cadence_on_create_and_update() {
        let reg = SourceRegistry::new();
        let mut bad = news("glacial");
        bad.cadence_secs = 10_000_000_000_000;
        assert!(matches!(reg.create(bad, t0()), Err(RegistryError::Invalid(_))));

        let s = reg.create(news("ok"), t0()).unwrap();
        let patch = SourcePatch {
            cadence_secs: Some(MAX_CADENCE_SECS + 1),
            ..Default::default()
        };
        assert!(matches!(reg.update(s.id, patch, t0()), Err(RegistryError::Invalid(_))));
        assert_eq!(reg.get(s.id).unwrap().cadence_secs, 600);
    }

    #[test]
    fn next_run_saturates_instead_of_overflowing() {
        let reg = SourceRegistry::new();
        let s = reg.create(news("a"), t0()).unwrap();
        reg.write().get_mut(&s.id).unwrap().cadence_secs = u64::MAX;
        let s = reg.record_success(s.id, t0()).unwrap();
        assert_eq!(s.next_run_at, Some(DateTime::<Utc>::MAX_UTC));
        assert!(reg.due(t0()).is_empty());
    }

    #[test]
    fn success_schedules_next_run_by_cadence() {
        let reg = SourceRegistry::new();
        let s = reg.create(news("a"), t0()).unwrap();
        let s = reg.record_success(s.id, t0()).unwrap();
        assert_eq!(s.next_run_at, Some(t0() + ChronoDuration::seconds(600)));
        assert!(reg.due(t0() + ChronoDuration::seconds(599)).is_empty());
        assert_eq!(reg.due(t0() + ChronoDuration::seconds(600)).len(), 1);
    }

    #[test]
    fn failure_sets_error_and_backs_off() {
        let reg = SourceRegistry::new();
        let policy = BackoffPolicy::new(30, 3600).without_jitter();
        let s = reg.create(news("a"), t0()).unwrap();
        reg.record_failure(s.id, "boom", t0(), &policy).unwrap();
        let s = reg.record_failure(s.id, "boom again", t0(), &policy).unwrap();
        assert_eq!(s.status, SourceStatus::Error);
        assert_eq!(s.consecutive_failures, 2);
        assert_eq!(s.next_run_at, Some(t0() + ChronoDuration::seconds(60)));
        assert_eq!(s.last_error.as_deref(), Some("boom again"));

        let s = reg.record_success(s.id, t0()).unwrap();
        assert_eq!(s.status, SourceStatus::Active);
        assert_eq!(s.consecutive_failures, 0);
    }

    #[test]
    fn paused_sources_are_never_due_and_pause_survives_success() {
        let reg = SourceRegistry::new();
        let s = reg.create(news("a"), t0()).unwrap();
        let patch = SourcePatch {
            status: Some(SourceStatus::Paused),
            ..Default::default()
        };
        reg.update(s.id, patch, t0()).unwrap();
        assert!(reg.due(t0()).is_empty());

        let s = reg.record_success(s.id, t0()).unwrap();
        assert_eq!(s.status, SourceStatus::Paused);
    }

    #[test]
    fn resume_clears_backoff() {
        let reg = SourceRegistry::new();
        let policy = BackoffPolicy::default();
        let s = reg.create(news("a"), t0()).unwrap();
        reg.record_failure(s.id, "x", t0(), &policy).unwrap();
        reg.update(
            s.id,
            SourcePatch { status: Some(SourceStatus::Paused), ..Default::default() },
            t0(),
        )
        .unwrap();
        let s = reg
            .update(
                s.id,
                SourcePatch { status: Some(SourceStatus::Active), ..Default::default() },
                t0(),
            )
            .unwrap();
        assert_eq!(s.consecutive_failures, 0);
        assert!(s.next_run_at.is_none());
    }

    #[test]
    fn users_cannot_set_error_status() {
        let reg = SourceRegistry::new();
        let s = reg.create(news("a"), t0()).unwrap();
        let r = reg.update(
            s.id,
            SourcePatch { status: Some(SourceStatus::Error), ..Default::default() },
            t0(),
        );
        assert!(matches!(r, Err(RegistryError::Invalid(_))));
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let reg = SourceRegistry::new();
        let id = Uuid::new_v4();
        assert_eq!(reg.delete(id).unwrap_err(), RegistryError::NotFound(id));
        assert!(reg.record_success(id, t0()).is_err());
    }

    #[test]
    fn seeds_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("sources.toml");
        std::fs::write(
            &p,
            r#"
[[sources]]
name = "Security feed"
kind = "rss"
cadence_secs = 900
endpoint = "https://example.test/feed.xml"

[[sources]]
name = "broken"
kind = "web"
cadence_secs = 900
"#,
        )
        .unwrap();
        let reg = SourceRegistry::new();
        assert_eq!(reg.seed_from_path(Some(&p), t0()).unwrap(), 1);
        assert_eq!(reg.list()[0].kind, SourceKind::Rss);
    }
}
