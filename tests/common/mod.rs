// tests/common/mod.rs
#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

use osint_pipeline::alerts::AlertEvent;
use osint_pipeline::collect::{Collector, CollectorSet, RawItem};
use osint_pipeline::config::AppConfig;
use osint_pipeline::notify::{Notifier, NotifierMux};
use osint_pipeline::registry::{DataSource, NewSource, SourceKind};
use osint_pipeline::{build_state_with, AppState};

pub const ADMIN_EMAIL: &str = "admin@example.test";
pub const ADMIN_PASSWORD: &str = "Admin-Passw0rd!";

/// Web collector whose output and failure mode tests control.
#[derive(Clone, Default)]
pub struct ScriptedCollector {
    pub items: Arc<Mutex<Vec<RawItem>>>,
    pub fail: Arc<AtomicBool>,
    pub calls: Arc<AtomicUsize>,
    pub running: Arc<AtomicUsize>,
    pub max_running: Arc<AtomicUsize>,
    pub delay: Duration,
}

impl ScriptedCollector {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn set_items(&self, items: Vec<RawItem>) {
        *self.items.lock().unwrap() = items;
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Collector for ScriptedCollector {
    fn kind(&self) -> SourceKind {
        SourceKind::Web
    }

    async fn collect(&self, _source: &DataSource) -> Result<Vec<RawItem>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now_running, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            bail!("upstream returned 503");
        }
        Ok(self.items.lock().unwrap().clone())
    }
}

/// Notifier that keeps every event it is handed.
#[derive(Default)]
pub struct RecordingNotifier {
    pub seen: Mutex<Vec<AlertEvent>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn channel(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, ev: &AlertEvent) -> Result<()> {
        self.seen.lock().unwrap().push(ev.clone());
        Ok(())
    }
}

pub async fn state_with(cfg: AppConfig, collector: ScriptedCollector, notifier: NotifierMux) -> AppState {
    build_state_with(cfg, CollectorSet::empty().with(collector), notifier)
        .await
        .expect("build state")
}

pub async fn test_state(collector: ScriptedCollector) -> AppState {
    state_with(AppConfig::for_tests(), collector, NotifierMux::empty()).await
}

pub fn web_source(name: &str) -> NewSource {
    NewSource {
        name: name.into(),
        kind: SourceKind::Web,
        cadence_secs: 300,
        credentials_ref: None,
        query: vec![],
        endpoint: Some(format!("https://{}.example.test/", name.replace(' ', "-"))),
    }
}

pub fn add_source(state: &AppState, name: &str) -> DataSource {
    state.registry.create(web_source(name), Utc::now()).expect("create source")
}

pub async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, HeaderMap, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(t) = token {
        req = req.header("authorization", format!("Bearer {t}"));
    }
    let req = match body {
        Some(b) => req
            .header("content-type", "application/json")
            .body(Body::from(b.to_string())),
        None => req.body(Body::empty()),
    }
    .expect("request");

    let resp = app.clone().oneshot(req).await.expect("response");
    let status = resp.status();
    let headers = resp.headers().clone();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.expect("body");
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, headers, json)
}

/// Returns `(access_token, refresh_token)`.
pub async fn login(app: &Router, email: &str, password: &str) -> (String, String) {
    let (status, _, body) = send(
        app,
        Method::POST,
        "/api/v1/auth/login",
        None,
        Some(serde_json::json!({ "email": email, "password": password })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "login failed: {body}");
    (
        body["data"]["access_token"].as_str().unwrap().to_string(),
        body["data"]["refresh_token"].as_str().unwrap().to_string(),
    )
}

pub async fn admin_token(app: &Router) -> String {
    login(app, ADMIN_EMAIL, ADMIN_PASSWORD).await.0
}
