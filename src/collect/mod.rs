// src/collect/mod.rs
//! Collector adapters: one per `SourceKind`, each turning an upstream response
//! into `RawItem`s. Every adapter keeps its parsing in a pure `parse_*`
//! function so fixtures can be tested without the network.

pub mod company;
pub mod news_api;
pub mod rss;
pub mod social;
pub mod web;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_histogram};
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::registry::{DataSource, SourceKind};

pub const MAX_TEXT_CHARS: usize = 1500;

/// One upstream item before fingerprinting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawItem {
    pub external_id: Option<String>,
    pub title: String,
    pub text: String,
    pub url: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl RawItem {
    pub fn new(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            external_id: None,
            title: title.into(),
            text: text.into(),
            url: None,
            author: None,
            published_at: None,
            raw: serde_json::Value::Null,
        }
    }
}

#[async_trait]
pub trait Collector: Send + Sync {
    fn kind(&self) -> SourceKind;
    async fn collect(&self, source: &DataSource) -> Result<Vec<RawItem>>;
}

/// Adapters keyed by the source kind they serve.
#[derive(Clone, Default)]
pub struct CollectorSet {
    by_kind: HashMap<SourceKind, Arc<dyn Collector>>,
}

impl CollectorSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// All built-in HTTP adapters sharing one client.
    pub fn http() -> Result<Self> {
        let client = http_client()?;
        Ok(Self::empty()
            .with(news_api::NewsApiCollector::new(client.clone()))
            .with(social::TwitterCollector::new(client.clone()))
            .with(rss::RssCollector::new(client.clone()))
            .with(company::OpenCorporatesCollector::new(client.clone()))
            .with(web::WebPageCollector::new(client)))
    }

    /// Register (or replace) the adapter for its kind.
    pub fn with<C: Collector + 'static>(mut self, c: C) -> Self {
        self.by_kind.insert(c.kind(), Arc::new(c));
        self
    }

    pub fn get(&self, kind: SourceKind) -> Option<Arc<dyn Collector>> {
        self.by_kind.get(&kind).cloned()
    }

    pub async fn collect(&self, source: &DataSource) -> Result<Vec<RawItem>> {
        ensure_metrics_described();
        let collector = self
            .get(source.kind)
            .ok_or_else(|| anyhow!("no collector registered for kind {}", source.kind.as_str()))?;

        let t0 = std::time::Instant::now();
        let result = collector.collect(source).await;
        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        metrics::histogram!("collect_duration_ms", "kind" => source.kind.as_str()).record(ms);

        match &result {
            Ok(items) => {
                counter!("collect_items_total", "kind" => source.kind.as_str())
                    .increment(items.len() as u64);
            }
            Err(e) => {
                counter!("collect_errors_total", "kind" => source.kind.as_str()).increment(1);
                tracing::warn!(source_id = %source.id, kind = source.kind.as_str(), error = %e, "collector error");
            }
        }
        result
    }
}

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("collect_items_total", "Items returned by collector adapters.");
        describe_counter!("collect_errors_total", "Collector fetch/parse errors.");
        describe_histogram!("collect_duration_ms", "Collector run time in milliseconds.");
    });
}

pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(concat!("osint-pipeline/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("building http client")
}

/// Credential for adapters that cannot work without one.
pub(crate) fn require_credential(source: &DataSource) -> Result<String> {
    let Some(var) = source.credentials_ref.as_deref() else {
        bail!("source '{}' has no credentials_ref", source.name);
    };
    source
        .credential()
        .ok_or_else(|| anyhow!("credential env var {var} is not set"))
}

pub(crate) fn require_query(source: &DataSource) -> Result<&[String]> {
    if source.query.is_empty() {
        bail!("source '{}' has no query terms", source.name);
    }
    Ok(&source.query)
}

/// Send a request and return the body, turning non-2xx into an error that
/// carries a short excerpt of the response.
pub(crate) async fn send_text(req: reqwest::RequestBuilder, what: &str) -> Result<String> {
    let resp = req.send().await.with_context(|| format!("{what}: request failed"))?;
    let status = resp.status();
    let body = resp
        .text()
        .await
        .with_context(|| format!("{what}: reading body"))?;
    if !status.is_success() {
        let excerpt: String = body.chars().take(200).collect();
        bail!("{what}: HTTP {status}: {excerpt}");
    }
    Ok(body)
}

static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("ws regex"));

/// Normalize text: decode entities, strip tags, fold quotes, collapse
/// whitespace, trim trailing punctuation, cap length.
pub fn normalize_text(s: &str) -> String {
    let decoded = html_escape::decode_html_entities(s);
    let mut out = RE_TAGS.replace_all(&decoded, " ").into_owned();

    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    out = RE_WS.replace_all(&out, " ").trim().to_string();

    while let Some(last) = out.chars().last() {
        if matches!(last, '!' | '?' | '.' | ',') {
            out.pop();
        } else {
            break;
        }
    }

    if out.chars().count() > MAX_TEXT_CHARS {
        out = out.chars().take(MAX_TEXT_CHARS).collect();
        out.truncate(out.trim_end().len());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_collapses_ws_and_punct() {
        assert_eq!(normalize_text("  Hello,&nbsp;&nbsp; world!!!  "), "Hello, world");
    }

    #[test]
    fn normalize_text_strips_tags_and_folds_quotes() {
        let out = normalize_text("<p>\u{201C}Breach\u{201D} at <b>Acme</b></p>");
        assert_eq!(out, "\"Breach\" at Acme");
    }

    #[test]
    fn normalize_text_caps_length() {
        let long = "a ".repeat(2000);
        assert!(normalize_text(&long).chars().count() <= MAX_TEXT_CHARS);
    }

    struct Fixed(Vec<RawItem>);

    #[async_trait]
    impl Collector for Fixed {
        fn kind(&self) -> SourceKind {
            SourceKind::Web
        }
        async fn collect(&self, _source: &DataSource) -> Result<Vec<RawItem>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn set_dispatches_by_kind_and_reports_missing_adapter() {
        let reg = crate::registry::SourceRegistry::new();
        let web = reg
            .create(
                crate::registry::NewSource {
                    name: "page".into(),
                    kind: SourceKind::Web,
                    cadence_secs: 600,
                    credentials_ref: None,
                    query: vec![],
                    endpoint: Some("https://example.test".into()),
                },
                Utc::now(),
            )
            .unwrap();
        let set = CollectorSet::empty().with(Fixed(vec![RawItem::new("t", "x")]));
        assert_eq!(set.collect(&web).await.unwrap().len(), 1);

        let mut news = web.clone();
        news.kind = SourceKind::News;
        assert!(set.collect(&news).await.is_err());
    }
}
