// src/collect/web.rs
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use super::{send_text, Collector, RawItem};
use crate::registry::{DataSource, SourceKind};

static RE_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("title regex"));
static RE_INVISIBLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(script|style|noscript|template|svg|head)\b[^>]*>.*?</(script|style|noscript|template|svg|head)>")
        .expect("invisible regex")
});
static RE_COMMENTS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").expect("comment regex"));
static RE_BODY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<body[^>]*>(.*)</body>").expect("body regex"));

/// Extract `<title>` and visible body text from a page. Returns `None` when
/// the page has neither.
pub fn extract_page(html: &str, url: &str) -> Option<RawItem> {
    let title = RE_TITLE
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();

    let without_comments = RE_COMMENTS.replace_all(html, " ");
    let visible = RE_INVISIBLE.replace_all(&without_comments, " ");
    let body = RE_BODY
        .captures(&visible)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| visible.to_string());

    if title.is_empty() && body.trim().is_empty() {
        return None;
    }
    Some(RawItem {
        external_id: Some(url.to_string()),
        title,
        text: body,
        url: Some(url.to_string()),
        author: None,
        published_at: None,
        raw: serde_json::json!({ "url": url, "bytes": html.len() }),
    })
}

pub struct WebPageCollector {
    client: reqwest::Client,
}

impl WebPageCollector {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Collector for WebPageCollector {
    fn kind(&self) -> SourceKind {
        SourceKind::Web
    }

    async fn collect(&self, source: &DataSource) -> Result<Vec<RawItem>> {
        let url = source
            .endpoint
            .as_deref()
            .ok_or_else(|| anyhow!("web source '{}' has no endpoint", source.name))?;
        let html = send_text(self.client.get(url), "web").await?;
        Ok(extract_page(&html, url).into_iter().collect())
    }
}
