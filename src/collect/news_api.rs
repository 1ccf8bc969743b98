// src/collect/news_api.rs
//! News API (`/v2/everything`) adapter. One request per query term covering
//! the last seven days, newest first.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use super::{require_credential, require_query, send_text, Collector, RawItem};
use crate::registry::{DataSource, SourceKind};

pub const DEFAULT_ENDPOINT: &str = "https://newsapi.org/v2/everything";
const PAGE_SIZE: u32 = 100;
const LOOKBACK_DAYS: i64 = 7;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewsResponse {
    status: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    articles: Vec<Article>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Article {
    #[serde(default)]
    source: Option<ArticleSource>,
    author: Option<String>,
    title: Option<String>,
    description: Option<String>,
    url: Option<String>,
    published_at: Option<String>,
    content: Option<String>,
}

#[derive(Debug, Deserialize, serde::Serialize)]
struct ArticleSource {
    id: Option<String>,
    name: Option<String>,
}

/// Parse a News API response body.
pub fn parse_news_response(body: &str) -> Result<Vec<RawItem>> {
    let resp: NewsResponse = serde_json::from_str(body).context("parsing news api json")?;
    if resp.status != "ok" {
        bail!(
            "news api error {}: {}",
            resp.code.unwrap_or_default(),
            resp.message.unwrap_or_default()
        );
    }

    let mut out = Vec::with_capacity(resp.articles.len());
    for a in resp.articles {
        let title = a.title.unwrap_or_default();
        // Upstream blanks takedowns to "[Removed]".
        if title == "[Removed]" {
            continue;
        }
        let description = a.description.unwrap_or_default();
        let text = match a.content.as_deref() {
            Some(c) if !c.is_empty() && !description.contains(c) => {
                format!("{description} {}", strip_truncation_marker(c))
            }
            _ => description.clone(),
        };
        out.push(RawItem {
            external_id: a.url.clone(),
            published_at: a
                .published_at
                .as_deref()
                .and_then(|p| DateTime::parse_from_rfc3339(p).ok())
                .map(|d| d.with_timezone(&Utc)),
            raw: serde_json::json!({
                "source": a.source,
                "description": description,
            }),
            title,
            text,
            url: a.url,
            author: a.author,
        });
    }
    Ok(out)
}

/// Content excerpts end with "… [+1234 chars]".
fn strip_truncation_marker(s: &str) -> &str {
    match s.rfind("[+") {
        Some(i) if s.ends_with("chars]") => s[..i].trim_end(),
        _ => s,
    }
}

pub struct NewsApiCollector {
    client: reqwest::Client,
}

impl NewsApiCollector {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Collector for NewsApiCollector {
    fn kind(&self) -> SourceKind {
        SourceKind::News
    }

    async fn collect(&self, source: &DataSource) -> Result<Vec<RawItem>> {
        let key = require_credential(source)?;
        let endpoint = source.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);
        let from = (Utc::now() - Duration::days(LOOKBACK_DAYS))
            .format("%Y-%m-%d")
            .to_string();
        let page_size = PAGE_SIZE.to_string();

        let mut out = Vec::new();
        for term in require_query(source)? {
            let req = self
                .client
                .get(endpoint)
                .header("X-Api-Key", &key)
                .query(&[
                    ("q", term.as_str()),
                    ("from", from.as_str()),
                    ("sortBy", "publishedAt"),
                    ("language", "en"),
                    ("pageSize", page_size.as_str()),
                ]);
            let body = send_text(req, "news api").await?;
            out.extend(parse_news_response(&body)?);
        }
        Ok(out)
    }
}
