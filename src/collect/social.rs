// src/collect/social.rs
//! Twitter API v2 recent search.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;

use super::{require_credential, require_query, send_text, Collector, RawItem};
use crate::registry::{DataSource, SourceKind};

pub const DEFAULT_ENDPOINT: &str = "https://api.twitter.com/2/tweets/search/recent";
const MAX_RESULTS: &str = "100";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<Tweet>,
    #[serde(default)]
    includes: Option<Includes>,
    #[serde(default)]
    errors: Vec<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Tweet {
    id: String,
    text: String,
    created_at: Option<String>,
    author_id: Option<String>,
    #[serde(default)]
    public_metrics: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Includes {
    #[serde(default)]
    users: Vec<User>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: String,
    username: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Parse a recent-search response. A response with errors and no data is an
/// error; partial errors alongside data are ignored.
pub fn parse_tweets(body: &str) -> Result<Vec<RawItem>> {
    let resp: SearchResponse = serde_json::from_str(body).context("parsing twitter json")?;
    if resp.data.is_empty() {
        if let Some(e) = resp.errors.first() {
            let msg = e
                .detail
                .as_deref()
                .or(e.message.as_deref())
                .or(e.title.as_deref())
                .unwrap_or("unknown error");
            bail!("twitter api error: {msg}");
        }
    }

    let users: HashMap<String, String> = resp
        .includes
        .map(|i| i.users.into_iter().map(|u| (u.id, u.username)).collect())
        .unwrap_or_default();

    Ok(resp
        .data
        .into_iter()
        .map(|t| {
            let username = t.author_id.as_ref().and_then(|a| users.get(a)).cloned();
            let url = match &username {
                Some(u) => format!("https://twitter.com/{u}/status/{}", t.id),
                None => format!("https://twitter.com/i/web/status/{}", t.id),
            };
            RawItem {
                published_at: t
                    .created_at
                    .as_deref()
                    .and_then(|c| DateTime::parse_from_rfc3339(c).ok())
                    .map(|d| d.with_timezone(&Utc)),
                raw: serde_json::json!({
                    "author_id": t.author_id,
                    "public_metrics": t.public_metrics,
                }),
                external_id: Some(t.id),
                title: String::new(),
                text: t.text,
                url: Some(url),
                author: username,
            }
        })
        .collect())
}

pub struct TwitterCollector {
    client: reqwest::Client,
}

impl TwitterCollector {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Collector for TwitterCollector {
    fn kind(&self) -> SourceKind {
        SourceKind::SocialMedia
    }

    async fn collect(&self, source: &DataSource) -> Result<Vec<RawItem>> {
        let token = require_credential(source)?;
        let endpoint = source.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);

        let mut out = Vec::new();
        for term in require_query(source)? {
            let query = format!("{term} lang:en -is:retweet");
            let req = self.client.get(endpoint).bearer_auth(&token).query(&[
                ("query", query.as_str()),
                ("max_results", MAX_RESULTS),
                ("tweet.fields", "created_at,author_id,public_metrics,lang"),
                ("expansions", "author_id"),
                ("user.fields", "username"),
            ]);
            let body = send_text(req, "twitter").await?;
            out.extend(parse_tweets(&body)?);
        }
        Ok(out)
    }
}
