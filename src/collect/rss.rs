// src/collect/rss.rs
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::de::from_str;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

use super::{send_text, Collector, RawItem};
use crate::registry::{DataSource, SourceKind};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<String>,
    author: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    let dt = OffsetDateTime::parse(ts.trim(), &Rfc2822).ok()?;
    DateTime::from_timestamp(dt.unix_timestamp(), dt.nanosecond())
}

/// Parse an RSS 2.0 document into raw items. Items without title and
/// description are skipped.
pub fn parse_feed(xml: &str) -> Result<Vec<RawItem>> {
    let cleaned = scrub_html_entities_for_xml(xml);
    let rss: Rss = from_str(&cleaned).context("parsing rss xml")?;

    let mut out = Vec::with_capacity(rss.channel.items.len());
    for it in rss.channel.items {
        let title = it.title.unwrap_or_default();
        let text = it.description.unwrap_or_default();
        if title.trim().is_empty() && text.trim().is_empty() {
            continue;
        }
        let raw = serde_json::json!({
            "title": &title,
            "link": &it.link,
            "guid": &it.guid,
            "pubDate": &it.pub_date,
        });
        out.push(RawItem {
            external_id: it.guid.or_else(|| it.link.clone()),
            published_at: it.pub_date.as_deref().and_then(parse_rfc2822),
            title,
            text,
            url: it.link,
            author: it.author,
            raw,
        });
    }
    Ok(out)
}

/// quick-xml only knows the XML entities; feeds routinely carry HTML ones.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}

pub struct RssCollector {
    client: reqwest::Client,
}

impl RssCollector {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Collector for RssCollector {
    fn kind(&self) -> SourceKind {
        SourceKind::Rss
    }

    async fn collect(&self, source: &DataSource) -> Result<Vec<RawItem>> {
        let url = source
            .endpoint
            .as_deref()
            .ok_or_else(|| anyhow!("rss source '{}' has no endpoint", source.name))?;
        let body = send_text(self.client.get(url), "rss").await?;
        parse_feed(&body)
    }
}
