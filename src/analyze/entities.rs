// src/analyze/entities.rs
//! Entity extraction: social tokens (hashtags, mentions, cashtags),
//! organisations by legal suffix, multi-word proper nouns, plus configured
//! topic categories and watch-list patterns.
//!
//! Topics and watch lists come from `config/topics.toml` (or the path in
//! `TOPICS_CONFIG_PATH`):
//!
//! ```toml
//! [[topics]]
//! name = "cybersecurity"
//! keywords = ["breach", "ransomware"]
//!
//! [[watch]]
//! category = "threat_actor"
//! regex = "(?i)\\blazarus\\b"
//! keyword = "Lazarus Group"
//! ```

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;

use super::types::Entity;
use crate::config::files;

pub const KIND_HASHTAG: &str = "hashtag";
pub const KIND_MENTION: &str = "mention";
pub const KIND_CASHTAG: &str = "cashtag";
pub const KIND_ORGANIZATION: &str = "organization";
pub const KIND_PROPER_NOUN: &str = "proper_noun";
pub const KIND_TOPIC: &str = "topic";

static RE_HASHTAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[^\w&])#(\w{2,50})").expect("hashtag regex"));
static RE_MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[^\w.])@(\w{1,30})").expect("mention regex"));
static RE_CASHTAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\s)\$([A-Za-z]{1,5})\b").expect("cashtag regex"));
static RE_ORG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b((?:[A-Z][\w&'-]*\s+){0,3}[A-Z][\w&'-]*,?\s+(?:Inc|Corp|Corporation|Ltd|Limited|LLC|LLP|GmbH|PLC|plc|AG|SA|NV|BV|Co|Group|Holdings))\b\.?",
    )
    .expect("org regex")
});
static RE_PROPER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Z][a-z]+(?:\s+[A-Z][a-z]+)+)\b").expect("proper noun regex"));

/// Words that start sentences or headlines often enough to produce junk
/// proper-noun phrases.
const PROPER_STOPWORDS: &[&str] = &["The", "A", "An", "This", "That", "In", "On", "At", "New", "How", "Why", "What"];

#[derive(Debug, Clone, Deserialize)]
pub struct TopicDef {
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchDef {
    pub category: String,
    pub regex: String,
    pub keyword: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopicsFile {
    #[serde(default)]
    pub topics: Vec<TopicDef>,
    #[serde(default)]
    pub watch: Vec<WatchDef>,
}

struct Topic {
    name: String,
    /// Lower-cased single words and phrases.
    keywords: Vec<String>,
}

struct Watch {
    category: String,
    re: Regex,
    keyword: String,
}

pub struct TopicMatcher {
    topics: Vec<Topic>,
    watch: Vec<Watch>,
}

impl Default for TopicMatcher {
    fn default() -> Self {
        Self::from_file(default_topics())
    }
}

impl TopicMatcher {
    /// Load from `explicit`, then `config/topics.{toml,json}`, else the
    /// built-in categories. Invalid watch regexes are skipped with a warning.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let file = files::load_optional::<TopicsFile>(explicit, "topics")
            .context("loading topics config")?;
        Ok(match file {
            Some(f) if !f.topics.is_empty() || !f.watch.is_empty() => Self::from_file(f),
            _ => Self::default(),
        })
    }

    pub fn from_file(file: TopicsFile) -> Self {
        let topics = file
            .topics
            .into_iter()
            .map(|t| Topic {
                name: t.name,
                keywords: t.keywords.iter().map(|k| k.trim().to_lowercase()).filter(|k| !k.is_empty()).collect(),
            })
            .collect();
        let watch = file
            .watch
            .into_iter()
            .filter_map(|w| match Regex::new(&w.regex) {
                Ok(re) => Some(Watch { category: w.category, re, keyword: w.keyword }),
                Err(e) => {
                    tracing::warn!(category = %w.category, error = %e, "skipping invalid watch regex");
                    None
                }
            })
            .collect();
        Self { topics, watch }
    }

    /// Topic categories whose keywords occur in `text` (word-bounded,
    /// case-insensitive).
    pub fn categorize(&self, text: &str) -> Vec<String> {
        let words = word_set(text);
        let lower = text.to_lowercase();
        self.topics
            .iter()
            .filter(|t| {
                t.keywords.iter().any(|k| {
                    if k.contains(' ') {
                        lower.contains(k.as_str())
                    } else {
                        words.contains(k.as_str())
                    }
                })
            })
            .map(|t| t.name.clone())
            .collect()
    }

    /// All entities for a record, de-duplicated and sorted.
    pub fn extract(&self, text: &str) -> Vec<Entity> {
        let mut out: BTreeSet<(String, String)> = BTreeSet::new();

        for c in RE_HASHTAG.captures_iter(text) {
            out.insert((KIND_HASHTAG.into(), c[1].to_lowercase()));
        }
        for c in RE_MENTION.captures_iter(text) {
            out.insert((KIND_MENTION.into(), c[1].to_lowercase()));
        }
        for c in RE_CASHTAG.captures_iter(text) {
            out.insert((KIND_CASHTAG.into(), c[1].to_uppercase()));
        }

        let mut orgs: Vec<String> = Vec::new();
        for c in RE_ORG.captures_iter(text) {
            let org = strip_leading_stopwords(&c[1].replace(',', ""));
            if org.split_whitespace().count() < 2 {
                continue;
            }
            orgs.push(org.clone());
            out.insert((KIND_ORGANIZATION.into(), org));
        }
        for c in RE_PROPER.captures_iter(text) {
            let phrase = strip_leading_stopwords(&c[1]);
            if phrase.split_whitespace().count() < 2 || orgs.iter().any(|o| o.contains(&phrase)) {
                continue;
            }
            out.insert((KIND_PROPER_NOUN.into(), phrase));
        }

        for topic in self.categorize(text) {
            out.insert((KIND_TOPIC.into(), topic));
        }
        for w in &self.watch {
            if w.re.is_match(text) {
                out.insert((w.category.clone(), w.keyword.clone()));
            }
        }

        out.into_iter().map(|(k, v)| Entity::new(k, v)).collect()
    }
}

/// Terms tracked for trends: everything except raw mentions, lower-cased
/// and prefixed by kind so "acme" the hashtag and "acme" the topic differ.
pub fn trend_terms(entities: &[Entity]) -> Vec<String> {
    let mut terms: Vec<String> = entities
        .iter()
        .filter(|e| e.kind != KIND_MENTION)
        .map(|e| format!("{}:{}", e.kind, e.value.to_lowercase()))
        .collect();
    terms.sort();
    terms.dedup();
    terms
}

fn word_set(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

fn strip_leading_stopwords(phrase: &str) -> String {
    let mut words: Vec<&str> = phrase.split_whitespace().collect();
    while words.first().is_some_and(|w| PROPER_STOPWORDS.contains(w)) {
        words.remove(0);
    }
    words.join(" ")
}

/// Categories used when no topics file is configured.
pub fn default_topics() -> TopicsFile {
    let topic = |name: &str, kws: &[&str]| TopicDef {
        name: name.to_string(),
        keywords: kws.iter().map(|s| s.to_string()).collect(),
    };
    TopicsFile {
        topics: vec![
            topic(
                "cybersecurity",
                &["cybersecurity", "security", "hack", "hacked", "breach", "malware", "ransomware", "vulnerability", "exploit", "phishing"],
            ),
            topic(
                "artificial_intelligence",
                &["ai", "artificial intelligence", "machine learning", "neural", "deep learning", "llm", "chatgpt"],
            ),
            topic(
                "business",
                &["business", "company", "startup", "funding", "ipo", "acquisition", "merger", "earnings"],
            ),
            topic(
                "cloud_computing",
                &["cloud", "aws", "azure", "gcp", "kubernetes", "serverless", "saas"],
            ),
            topic(
                "general_tech",
                &["technology", "software", "hardware", "developer", "open source", "semiconductor"],
            ),
        ],
        watch: vec![],
    }
}
