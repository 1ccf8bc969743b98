// src/analyze/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

impl SentimentLabel {
    /// +/-0.1 cut-offs around neutral.
    pub fn from_score(score: f64) -> Self {
        if score > 0.1 {
            SentimentLabel::Positive
        } else if score < -0.1 {
            SentimentLabel::Negative
        } else {
            SentimentLabel::Neutral
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::Positive => "positive",
            SentimentLabel::Neutral => "neutral",
            SentimentLabel::Negative => "negative",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "positive" => Some(SentimentLabel::Positive),
            "neutral" => Some(SentimentLabel::Neutral),
            "negative" => Some(SentimentLabel::Negative),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentMethod {
    Lexicon,
    Openai,
}

impl SentimentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentMethod::Lexicon => "lexicon",
            SentimentMethod::Openai => "openai",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "lexicon" => Some(SentimentMethod::Lexicon),
            "openai" => Some(SentimentMethod::Openai),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sentiment {
    /// Polarity in [-1, 1].
    pub score: f64,
    pub label: SentimentLabel,
    /// In [0, 1].
    pub confidence: f64,
    pub method: SentimentMethod,
}

impl Sentiment {
    pub fn from_score(score: f64, method: SentimentMethod) -> Self {
        let score = if score.is_finite() { score.clamp(-1.0, 1.0) } else { 0.0 };
        Self {
            score,
            label: SentimentLabel::from_score(score),
            confidence: score.abs(),
            method,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity {
    /// `hashtag`, `mention`, `cashtag`, `organization`, `proper_noun`,
    /// `topic` or a configured watch-list category.
    pub kind: String,
    pub value: String,
}

impl Entity {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub id: Uuid,
    pub record_id: Uuid,
    pub source_id: Uuid,
    pub sentiment: Sentiment,
    pub entities: Vec<Entity>,
    pub trend_tags: Vec<String>,
    pub computed_at: DateTime<Utc>,
}
