// src/analyze/sentiment.rs
use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::collections::HashMap;

use super::types::{Sentiment, SentimentMethod};

static LEXICON: Lazy<HashMap<String, i32>> = Lazy::new(|| {
    let raw = include_str!("../../sentiment_lexicon.json");
    serde_json::from_str::<HashMap<String, i32>>(raw).unwrap_or_else(|e| {
        tracing::error!(error = %e, "sentiment lexicon is not valid JSON; scoring everything neutral");
        HashMap::new()
    })
});

/// Normalisation constant for `s / sqrt(s^2 + ALPHA)`.
const ALPHA: f64 = 15.0;

#[async_trait]
pub trait SentimentModel: Send + Sync {
    async fn analyze(&self, text: &str) -> Sentiment;
    fn name(&self) -> &'static str;
}

/// Negation-aware lexicon scorer.
#[derive(Debug, Clone, Default)]
pub struct LexiconSentiment;

impl LexiconSentiment {
    pub fn new() -> Self {
        Self
    }

    /// Raw lexicon sum and token count. A negator among the previous three
    /// tokens flips the sign of a word's score.
    pub fn raw_score(&self, text: &str) -> (i32, usize) {
        let tokens: Vec<String> = tokenize(text).collect();
        let mut score: i32 = 0;

        for (i, tok) in tokens.iter().enumerate() {
            let base = *LEXICON.get(tok.as_str()).unwrap_or(&0);
            if base == 0 {
                continue;
            }
            let negated = (1..=3).any(|k| i >= k && is_negator(tokens[i - k].as_str()));
            score += if negated { -base } else { base };
        }

        (score, tokens.len())
    }

    pub fn score(&self, text: &str) -> Sentiment {
        let (raw, _) = self.raw_score(text);
        Sentiment::from_score(normalize(raw), SentimentMethod::Lexicon)
    }
}

#[async_trait]
impl SentimentModel for LexiconSentiment {
    async fn analyze(&self, text: &str) -> Sentiment {
        self.score(text)
    }

    fn name(&self) -> &'static str {
        "lexicon"
    }
}

/// Map an unbounded lexicon sum into (-1, 1).
pub fn normalize(raw: i32) -> f64 {
    let s = f64::from(raw);
    s / (s * s + ALPHA).sqrt()
}

/// Lower-cased alphanumeric tokens; apostrophes stay inside words so
/// contractions like "isn't" survive.
fn tokenize(s: &str) -> impl Iterator<Item = String> + '_ {
    s.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|t| t.trim_matches('\''))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

fn is_negator(tok: &str) -> bool {
    matches!(
        tok,
        "not"
            | "no"
            | "never"
            | "isn't"
            | "wasn't"
            | "aren't"
            | "weren't"
            | "won't"
            | "can't"
            | "cannot"
            | "don't"
            | "doesn't"
            | "didn't"
            | "without"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::types::SentimentLabel;

    #[test]
    fn negative_incident_text() {
        let s = LexiconSentiment::new().score("Ransomware attack causes outage at Acme");
        assert_eq!(s.label, SentimentLabel::Negative);
        assert!(s.score < -0.9 && s.score >= -1.0);
        assert!((s.confidence - s.score.abs()).abs() < 1e-12);
    }

    #[test]
    fn negation_flips_sign() {
        let lex = LexiconSentiment::new();
        assert!(lex.raw_score("the launch was successful").0 > 0);
        assert!(lex.raw_score("the launch was not successful").0 < 0);
        assert!(lex.raw_score("it isn't secure").0 < 0);
    }

    #[test]
    fn unknown_words_are_neutral() {
        let s = LexiconSentiment::new().score("quarterly meeting scheduled for tuesday");
        assert_eq!(s.score, 0.0);
        assert_eq!(s.label, SentimentLabel::Neutral);
    }

    #[test]
    fn normalize_is_bounded_and_odd() {
        assert_eq!(normalize(0), 0.0);
        assert!((normalize(1) - 1.0 / 16f64.sqrt()).abs() < 1e-12);
        assert_eq!(normalize(-7), -normalize(7));
        assert!(normalize(10_000) < 1.0);
    }
}
