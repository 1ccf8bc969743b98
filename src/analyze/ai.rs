// src/analyze/ai.rs
//! OpenAI chat-completions sentiment scorer with a daily call budget.
//! Short texts, exhausted budgets and any remote failure fall back to the
//! lexicon scorer, so `analyze` never fails.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;

use super::sentiment::{LexiconSentiment, SentimentModel};
use super::types::{Sentiment, SentimentMethod};
use crate::config::settings::AiSettings;

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
/// Texts at or below this many characters go straight to the lexicon.
pub const MIN_AI_CHARS: usize = 100;
const MAX_INPUT_CHARS: usize = 4000;

const SYSTEM_PROMPT: &str = "You rate the sentiment of open-source intelligence snippets. \
Reply with JSON only: {\"score\": <number from -1 (very negative) to 1 (very positive)>}.";

#[derive(Debug)]
struct DailyBudget {
    day: NaiveDate,
    used: u32,
    limit: u32,
}

impl DailyBudget {
    fn try_take(&mut self, today: NaiveDate) -> bool {
        if self.day != today {
            self.day = today;
            self.used = 0;
        }
        if self.used >= self.limit {
            return false;
        }
        self.used += 1;
        true
    }
}

pub struct OpenAiSentiment {
    http: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
    budget: Mutex<DailyBudget>,
    fallback: LexiconSentiment,
}

impl OpenAiSentiment {
    pub fn new(api_key: String, model: String, daily_limit: u32) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            http,
            api_key,
            model,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            budget: Mutex::new(DailyBudget {
                day: Utc::now().date_naive(),
                used: 0,
                limit: daily_limit,
            }),
            fallback: LexiconSentiment::new(),
        })
    }

    /// Point at a different chat-completions endpoint (proxies, tests).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn take_budget(&self) -> bool {
        self.budget
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .try_take(Utc::now().date_naive())
    }

    async fn remote_score(&self, text: &str) -> anyhow::Result<f64> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let input: String = text.chars().take(MAX_INPUT_CHARS).collect();
        let req = Req {
            model: &self.model,
            messages: vec![
                Msg { role: "system", content: SYSTEM_PROMPT },
                Msg { role: "user", content: &input },
            ],
            temperature: 0.0,
            max_tokens: 20,
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?
            .error_for_status()?;
        let body: Resp = resp.json().await?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or_default();
        parse_score(content).ok_or_else(|| anyhow::anyhow!("unparseable model reply"))
    }
}

#[async_trait]
impl SentimentModel for OpenAiSentiment {
    async fn analyze(&self, text: &str) -> Sentiment {
        if text.chars().count() <= MIN_AI_CHARS || !self.take_budget() {
            return self.fallback.score(text);
        }
        match self.remote_score(text).await {
            Ok(score) => {
                counter!("analysis_ai_calls_total", "outcome" => "ok").increment(1);
                Sentiment::from_score(score, SentimentMethod::Openai)
            }
            Err(e) => {
                counter!("analysis_ai_calls_total", "outcome" => "error").increment(1);
                tracing::warn!(error = %e, "ai sentiment failed; using lexicon");
                self.fallback.score(text)
            }
        }
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

static RE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("number regex"));

/// Accepts `{"score": x}` or a bare number anywhere in the reply. Values
/// outside [-1, 1] are rejected rather than clamped.
pub fn parse_score(reply: &str) -> Option<f64> {
    #[derive(Deserialize)]
    struct Scored {
        score: f64,
    }
    let trimmed = reply
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let v = match serde_json::from_str::<Scored>(trimmed) {
        Ok(s) => s.score,
        Err(_) => RE_NUMBER.find(trimmed)?.as_str().parse().ok()?,
    };
    (v.is_finite() && (-1.0..=1.0).contains(&v)).then_some(v)
}

/// Lexicon unless AI scoring is enabled and a key is configured.
pub fn model_from_settings(ai: &AiSettings) -> std::sync::Arc<dyn SentimentModel> {
    match (ai.enabled, ai.api_key.clone()) {
        (true, Some(key)) => match OpenAiSentiment::new(key, ai.model.clone(), ai.daily_limit) {
            Ok(m) => {
                tracing::info!(model = %ai.model, daily_limit = ai.daily_limit, "ai sentiment enabled");
                std::sync::Arc::new(m)
            }
            Err(e) => {
                tracing::warn!(error = %e, "ai sentiment client failed to build; using lexicon");
                std::sync::Arc::new(LexiconSentiment::new())
            }
        },
        (true, None) => {
            tracing::warn!("AI_SENTIMENT_ENABLED is set but OPENAI_API_KEY is missing; using lexicon");
            std::sync::Arc::new(LexiconSentiment::new())
        }
        _ => std::sync::Arc::new(LexiconSentiment::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_and_bare_numbers() {
        assert_eq!(parse_score(r#"{"score": -0.75}"#), Some(-0.75));
        assert_eq!(parse_score("```json\n{\"score\": 0.2}\n```"), Some(0.2));
        assert_eq!(parse_score("Score: 0.4"), Some(0.4));
        assert_eq!(parse_score("7"), None);
        assert_eq!(parse_score("no idea"), None);
    }

    #[test]
    fn budget_resets_daily() {
        let d1 = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let d2 = d1.succ_opt().unwrap();
        let mut b = DailyBudget { day: d1, used: 0, limit: 2 };
        assert!(b.try_take(d1));
        assert!(b.try_take(d1));
        assert!(!b.try_take(d1));
        assert!(b.try_take(d2));
    }

    #[tokio::test]
    async fn short_text_never_calls_remote() {
        // Unroutable endpoint: any remote call would fall back anyway, but the
        // method tells us which path ran.
        let m = OpenAiSentiment::new("k".into(), "m".into(), 10)
            .unwrap()
            .with_endpoint("http://127.0.0.1:9/v1/chat/completions");
        let s = m.analyze("massive breach").await;
        assert_eq!(s.method, SentimentMethod::Lexicon);
        assert_eq!(m.budget.lock().unwrap().used, 0);
    }

    #[tokio::test]
    async fn remote_failure_falls_back_to_lexicon() {
        let m = OpenAiSentiment::new("k".into(), "m".into(), 10)
            .unwrap()
            .with_endpoint("http://127.0.0.1:9/v1/chat/completions");
        let long = "The ransomware attack caused a prolonged outage. ".repeat(5);
        let s = m.analyze(&long).await;
        assert_eq!(s.method, SentimentMethod::Lexicon);
        assert!(s.score < 0.0);
    }
}
