// src/alerts/rules.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MIN_WINDOW_SECS: u64 = 60;
pub const MAX_WINDOW_SECS: u64 = 30 * 24 * 3600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertMetric {
    /// Mean sentiment score in [-1, 1].
    AvgSentiment,
    /// Share of negative analyses in [0, 1].
    NegativeShare,
    /// Number of analysed records.
    RecordVolume,
    /// Number of analysed records with an entity equal to `term`.
    Mentions { term: String },
}

impl AlertMetric {
    pub fn label(&self) -> String {
        match self {
            AlertMetric::AvgSentiment => "avg_sentiment".into(),
            AlertMetric::NegativeShare => "negative_share".into(),
            AlertMetric::RecordVolume => "record_volume".into(),
            AlertMetric::Mentions { term } => format!("mentions:{term}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Above,
    Below,
}

impl Comparator {
    pub fn holds(&self, observed: f64, threshold: f64) -> bool {
        match self {
            Comparator::Above => observed > threshold,
            Comparator::Below => observed < threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: Uuid,
    pub name: String,
    pub metric: AlertMetric,
    pub comparator: Comparator,
    pub threshold: f64,
    pub source_id: Option<Uuid>,
    pub window_secs: u64,
    pub min_samples: usize,
    pub priority: Priority,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

fn default_window() -> u64 {
    3600
}
fn default_min_samples() -> usize {
    1
}
fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewAlertRule {
    pub name: String,
    pub metric: AlertMetric,
    pub comparator: Comparator,
    pub threshold: f64,
    #[serde(default)]
    pub source_id: Option<Uuid>,
    #[serde(default = "default_window")]
    pub window_secs: u64,
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RuleError {
    #[error("alert rule {0} not found")]
    NotFound(Uuid),
    #[error("invalid alert rule: {0}")]
    Invalid(String),
}

impl NewAlertRule {
    pub fn validate(&self) -> Result<(), RuleError> {
        let invalid = |m: &str| Err(RuleError::Invalid(m.to_string()));
        if self.name.trim().is_empty() {
            return invalid("name must not be empty");
        }
        if !self.threshold.is_finite() {
            return invalid("threshold must be a finite number");
        }
        if !(MIN_WINDOW_SECS..=MAX_WINDOW_SECS).contains(&self.window_secs) {
            return Err(RuleError::Invalid(format!(
                "window_secs must be within [{MIN_WINDOW_SECS}, {MAX_WINDOW_SECS}]"
            )));
        }
        match &self.metric {
            AlertMetric::AvgSentiment if !(-1.0..=1.0).contains(&self.threshold) => {
                invalid("avg_sentiment threshold must be within [-1, 1]")
            }
            AlertMetric::NegativeShare if !(0.0..=1.0).contains(&self.threshold) => {
                invalid("negative_share threshold must be within [0, 1]")
            }
            AlertMetric::RecordVolume | AlertMetric::Mentions { .. } if self.threshold < 0.0 => {
                invalid("count thresholds must not be negative")
            }
            AlertMetric::Mentions { term } if term.trim().is_empty() => {
                invalid("mentions term must not be empty")
            }
            _ => Ok(()),
        }
    }

    pub fn into_rule(self, now: DateTime<Utc>) -> Result<AlertRule, RuleError> {
        self.validate()?;
        let metric = match self.metric {
            AlertMetric::Mentions { term } => AlertMetric::Mentions {
                term: term.trim().to_string(),
            },
            m => m,
        };
        Ok(AlertRule {
            id: Uuid::new_v4(),
            name: self.name.trim().to_string(),
            metric,
            comparator: self.comparator,
            threshold: self.threshold,
            source_id: self.source_id,
            window_secs: self.window_secs,
            min_samples: self.min_samples,
            priority: self.priority,
            enabled: self.enabled,
            created_at: now,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RulesFile {
    Table { rules: Vec<NewAlertRule> },
    List(Vec<NewAlertRule>),
}

impl RulesFile {
    pub(crate) fn into_rules(self) -> Vec<NewAlertRule> {
        match self {
            RulesFile::Table { rules } => rules,
            RulesFile::List(v) => v,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(metric: AlertMetric, threshold: f64) -> NewAlertRule {
        NewAlertRule {
            name: "r".into(),
            metric,
            comparator: Comparator::Above,
            threshold,
            source_id: None,
            window_secs: 3600,
            min_samples: 1,
            priority: Priority::High,
            enabled: true,
        }
    }

    #[test]
    fn thresholds_are_range_checked_per_metric() {
        assert!(rule(AlertMetric::AvgSentiment, 0.5).validate().is_ok());
        assert!(rule(AlertMetric::AvgSentiment, 1.5).validate().is_err());
        assert!(rule(AlertMetric::NegativeShare, -0.1).validate().is_err());
        assert!(rule(AlertMetric::RecordVolume, 100.0).validate().is_ok());
        assert!(rule(AlertMetric::Mentions { term: " ".into() }, 1.0).validate().is_err());
        assert!(rule(AlertMetric::RecordVolume, f64::NAN).validate().is_err());
    }

    #[test]
    fn short_window_is_rejected() {
        let mut r = rule(AlertMetric::RecordVolume, 1.0);
        r.window_secs = 10;
        assert!(matches!(r.validate(), Err(RuleError::Invalid(_))));
    }

    #[test]
    fn oversized_window_is_rejected() {
        let mut r = rule(AlertMetric::RecordVolume, 1.0);
        r.window_secs = 10_000_000_000_000;
        assert!(matches!(r.validate(), Err(RuleError::Invalid(_))));
        r.window_secs = MAX_WINDOW_SECS;
        assert!(r.validate().is_ok());
    }

    #[test]
    fn comparator_is_strict() {
        assert!(Comparator::Above.holds(0.6, 0.5));
        assert!(!Comparator::Above.holds(0.5, 0.5));
        assert!(Comparator::Below.holds(-0.6, -0.5));
    }

    #[test]
    fn parses_toml_rules_with_defaults() {
        let f: RulesFile = toml::from_str(
            r#"
[[rules]]
name = "Negative spike"
metric = { type = "negative_share" }
comparator = "above"
threshold = 0.6
min_samples = 5

[[rules]]
name = "Acme chatter"
metric = { type = "mentions", term = "acme" }
comparator = "above"
threshold = 10
priority = "critical"
"#,
        )
        .unwrap();
        let rules = f.into_rules();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].window_secs, 3600);
        assert_eq!(rules[0].priority, Priority::Medium);
        assert_eq!(rules[1].metric, AlertMetric::Mentions { term: "acme".into() });
        assert!(rules[1].enabled);
    }
}
