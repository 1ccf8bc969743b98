// src/alerts/mod.rs
pub mod evaluator;
pub mod rules;

pub use evaluator::{AlertEvaluator, AlertEvent};
pub use rules::{AlertMetric, AlertRule, Comparator, NewAlertRule, Priority, RuleError};
