// src/analyze/trends.rs
//! Hourly term counts over a sliding 24h baseline.
//!
//! A term is trending when its count in the current hour is at least
//! `min_count` and at least `ratio` times its mean hourly count over the
//! preceding `baseline_hours` (the mean is floored at 1).

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

const BUCKET_SECS: i64 = 3600;

#[derive(Debug, Clone, Copy)]
pub struct TrendSettings {
    pub baseline_hours: u32,
    pub min_count: u32,
    pub ratio: f64,
}

impl Default for TrendSettings {
    fn default() -> Self {
        Self {
            baseline_hours: 24,
            min_count: 3,
            ratio: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trend {
    pub term: String,
    pub current: u32,
    /// Mean hourly count across the baseline hours.
    pub baseline: f64,
    pub ratio: f64,
}

#[derive(Debug)]
pub struct TrendTracker {
    settings: TrendSettings,
    /// bucket index (unix hour) -> term -> count
    buckets: Mutex<BTreeMap<i64, HashMap<String, u32>>>,
}

impl Default for TrendTracker {
    fn default() -> Self {
        Self::new(TrendSettings::default())
    }
}

impl TrendTracker {
    pub fn new(settings: TrendSettings) -> Self {
        Self {
            settings,
            buckets: Mutex::new(BTreeMap::new()),
        }
    }

    fn bucket(at: DateTime<Utc>) -> i64 {
        at.timestamp().div_euclid(BUCKET_SECS)
    }

    /// Count each term once for the hour containing `at`. Buckets older than
    /// the baseline relative to `at` are dropped.
    pub fn observe(&self, terms: &[String], at: DateTime<Utc>) {
        if terms.is_empty() {
            return;
        }
        let b = Self::bucket(at);
        let mut buckets = self.buckets.lock().unwrap_or_else(|p| p.into_inner());
        let slot = buckets.entry(b).or_default();
        for t in terms {
            *slot.entry(t.clone()).or_insert(0) += 1;
        }
        let oldest_kept = b - i64::from(self.settings.baseline_hours);
        buckets.retain(|k, _| *k >= oldest_kept);
    }

    /// Trending terms at `now`, strongest ratio first.
    pub fn trending(&self, now: DateTime<Utc>) -> Vec<Trend> {
        let current_bucket = Self::bucket(now);
        let hours = self.settings.baseline_hours.max(1);
        let first_baseline = current_bucket - i64::from(hours);

        let buckets = self.buckets.lock().unwrap_or_else(|p| p.into_inner());
        let Some(current) = buckets.get(&current_bucket) else {
            return Vec::new();
        };

        let mut baseline_totals: HashMap<&str, u32> = HashMap::new();
        for (_, terms) in buckets.range(first_baseline..current_bucket) {
            for (t, n) in terms {
                *baseline_totals.entry(t.as_str()).or_insert(0) += n;
            }
        }

        let mut out: Vec<Trend> = current
            .iter()
            .filter_map(|(term, &count)| {
                let total = baseline_totals.get(term.as_str()).copied().unwrap_or(0);
                let mean = f64::from(total) / f64::from(hours);
                let floor = mean.max(1.0);
                let ratio = f64::from(count) / floor;
                (count >= self.settings.min_count && ratio >= self.settings.ratio).then(|| Trend {
                    term: term.clone(),
                    current: count,
                    baseline: mean,
                    ratio,
                })
            })
            .collect();
        out.sort_by(|a, b| {
            b.ratio
                .total_cmp(&a.ratio)
                .then(b.current.cmp(&a.current))
                .then(a.term.cmp(&b.term))
        });
        out
    }

    pub fn is_trending(&self, term: &str, now: DateTime<Utc>) -> bool {
        self.trending(now).iter().any(|t| t.term == term)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn terms(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn burst_above_floor_is_trending() {
        let tr = TrendTracker::default();
        for _ in 0..3 {
            tr.observe(&terms(&["topic:cyber"]), t0());
        }
        let t = tr.trending(t0() + Duration::minutes(10));
        assert_eq!(t.len(), 1);
        assert_eq!(t[0].current, 3);
        assert_eq!(t[0].baseline, 0.0);
        assert_eq!(t[0].ratio, 3.0);
    }

    #[test]
    fn below_min_count_is_not_trending() {
        let tr = TrendTracker::default();
        tr.observe(&terms(&["x"]), t0());
        tr.observe(&terms(&["x"]), t0());
        assert!(tr.trending(t0()).is_empty());
    }

    #[test]
    fn steady_volume_is_not_trending() {
        let tr = TrendTracker::default();
        for h in 1..=24 {
            for _ in 0..4 {
                tr.observe(&terms(&["steady"]), t0() - Duration::hours(h));
            }
        }
        for _ in 0..5 {
            tr.observe(&terms(&["steady"]), t0());
        }
        // mean 4/h, 5 < 2 * 4
        assert!(!tr.is_trending("steady", t0()));

        for _ in 0..3 {
            tr.observe(&terms(&["steady"]), t0());
        }
        assert!(tr.is_trending("steady", t0()));
    }

    #[test]
    fn old_buckets_are_dropped() {
        let tr = TrendTracker::default();
        for _ in 0..3 {
            tr.observe(&terms(&["old"]), t0() - Duration::hours(48));
        }
        tr.observe(&terms(&["new"]), t0());
        assert_eq!(tr.buckets.lock().unwrap().len(), 1);
    }
}
