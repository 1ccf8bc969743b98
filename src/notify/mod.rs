// src/notify/mod.rs
//! Alert fan-out to Slack, Discord and email. Delivery failures are logged
//! and counted; they never reach the caller.

pub mod discord;
pub mod email;
pub mod slack;

use anyhow::Result;
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use std::sync::Arc;

use crate::alerts::AlertEvent;
pub use discord::DiscordNotifier;
pub use email::EmailSender;
pub use slack::SlackNotifier;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("notify_sent_total", "Alert notifications delivered, by channel.");
        describe_counter!("notify_errors_total", "Alert notifications that failed, by channel.");
    });
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    fn channel(&self) -> &'static str;
    async fn send(&self, ev: &AlertEvent) -> Result<()>;
}

/// One-line human summary shared by every channel.
pub fn headline(ev: &AlertEvent) -> String {
    format!(
        "[{:?}] {}: {} {:.3} ({} {:.3})",
        ev.priority,
        ev.rule_name,
        ev.metric,
        ev.observed,
        match ev.comparator {
            crate::alerts::Comparator::Above => "above",
            crate::alerts::Comparator::Below => "below",
        },
        ev.threshold
    )
}

pub fn details(ev: &AlertEvent) -> String {
    let scope = ev
        .source_id
        .map(|s| s.to_string())
        .unwrap_or_else(|| "all sources".into());
    format!(
        "Samples: {}\nScope: {}\nWindow: {} .. {}\nTriggered: {}",
        ev.samples,
        scope,
        ev.window_start.to_rfc3339(),
        ev.window_end.to_rfc3339(),
        ev.triggered_at.to_rfc3339()
    )
}

#[derive(Clone, Default)]
pub struct NotifierMux {
    channels: Vec<Arc<dyn Notifier>>,
}

impl NotifierMux {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with(mut self, n: Arc<dyn Notifier>) -> Self {
        self.channels.push(n);
        self
    }

    /// Enable every channel whose environment is configured.
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| get(k).filter(|v| !v.trim().is_empty());
        let mut mux = Self::empty();

        if let Some(url) = get("SLACK_WEBHOOK_URL") {
            mux = mux.with(Arc::new(SlackNotifier::new(url)));
        }
        if let Some(url) = get("DISCORD_WEBHOOK_URL") {
            mux = mux.with(Arc::new(DiscordNotifier::new(url)));
        }
        if get("SMTP_HOST").is_some() {
            match EmailSender::from_lookup(&get) {
                Ok(sender) => mux = mux.with(Arc::new(sender)),
                Err(e) => tracing::warn!(error = %e, "email notifications disabled"),
            }
        }

        tracing::info!(channels = ?mux.channel_names(), "notifier initialised");
        mux
    }

    pub fn channel_names(&self) -> Vec<&'static str> {
        self.channels.iter().map(|c| c.channel()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Deliver to every channel. Returns how many channels accepted the event.
    pub async fn notify(&self, ev: &AlertEvent) -> usize {
        ensure_metrics_described();
        if self.channels.is_empty() {
            tracing::info!(rule_id = %ev.rule_id, "alert (no channels): {}", headline(ev));
            return 0;
        }
        let mut delivered = 0;
        for ch in &self.channels {
            match ch.send(ev).await {
                Ok(()) => {
                    delivered += 1;
                    counter!("notify_sent_total", "channel" => ch.channel()).increment(1);
                }
                Err(e) => {
                    counter!("notify_errors_total", "channel" => ch.channel()).increment(1);
                    tracing::warn!(
                        channel = ch.channel(),
                        rule_id = %ev.rule_id,
                        error = %e,
                        "alert notification failed"
                    );
                }
            }
        }
        delivered
    }

    pub async fn notify_all(&self, events: &[AlertEvent]) -> usize {
        let mut n = 0;
        for ev in events {
            n += self.notify(ev).await;
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{Comparator, Priority};
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct Counting(AtomicUsize, bool);

    #[async_trait::async_trait]
    impl Notifier for Counting {
        fn channel(&self) -> &'static str {
            "counting"
        }
        async fn send(&self, _ev: &AlertEvent) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            if self.1 {
                anyhow::bail!("boom")
            }
            Ok(())
        }
    }

    fn event() -> AlertEvent {
        let now = Utc::now();
        AlertEvent {
            id: Uuid::new_v4(),
            rule_id: Uuid::new_v4(),
            rule_name: "Negative spike".into(),
            metric: "negative_share".into(),
            comparator: Comparator::Above,
            observed: 0.75,
            threshold: 0.6,
            samples: 8,
            window_start: now,
            window_end: now,
            source_id: None,
            priority: Priority::High,
            triggered_at: now,
            is_read: false,
        }
    }

    #[tokio::test]
    async fn failures_are_swallowed() {
        let ok = Arc::new(Counting(AtomicUsize::new(0), false));
        let bad = Arc::new(Counting(AtomicUsize::new(0), true));
        let mux = NotifierMux::empty().with(bad.clone()).with(ok.clone());
        assert_eq!(mux.notify(&event()).await, 1);
        assert_eq!(ok.0.load(Ordering::SeqCst), 1);
        assert_eq!(bad.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn only_configured_channels_are_enabled() {
        let env: HashMap<&str, &str> = [
            ("SLACK_WEBHOOK_URL", "https://hooks.example/slack"),
            ("DISCORD_WEBHOOK_URL", "  "),
            // incomplete SMTP config disables email instead of panicking
            ("SMTP_HOST", "smtp.example.test"),
        ]
        .into_iter()
        .collect();
        let mux = NotifierMux::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(mux.channel_names(), vec!["slack"]);
    }

    #[test]
    fn headline_mentions_rule_and_values() {
        let h = headline(&event());
        assert!(h.contains("Negative spike"));
        assert!(h.contains("0.750 (above 0.600)"));
    }
}
