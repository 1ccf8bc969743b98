// src/notify/email.rs
use anyhow::{Context, Result};
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use super::{details, headline, Notifier};
use crate::alerts::AlertEvent;

pub struct EmailSender {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl EmailSender {
    /// Needs SMTP_HOST, SMTP_USER, SMTP_PASS, NOTIFY_EMAIL_FROM, NOTIFY_EMAIL_TO.
    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let need = |k: &str| get(k).with_context(|| format!("{k} missing"));
        let host = need("SMTP_HOST")?;
        let user = need("SMTP_USER")?;
        let pass = need("SMTP_PASS")?;
        let from_addr = need("NOTIFY_EMAIL_FROM")?;
        let to_addr = need("NOTIFY_EMAIL_TO")?;

        let creds = Credentials::new(user, pass);
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
            .context("invalid SMTP_HOST")?
            .credentials(creds)
            .build();

        let from = from_addr.parse().context("invalid NOTIFY_EMAIL_FROM")?;
        let to = to_addr.parse().context("invalid NOTIFY_EMAIL_TO")?;

        Ok(Self { mailer, from, to })
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub(crate) fn build_message(&self, ev: &AlertEvent) -> Result<Message> {
        Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(format!("OSINT alert: {}", headline(ev)))
            .header(header::ContentType::TEXT_PLAIN)
            .body(format!("{}\n\n{}\n", headline(ev), details(ev)))
            .context("build email")
    }
}

#[async_trait::async_trait]
impl Notifier for EmailSender {
    fn channel(&self) -> &'static str {
        "email"
    }

    async fn send(&self, ev: &AlertEvent) -> Result<()> {
        let msg = self.build_message(ev)?;
        self.mailer.send(msg).await.context("send email")?;
        Ok(())
    }
}
