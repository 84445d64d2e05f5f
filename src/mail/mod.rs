//! Outbound mail: the [`MailSender`] capability, its implementations, message
//! templates and the background outbox that decouples sending from requests.

mod outbox;
mod templates;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

pub use outbox::{MailOutbox, OutboxWorker};
pub use templates::MailTemplates;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail transport failed: {0}")]
    Transport(String),

    #[error("mail relay rejected message with status {0}")]
    Rejected(u16),

    #[error("mail queue is full")]
    QueueFull,

    #[error("mail queue is closed")]
    QueueClosed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError>;
}

/// Writes messages to the log instead of delivering them.
#[derive(Debug, Clone)]
pub struct LogMailer {
    from: String,
}

impl LogMailer {
    pub fn new(from: impl Into<String>) -> Self {
        Self { from: from.into() }
    }
}

#[async_trait]
impl MailSender for LogMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        info!(from = %self.from, to = %mail.to, subject = %mail.subject, body = %mail.body, "mail (log transport)");
        Ok(())
    }
}

#[derive(Serialize)]
struct RelayPayload<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    body: &'a str,
}

/// Posts each message as JSON to an HTTP mail relay.
#[derive(Debug, Clone)]
pub struct HttpRelayMailer {
    client: reqwest::Client,
    endpoint: String,
    from: String,
}

impl HttpRelayMailer {
    /// `timeout` bounds each request so a stalled relay cannot hold up the outbox.
    pub fn new(
        endpoint: impl Into<String>,
        from: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, MailError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MailError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            from: from.into(),
        })
    }
}

#[async_trait]
impl MailSender for HttpRelayMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        let payload = RelayPayload {
            from: &self.from,
            to: &mail.to,
            subject: &mail.subject,
            body: &mail.body,
        };
        let res = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;
        if !res.status().is_success() {
            return Err(MailError::Rejected(res.status().as_u16()));
        }
        Ok(())
    }
}
