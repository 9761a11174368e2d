use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::templates::{MessageTemplate, TemplateData};
use crate::directory::Recipient;

pub const SENDGRID_ENDPOINT: &str = "https://api.sendgrid.com/v3/mail/send";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("mail request failed: {0}")]
    Http(String),

    #[error("mail provider rejected the message with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

/// A file sent along with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub to: Recipient,
    pub subject: String,
    pub template: MessageTemplate,
    pub data: TemplateData,
    /// Additional addresses copied on the message
    pub cc: Vec<String>,
    pub attachments: Vec<Attachment>,
}

impl OutgoingMessage {
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.to.email.trim().is_empty() {
            return Err(TransportError::InvalidMessage(format!(
                "user {} has no email address",
                self.to.id
            )));
        }
        if self.subject.trim().is_empty() {
            return Err(TransportError::InvalidMessage("empty subject".into()));
        }
        Ok(())
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn send(&self, message: &OutgoingMessage) -> Result<(), TransportError>;
}

/// Delivers mail through the SendGrid v3 HTTP API.
#[derive(Clone)]
pub struct SendGridTransport {
    client: reqwest::Client,
    api_key: String,
    sender_email: String,
    sender_name: String,
    endpoint: String,
}

impl SendGridTransport {
    pub fn new(
        api_key: impl Into<String>,
        sender_email: impl Into<String>,
        sender_name: impl Into<String>,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            sender_email: sender_email.into(),
            sender_name: sender_name.into(),
            endpoint: SENDGRID_ENDPOINT.to_string(),
        })
    }

    /// Points the transport at another endpoint, e.g. a sandbox.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn payload(&self, message: &OutgoingMessage) -> Value {
        sendgrid_payload(&self.sender_email, &self.sender_name, message)
    }
}

/// Request body for SendGrid's `mail/send`.
pub fn sendgrid_payload(sender_email: &str, sender_name: &str, message: &OutgoingMessage) -> Value {
    let mut personalization = json!({
        "to": [{ "email": message.to.email, "name": message.to.name }],
    });
    let cc: Vec<Value> = message
        .cc
        .iter()
        .filter(|address| {
            !address.trim().is_empty() && !address.eq_ignore_ascii_case(&message.to.email)
        })
        .map(|address| json!({ "email": address }))
        .collect();
    if !cc.is_empty() {
        personalization["cc"] = Value::Array(cc);
    }

    let mut payload = json!({
        "personalizations": [personalization],
        "from": { "email": sender_email, "name": sender_name },
        "subject": message.subject,
        "content": [{
            "type": "text/html",
            "value": message.template.render(&message.data),
        }],
    });

    if !message.attachments.is_empty() {
        payload["attachments"] = message
            .attachments
            .iter()
            .map(|a| {
                json!({
                    "content": STANDARD.encode(&a.data),
                    "type": a.content_type,
                    "filename": a.filename,
                    "disposition": "attachment",
                })
            })
            .collect();
    }
    payload
}

#[async_trait]
impl NotificationTransport for SendGridTransport {
    #[instrument(skip(self, message), fields(to = %message.to.email, template = %message.template))]
    async fn send(&self, message: &OutgoingMessage) -> Result<(), TransportError> {
        message.validate()?;

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.payload(message))
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            info!(subject = %message.subject, "Mail accepted by SendGrid");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), body = %body, "SendGrid rejected mail");
        Err(TransportError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

/// Writes messages to the log instead of sending them. Used in development.
#[derive(Debug, Clone, Default)]
pub struct LogTransport;

#[async_trait]
impl NotificationTransport for LogTransport {
    async fn send(&self, message: &OutgoingMessage) -> Result<(), TransportError> {
        message.validate()?;
        info!(
            to = %message.to.email,
            cc = ?message.cc,
            subject = %message.subject,
            template = %message.template,
            attachments = message.attachments.len(),
            "Mail (log transport)"
        );
        debug!(body = %message.template.render(&message.data), "Mail body");
        Ok(())
    }
}
