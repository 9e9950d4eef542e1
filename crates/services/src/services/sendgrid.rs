//! SendGrid v3 mail client and the `EmailSender` seam the notification services send through.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::config::SendGridConfig;

const SENDGRID_API_URL: &str = "https://api.sendgrid.com/v3/mail/send";

#[derive(Debug, Clone, Error)]
pub enum SendGridError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("rate limited")]
    RateLimited,
    #[error("invalid api key")]
    InvalidApiKey,
    #[error("email delivery is not configured: SENDGRID_API_KEY is not set")]
    NotConfigured,
}

impl SendGridError {
    /// Returns true if the error is transient and should be retried.
    pub fn should_retry(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout | Self::RateLimited => true,
            Self::Http { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }
}

/// One outgoing email to a single recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to_email: String,
    pub to_name: Option<String>,
    pub subject: String,
    pub text: String,
    pub html: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub message_id: Option<String>,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<SentEmail, SendGridError>;

    /// False when messages are dropped instead of delivered.
    fn is_enabled(&self) -> bool;
}

#[derive(Debug, Serialize)]
struct Address<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct Personalization<'a> {
    to: Vec<Address<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    content_type: &'static str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct MailSendRequest<'a> {
    personalizations: Vec<Personalization<'a>>,
    from: Address<'a>,
    subject: &'a str,
    content: Vec<Content<'a>>,
}

impl<'a> MailSendRequest<'a> {
    fn new(from_email: &'a str, from_name: &'a str, message: &'a EmailMessage) -> Self {
        Self {
            personalizations: vec![Personalization {
                to: vec![Address {
                    email: &message.to_email,
                    name: message.to_name.as_deref(),
                }],
            }],
            from: Address {
                email: from_email,
                name: Some(from_name),
            },
            subject: &message.subject,
            content: vec![
                Content {
                    content_type: "text/plain",
                    value: &message.text,
                },
                Content {
                    content_type: "text/html",
                    value: &message.html,
                },
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub struct SendGridClient {
    http: Client,
    api_key: SecretString,
    from_email: String,
    from_name: String,
}

impl SendGridClient {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(
        api_key: SecretString,
        from_email: String,
        from_name: String,
    ) -> Result<Self, SendGridError> {
        // reqwest is built without a bundled crypto provider
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let http = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .user_agent(concat!("qsights/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SendGridError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            api_key,
            from_email,
            from_name,
        })
    }

    async fn send_request(&self, message: &EmailMessage) -> Result<SentEmail, SendGridError> {
        let body = MailSendRequest::new(&self.from_email, &self.from_name, message);
        let res = self
            .http
            .post(SENDGRID_API_URL)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        match res.status() {
            s if s.is_success() => Ok(SentEmail {
                message_id: res
                    .headers()
                    .get("x-message-id")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string),
            }),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SendGridError::InvalidApiKey),
            StatusCode::TOO_MANY_REQUESTS => Err(SendGridError::RateLimited),
            s => {
                let status = s.as_u16();
                let body = res.text().await.unwrap_or_default();
                Err(SendGridError::Http { status, body })
            }
        }
    }
}

#[async_trait]
impl EmailSender for SendGridClient {
    async fn send(&self, message: &EmailMessage) -> Result<SentEmail, SendGridError> {
        let sent = (|| async { self.send_request(message).await })
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_secs(1))
                    .with_max_delay(Duration::from_secs(30))
                    .with_max_times(3)
                    .with_jitter(),
            )
            .when(|e: &SendGridError| e.should_retry())
            .notify(|e, dur| {
                warn!(
                    "SendGrid call failed, retrying after {:.2}s: {}",
                    dur.as_secs_f64(),
                    e
                )
            })
            .await?;
        debug!(to = %message.to_email, message_id = ?sent.message_id, "Email accepted by SendGrid");
        Ok(sent)
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

/// Used when no API key is configured; every send fails with `NotConfigured`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledEmailSender;

#[async_trait]
impl EmailSender for DisabledEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<SentEmail, SendGridError> {
        debug!(to = %message.to_email, subject = %message.subject, "Email delivery disabled, dropping message");
        Err(SendGridError::NotConfigured)
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// SendGrid when an API key is configured, otherwise the disabled sender.
pub fn email_sender(config: &SendGridConfig) -> Result<Arc<dyn EmailSender>, SendGridError> {
    match &config.api_key {
        Some(key) => Ok(Arc::new(SendGridClient::new(
            key.clone(),
            config.from_email.clone(),
            config.from_name.clone(),
        )?)),
        None => {
            warn!("SENDGRID_API_KEY not set, outgoing email is disabled");
            Ok(Arc::new(DisabledEmailSender))
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> SendGridError {
    if e.is_timeout() {
        SendGridError::Timeout
    } else {
        SendGridError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> EmailMessage {
        EmailMessage {
            to_email: "ana@example.com".to_string(),
            to_name: Some("Ana".to_string()),
            subject: "Hello".to_string(),
            text: "plain".to_string(),
            html: "<p>html</p>".to_string(),
        }
    }

    #[test]
    fn request_body_matches_mail_send_shape() {
        let msg = message();
        let body = serde_json::to_value(MailSendRequest::new("noreply@qsights.com", "QSights", &msg))
            .unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "personalizations": [{"to": [{"email": "ana@example.com", "name": "Ana"}]}],
                "from": {"email": "noreply@qsights.com", "name": "QSights"},
                "subject": "Hello",
                "content": [
                    {"type": "text/plain", "value": "plain"},
                    {"type": "text/html", "value": "<p>html</p>"}
                ]
            })
        );
    }

    #[test]
    fn only_transient_failures_are_retried() {
        assert!(SendGridError::Timeout.should_retry());
        assert!(SendGridError::RateLimited.should_retry());
        assert!(SendGridError::Http { status: 503, body: String::new() }.should_retry());
        assert!(!SendGridError::Http { status: 400, body: String::new() }.should_retry());
        assert!(!SendGridError::InvalidApiKey.should_retry());
        assert!(!SendGridError::NotConfigured.should_retry());
    }

    #[tokio::test]
    async fn missing_key_selects_disabled_sender() {
        let sender = email_sender(&SendGridConfig {
            api_key: None,
            from_email: "noreply@qsights.com".to_string(),
            from_name: "QSights".to_string(),
        })
        .unwrap();
        assert!(!sender.is_enabled());
        assert!(matches!(
            sender.send(&message()).await,
            Err(SendGridError::NotConfigured)
        ));
    }
}
