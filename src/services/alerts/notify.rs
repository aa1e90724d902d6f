//! Outbound alert delivery.
//!
//! Email goes through lettre's async SMTP transport, webhooks are a single
//! JSON POST. Each channel reports its own result so one failing never
//! blocks the other.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Serialize;
use uuid::Uuid;

use crate::config::AlertConfig;
use crate::models::{Alert, Severity};

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("SMTP is not configured")]
    NotConfigured,

    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    #[error("email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("email build error: {0}")]
    Build(String),

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("webhook returned HTTP {0}")]
    HttpStatus(u16),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_email(&self, recipients: &[String], alert: &Alert) -> Result<(), NotifyError>;

    async fn send_webhook(&self, url: &str, alert: &Alert) -> Result<(), NotifyError>;
}

/// JSON body of an alert webhook.
#[derive(Debug, Serialize)]
pub struct WebhookPayload<'a> {
    pub alert_id: Uuid,
    pub rule_name: &'a str,
    pub severity: Severity,
    pub message: &'a str,
    pub current_value: f64,
    pub threshold: f64,
    pub timestamp: String,
}

impl<'a> From<&'a Alert> for WebhookPayload<'a> {
    fn from(alert: &'a Alert) -> Self {
        Self {
            alert_id: alert.id,
            rule_name: &alert.rule_name,
            severity: alert.severity,
            message: &alert.message,
            current_value: alert.current_value,
            threshold: alert.threshold,
            timestamp: alert.created_at.to_rfc3339(),
        }
    }
}

pub fn email_subject(alert: &Alert) -> String {
    format!("[Video Pipeline Alert] {}", alert.rule_name)
}

pub fn email_body(alert: &Alert) -> String {
    format!(
        "Alert: {}\nSeverity: {}\nMessage: {}\nThreshold: {}\nCurrent value: {}\nTime: {}\n",
        alert.rule_name,
        alert.severity,
        alert.message,
        alert.threshold,
        alert.current_value,
        alert.created_at.to_rfc3339()
    )
}

/// SMTP + HTTP delivery.
pub struct Notifications {
    config: AlertConfig,
    client: reqwest::Client,
}

impl Notifications {
    pub fn new(config: AlertConfig) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.webhook_timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    fn mailer(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, NotifyError> {
        let host = self
            .config
            .smtp_host
            .as_deref()
            .ok_or(NotifyError::NotConfigured)?;
        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?.port(self.config.smtp_port);
        if let (Some(user), Some(pass)) = (&self.config.smtp_user, &self.config.smtp_password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        Ok(builder.build())
    }
}

#[async_trait]
impl Notifier for Notifications {
    async fn send_email(&self, recipients: &[String], alert: &Alert) -> Result<(), NotifyError> {
        let mailer = self.mailer()?;
        let mut builder = Message::builder()
            .from(self.config.smtp_from.parse()?)
            .subject(email_subject(alert))
            .header(ContentType::TEXT_PLAIN);
        for to in recipients {
            builder = builder.to(to.parse()?);
        }
        let email = builder
            .body(email_body(alert))
            .map_err(|e| NotifyError::Build(e.to_string()))?;

        mailer.send(email).await?;
        log::info!(
            "Alert {} emailed to {} recipients",
            alert.id,
            recipients.len()
        );
        Ok(())
    }

    async fn send_webhook(&self, url: &str, alert: &Alert) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(url)
            .json(&WebhookPayload::from(alert))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(NotifyError::HttpStatus(response.status().as_u16()));
        }
        log::info!("Alert {} posted to webhook {}", alert.id, url);
        Ok(())
    }
}
