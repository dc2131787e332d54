//! Delivery collaborator for escalation notices.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use tracing::{info, instrument, warn};

use sitechat_shared::{ConversationTurn, DeliveryConfig, Result, SiteChatError};

/// What a human team member receives when a user asks for a handoff.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EscalationNotice {
    pub site_url: String,
    pub email: String,
    /// The query that carried the email address.
    pub query: String,
    pub transcript: String,
    pub timestamp: DateTime<Utc>,
}

impl EscalationNotice {
    /// Render prior turns as `User: ...\nChatbot: ...`, separated by blank lines.
    pub fn transcript(history: &[ConversationTurn]) -> String {
        history
            .iter()
            .map(|turn| format!("User: {}\nChatbot: {}", turn.query, turn.response))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Sends escalation notices. `Ok(())` means the notice was accepted.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: &EscalationNotice) -> Result<()>;
}

// ---------------------------------------------------------------------------
// EmailJS
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct EmailJsRequest<'a> {
    service_id: &'a str,
    template_id: &'a str,
    user_id: &'a str,
    template_params: TemplateParams<'a>,
}

#[derive(Debug, Serialize)]
struct TemplateParams<'a> {
    website_url: &'a str,
    user_email: &'a str,
    user_query: &'a str,
    conversation: &'a str,
    timestamp: String,
}

/// EmailJS REST sender.
#[derive(Debug, Clone)]
pub struct EmailJsNotifier {
    client: Client,
    endpoint: String,
    service_id: String,
    template_id: String,
    public_key: String,
}

impl EmailJsNotifier {
    /// Build a sender from config; the public key comes from `config.public_key_env`.
    pub fn new(config: &DeliveryConfig) -> Result<Self> {
        if !config.is_configured() {
            return Err(SiteChatError::config(
                "delivery.service_id and delivery.template_id must be set",
            ));
        }
        let public_key = std::env::var(&config.public_key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                SiteChatError::config(format!(
                    "EmailJS public key not found. Set the {} environment variable.",
                    config.public_key_env
                ))
            })?;

        Ok(Self::with_key(config, public_key))
    }

    fn with_key(config: &DeliveryConfig, public_key: String) -> Self {
        Self {
            client: Client::new(),
            endpoint: config.endpoint.clone(),
            service_id: config.service_id.clone(),
            template_id: config.template_id.clone(),
            public_key,
        }
    }
}

#[async_trait]
impl Notifier for EmailJsNotifier {
    #[instrument(skip_all, fields(site = %notice.site_url))]
    async fn notify(&self, notice: &EscalationNotice) -> Result<()> {
        let body = EmailJsRequest {
            service_id: &self.service_id,
            template_id: &self.template_id,
            user_id: &self.public_key,
            template_params: TemplateParams {
                website_url: &notice.site_url,
                user_email: &notice.email,
                user_query: &notice.query,
                conversation: &notice.transcript,
                timestamp: notice.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| SiteChatError::Delivery(format!("request failed: {e}")))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let text = response.text().await.unwrap_or_default();
            return Err(SiteChatError::Delivery(format!("HTTP {status}: {text}")));
        }

        info!(email = %notice.email, "escalation email sent");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// LogNotifier
// ---------------------------------------------------------------------------

/// Logs the notice instead of sending it. Used when EmailJS is not configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notice: &EscalationNotice) -> Result<()> {
        info!(
            site = %notice.site_url,
            email = %notice.email,
            query = %notice.query,
            transcript_chars = notice.transcript.len(),
            "escalation requested (delivery not configured, logged only)"
        );
        Ok(())
    }
}

/// EmailJS when configured and keyed, otherwise [`LogNotifier`].
pub fn notifier_from_config(config: &DeliveryConfig) -> Arc<dyn Notifier> {
    if !config.is_configured() {
        return Arc::new(LogNotifier);
    }
    match EmailJsNotifier::new(config) {
        Ok(notifier) => Arc::new(notifier),
        Err(e) => {
            warn!(error = %e, "EmailJS unavailable, escalations will only be logged");
            Arc::new(LogNotifier)
        }
    }
}
