use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, warn};

use parley_agent::collaborators::{CollaboratorError, DeliveryId, EmailTransport, OutboundEmail};
use parley_core::config::EmailConfig;

/// Sends through the Mailgun messages API as a form post.
pub struct MailgunTransport {
    client: Client,
    messages_url: String,
    api_key: SecretString,
    from: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct MailgunResponse {
    id: String,
}

impl MailgunTransport {
    /// `None` unless both the sending domain and API key are set.
    pub fn from_config(config: &EmailConfig) -> Result<Option<Self>, reqwest::Error> {
        let (Some(domain), Some(api_key)) = (config.domain.as_deref(), config.api_key.as_ref())
        else {
            return Ok(None);
        };
        if !config.is_configured() {
            return Ok(None);
        }

        let from_address =
            config.from_address.clone().unwrap_or_else(|| format!("postmaster@{domain}"));
        let timeout = Duration::from_secs(config.timeout_secs);
        Ok(Some(Self {
            client: Client::builder().timeout(timeout).build()?,
            messages_url: format!("{}/{domain}/messages", config.base_url.trim_end_matches('/')),
            api_key: api_key.clone(),
            from: format!("{} <{from_address}>", config.from_name),
            timeout,
        }))
    }

    fn form(&self, email: &OutboundEmail) -> Vec<(&'static str, String)> {
        let mut form = vec![
            ("from", self.from.clone()),
            ("to", email.to.clone()),
            ("subject", email.subject.clone()),
            ("text", email.text.clone()),
        ];
        if let Some(html) = &email.html {
            form.push(("html", html.clone()));
        }
        if let Some(reply_to) = &email.reply_to {
            form.push(("h:Reply-To", reply_to.clone()));
        }
        if let Some(in_reply_to) = &email.in_reply_to {
            form.push(("h:In-Reply-To", angle_bracketed(in_reply_to)));
        }
        if !email.references.is_empty() {
            let references: Vec<String> =
                email.references.iter().map(|reference| angle_bracketed(reference)).collect();
            form.push(("h:References", references.join(" ")));
        }
        form.extend(email.tags.iter().map(|tag| ("o:tag", tag.clone())));
        form
    }
}

#[async_trait]
impl EmailTransport for MailgunTransport {
    async fn send(&self, email: OutboundEmail) -> Result<DeliveryId, CollaboratorError> {
        let response = self
            .client
            .post(&self.messages_url)
            .basic_auth("api", Some(self.api_key.expose_secret()))
            .form(&self.form(&email))
            .send()
            .await
            .map_err(|error| {
                warn!(event_name = "mailgun.send.request_failed", error = %error, "mailgun request failed");
                if error.is_timeout() {
                    CollaboratorError::Timeout(self.timeout)
                } else {
                    CollaboratorError::Unavailable(error.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail: String = response.text().await.unwrap_or_default().chars().take(200).collect();
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                CollaboratorError::Unavailable(format!("mailgun returned {status}: {detail}"))
            } else {
                CollaboratorError::Rejected(format!("mailgun returned {status}: {detail}"))
            });
        }

        let accepted: MailgunResponse = response.json().await.map_err(|error| {
            CollaboratorError::Rejected(format!("failed to decode mailgun response: {error}"))
        })?;
        debug!(event_name = "mailgun.send.accepted", delivery_id = %accepted.id, "message queued");
        Ok(DeliveryId(accepted.id))
    }
}

/// Transport for deployments without mail credentials; every send fails so
/// replies stay as drafts.
#[derive(Clone, Debug, Default)]
pub struct UnconfiguredTransport;

#[async_trait]
impl EmailTransport for UnconfiguredTransport {
    async fn send(&self, _email: OutboundEmail) -> Result<DeliveryId, CollaboratorError> {
        Err(CollaboratorError::Unavailable("no email transport configured".to_string()))
    }
}

fn angle_bracketed(message_id: &str) -> String {
    let trimmed = message_id.trim().trim_start_matches('<').trim_end_matches('>');
    format!("<{trimmed}>")
}
