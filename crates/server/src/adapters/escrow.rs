use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use parley_agent::collaborators::{CollaboratorError, EscrowProvider, OfferRequest, PaymentOffer};
use parley_core::config::EscrowConfig;

/// Creates hosted payment offers over the escrow provider's JSON API.
pub struct HttpEscrowProvider {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct CreateOfferBody<'a> {
    reference: &'a str,
    domain: &'a str,
    buyer_email: &'a str,
    seller_email: &'a str,
    amount: Decimal,
    currency: &'a str,
    validity_hours: u32,
}

#[derive(Debug, Deserialize)]
struct CreateOfferResponse {
    #[serde(alias = "checkout_url", alias = "payment_url")]
    url: String,
    amount: Option<Decimal>,
    currency: Option<String>,
}

impl HttpEscrowProvider {
    /// `None` when no base URL is configured.
    pub fn from_config(config: &EscrowConfig) -> Result<Option<Self>, reqwest::Error> {
        let Some(base_url) = config.base_url.as_deref().filter(|url| !url.trim().is_empty()) else {
            return Ok(None);
        };
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Some(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            timeout,
        }))
    }
}

#[async_trait]
impl EscrowProvider for HttpEscrowProvider {
    async fn create_offer(&self, request: OfferRequest) -> Result<PaymentOffer, CollaboratorError> {
        let body = CreateOfferBody {
            reference: &request.conversation_id.0,
            domain: &request.domain_name,
            buyer_email: request.buyer_email.as_str(),
            seller_email: &request.seller_email,
            amount: request.amount,
            currency: &request.currency,
            validity_hours: request.validity_hours,
        };

        let mut builder = self.client.post(format!("{}/offers", self.base_url)).json(&body);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key.expose_secret());
        }

        let response = builder.send().await.map_err(|error| {
            warn!(event_name = "escrow.offer.request_failed", error = %error, "escrow request failed");
            if error.is_timeout() {
                CollaboratorError::Timeout(self.timeout)
            } else {
                CollaboratorError::Unavailable(error.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &detail));
        }

        let created: CreateOfferResponse = response.json().await.map_err(|error| {
            CollaboratorError::Rejected(format!("failed to decode escrow response: {error}"))
        })?;
        if created.url.trim().is_empty() {
            return Err(CollaboratorError::Rejected("escrow returned an empty offer url".to_string()));
        }

        info!(
            event_name = "escrow.offer.created",
            conversation_id = %request.conversation_id.0,
            domain_name = %request.domain_name,
            "payment offer created"
        );
        Ok(PaymentOffer {
            url: created.url,
            amount: created.amount.unwrap_or(request.amount),
            currency: created.currency.unwrap_or(request.currency),
        })
    }
}

fn classify_status(status: StatusCode, detail: &str) -> CollaboratorError {
    let detail: String = detail.chars().take(200).collect();
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        CollaboratorError::Unavailable(format!("escrow returned {status}: {detail}"))
    } else {
        CollaboratorError::Rejected(format!("escrow returned {status}: {detail}"))
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use parley_agent::collaborators::CollaboratorError;
    use parley_core::config::EscrowConfig;

    use super::{classify_status, CreateOfferResponse, HttpEscrowProvider};

    #[test]
    fn unconfigured_base_url_builds_no_provider() {
        let config = EscrowConfig {
            base_url: None,
            api_key: None,
            timeout_secs: 10,
            offer_validity_hours: 72,
        };
        assert!(HttpEscrowProvider::from_config(&config).expect("client").is_none());
    }

    #[test]
    fn server_errors_are_retryable_and_client_errors_are_rejections() {
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, "upstream"),
            CollaboratorError::Unavailable(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY, "amount too low"),
            CollaboratorError::Rejected(message) if message.contains("amount too low")
        ));
    }

    #[test]
    fn response_accepts_checkout_url_alias() {
        let parsed: CreateOfferResponse =
            serde_json::from_str(r#"{"checkout_url":"https://pay.test/o/1"}"#).expect("decode");
        assert_eq!(parsed.url, "https://pay.test/o/1");
        assert!(parsed.amount.is_none());
    }
}
