use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use chrono::{DateTime, TimeZone, Utc};
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::{info, warn};

use parley_agent::ReplyReport;
use parley_core::domain::campaign::CampaignId;
use parley_core::domain::inbound::{strip_quoted_reply, InboundEmail, WebhookSignature};

use crate::api::{self, ApiResult, ApiState, WebhookSettings};

/// Mail provider payload. Field aliases accept Mailgun's hyphenated names.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct InboundPayload {
    pub sender: String,
    pub recipient: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default, alias = "stripped-text")]
    pub stripped_text: Option<String>,
    #[serde(default, alias = "body-plain")]
    pub body_plain: Option<String>,
    #[serde(default, alias = "Message-Id")]
    pub message_id: Option<String>,
    #[serde(default, alias = "In-Reply-To")]
    pub in_reply_to: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub campaign_id: Option<String>,
}

impl InboundPayload {
    /// Prefers the provider's stripped text; otherwise strips quoted
    /// history from the plain body.
    pub fn into_email(self, now: DateTime<Utc>) -> InboundEmail {
        let body = self
            .stripped_text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| strip_quoted_reply(self.body_plain.as_deref().unwrap_or_default()));

        let provider_time = self
            .timestamp
            .as_deref()
            .and_then(|value| value.trim().parse::<i64>().ok())
            .and_then(|seconds| Utc.timestamp_opt(seconds, 0).single());
        let provider_message_id = non_empty(self.message_id);

        if provider_message_id.is_none() && provider_time.is_none() {
            warn!(
                event_name = "inbound.weak_identity",
                sender = %self.sender,
                "inbound email has no Message-Id or timestamp; deduplicating on sender, subject and body"
            );
        }

        InboundEmail {
            sender: self.sender,
            recipient: self.recipient,
            subject: self.subject,
            body,
            provider_message_id,
            in_reply_to: non_empty(self.in_reply_to),
            received_at: provider_time.unwrap_or(now),
            provider_timestamp: provider_time.is_some(),
            campaign_id: non_empty(self.campaign_id).map(CampaignId),
        }
    }

    fn webhook_signature(&self) -> Option<WebhookSignature> {
        Some(WebhookSignature {
            timestamp: self.timestamp.clone()?,
            token: self.token.clone()?,
            signature: self.signature.clone()?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignatureCheck {
    Verified,
    Skipped,
    Missing,
    Invalid,
    Stale,
}

/// Verification runs whenever a signing key is configured and the payload
/// is signed; unsigned payloads pass only when signatures are optional.
pub fn check_signature(
    settings: &WebhookSettings,
    payload: &InboundPayload,
    now: DateTime<Utc>,
) -> SignatureCheck {
    let Some(signing_key) = settings.signing_key.as_ref() else {
        return SignatureCheck::Skipped;
    };
    let Some(signature) = payload.webhook_signature() else {
        return if settings.require_signature {
            SignatureCheck::Missing
        } else {
            SignatureCheck::Skipped
        };
    };

    if !signature.verify(signing_key.expose_secret()) {
        return SignatureCheck::Invalid;
    }
    match signature.age_secs(now) {
        Some(age) if age.unsigned_abs() <= settings.max_age_secs => SignatureCheck::Verified,
        _ => SignatureCheck::Stale,
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new().route("/api/v1/inbound/email", post(receive_email)).with_state(state)
}

async fn receive_email(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(payload): Json<InboundPayload>,
) -> ApiResult<ReplyReport> {
    let correlation_id = api::correlation_id(&headers);
    let now = Utc::now();

    let check = check_signature(&state.webhook, &payload, now);
    if matches!(check, SignatureCheck::Missing | SignatureCheck::Invalid | SignatureCheck::Stale) {
        warn!(
            event_name = "inbound.signature_rejected",
            correlation_id = %correlation_id,
            check = ?check,
            "inbound webhook signature rejected"
        );
        return Err(api::rejection(
            StatusCode::UNAUTHORIZED,
            "webhook signature missing, invalid or expired",
            &correlation_id,
        ));
    }

    let email = payload.into_email(now);
    if email.body.is_empty() {
        return Err(api::bad_request("inbound email has no text body", &correlation_id));
    }

    info!(
        event_name = "inbound.received",
        correlation_id = %correlation_id,
        recipient = %email.recipient,
        signature = ?check,
        "inbound email received"
    );

    state
        .orchestrator
        .handle(email, &correlation_id)
        .await
        .map(Json)
        .map_err(|error| api::pipeline_error(error, &correlation_id))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::{json, Value};

    use parley_core::domain::inbound::WebhookSignature;

    use super::{check_signature, InboundPayload, SignatureCheck};
    use crate::testing::{api, call, signed, unsigned, SIGNING_KEY};

    const INBOUND: &str = "/api/v1/inbound/email";

    fn payload(message_id: &str, text: &str) -> Value {
        json!({
            "sender": "Jane Buyer <buyer@example.com>",
            "recipient": "offers+cmp-1@seller.test",
            "subject": "Re: example.io",
            "stripped_text": text,
            "message_id": format!("<{message_id}@mail.example.com>"),
        })
    }

    fn sign(mut body: Value, timestamp: i64, key: &str) -> Value {
        let signature = WebhookSignature::sign(key, &timestamp.to_string(), "token-1");
        body["timestamp"] = json!(signature.timestamp);
        body["token"] = json!(signature.token);
        body["signature"] = json!(signature.signature);
        body
    }

    #[tokio::test]
    async fn low_offer_is_drafted_and_reported() {
        let test = api(unsigned()).await;

        let (status, body) =
            call(&test.router, "POST", INBOUND, Some(payload("m1", "Would you take $1,800?"))).await;

        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["outcome"], "drafted");
        assert_eq!(body["decision"]["requires_owner_approval"], true);
        assert!(body["draft_id"].is_string());
        assert_eq!(test.store.drafts().await.len(), 1);
        assert!(test.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn redelivery_is_acknowledged_without_reprocessing() {
        let test = api(unsigned()).await;

        let (_, first) =
            call(&test.router, "POST", INBOUND, Some(payload("m1", "Would you take $1,800?"))).await;
        let (status, second) =
            call(&test.router, "POST", INBOUND, Some(payload("m1", "Would you take $1,800?"))).await;

        assert_eq!(first["outcome"], "drafted");
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["outcome"], "duplicate");
        assert_eq!(test.store.drafts().await.len(), 1);
        assert_eq!(test.notifier.notifications().len(), 1);
    }

    #[tokio::test]
    async fn unknown_recipient_is_a_routine_non_event() {
        let test = api(unsigned()).await;
        let mut body = payload("m1", "Is this still for sale?");
        body["recipient"] = json!("someone-else@seller.test");

        let (status, body) = call(&test.router, "POST", INBOUND, Some(body)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "no_campaign_match");
        assert!(test.notifier.notifications().is_empty());
    }

    #[tokio::test]
    async fn malformed_sender_is_a_bad_request() {
        let test = api(unsigned()).await;
        let mut body = payload("m1", "Hello");
        body["sender"] = json!("not an address");

        let (status, body) = call(&test.router, "POST", INBOUND, Some(body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["correlation_id"].is_string());
    }

    #[tokio::test]
    async fn admission_failure_asks_provider_to_retry() {
        let test = api(unsigned()).await;
        test.store.fail_admissions(true).await;

        let (status, _) =
            call(&test.router, "POST", INBOUND, Some(payload("m1", "Would you take $1,800?"))).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(test.store.drafts().await.is_empty());
    }

    #[tokio::test]
    async fn required_signature_gates_the_webhook() {
        let test = api(signed()).await;
        let now = Utc::now().timestamp();

        let (missing, _) = call(&test.router, "POST", INBOUND, Some(payload("m1", "Hi"))).await;
        assert_eq!(missing, StatusCode::UNAUTHORIZED);

        let forged = sign(payload("m2", "Hi"), now, "key-other");
        let (forged, _) = call(&test.router, "POST", INBOUND, Some(forged)).await;
        assert_eq!(forged, StatusCode::UNAUTHORIZED);

        let stale = sign(payload("m3", "Hi"), now - 3_600, SIGNING_KEY);
        let (stale, _) = call(&test.router, "POST", INBOUND, Some(stale)).await;
        assert_eq!(stale, StatusCode::UNAUTHORIZED);

        let ancient = sign(payload("m5", "Hi"), i64::MIN, SIGNING_KEY);
        let (ancient, _) = call(&test.router, "POST", INBOUND, Some(ancient)).await;
        assert_eq!(ancient, StatusCode::UNAUTHORIZED);

        let valid = sign(payload("m4", "Would you take $1,800?"), now, SIGNING_KEY);
        let (status, body) = call(&test.router, "POST", INBOUND, Some(valid)).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(test.store.drafts().await.len(), 1);
    }

    #[tokio::test]
    async fn redelivery_without_message_id_or_timestamp_is_a_duplicate() {
        let test = api(unsigned()).await;
        let mut bare = payload("m1", "Would you take $1,800?");
        bare["message_id"] = Value::Null;

        let (_, first) = call(&test.router, "POST", INBOUND, Some(bare.clone())).await;
        tokio::time::sleep(std::time::Duration::from_millis(1_100)).await;
        let (status, second) = call(&test.router, "POST", INBOUND, Some(bare)).await;

        assert_eq!(first["outcome"], "drafted");
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["outcome"], "duplicate");
        assert_eq!(test.store.drafts().await.len(), 1);
    }

    #[test]
    fn optional_signature_skips_unsigned_payloads() {
        let mut settings = signed();
        settings.require_signature = false;

        assert_eq!(
            check_signature(&settings, &InboundPayload::default(), Utc::now()),
            SignatureCheck::Skipped
        );
        assert_eq!(
            check_signature(&unsigned(), &InboundPayload::default(), Utc::now()),
            SignatureCheck::Skipped
        );
    }

    #[test]
    fn payload_prefers_stripped_text_and_reads_mailgun_names() {
        let parsed: InboundPayload = serde_json::from_value(json!({
            "sender": "buyer@example.com",
            "recipient": "offers+cmp-1@seller.test",
            "body-plain": "Deal at $2,500.\n\nOn Mon, Mar 2, 2026 at 9:00 AM Dana wrote:\n> Asking $2,500",
            "Message-Id": "<abc@mail.example.com>",
            "timestamp": "1772366400",
            "campaign_id": "  ",
        }))
        .expect("decode");

        let email = parsed.clone().into_email(Utc::now());
        assert_eq!(email.body, "Deal at $2,500.");
        assert_eq!(email.provider_message_id.as_deref(), Some("<abc@mail.example.com>"));
        assert_eq!(email.received_at, Utc.timestamp_opt(1_772_366_400, 0).single().expect("ts"));
        assert!(email.provider_timestamp);
        assert!(email.campaign_id.is_none());

        let stripped = InboundPayload {
            stripped_text: Some("Just the reply".to_string()),
            timestamp: None,
            ..parsed
        };
        let now = Utc::now() - Duration::minutes(1);
        let email = stripped.into_email(now);
        assert_eq!(email.body, "Just the reply");
        assert_eq!(email.received_at, now);
        assert!(!email.provider_timestamp);
    }
}
