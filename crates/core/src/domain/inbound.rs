use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::campaign::CampaignId;

/// A buyer email as delivered by the mail provider webhook.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEmail {
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub provider_message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub received_at: DateTime<Utc>,
    /// False when the provider sent no timestamp and `received_at` is the
    /// local arrival time.
    #[serde(default = "provider_timestamp_default")]
    pub provider_timestamp: bool,
    /// Explicit campaign routing, when the provider payload carries it.
    pub campaign_id: Option<CampaignId>,
}

fn provider_timestamp_default() -> bool {
    true
}

impl InboundEmail {
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::for_email(self)
    }
}

/// Identity of one delivery. Redeliveries of the same email share the key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey(pub String);

impl DedupKey {
    pub fn for_email(email: &InboundEmail) -> Self {
        if let Some(message_id) = email
            .provider_message_id
            .as_deref()
            .map(|value| value.trim().trim_start_matches('<').trim_end_matches('>'))
            .filter(|value| !value.is_empty())
        {
            return Self(format!("msgid:{message_id}"));
        }

        // A locally stamped arrival time changes per redelivery and is left out.
        let mut hasher = Sha256::new();
        hasher.update(email.sender.trim().to_ascii_lowercase().as_bytes());
        hasher.update(b"|");
        if email.provider_timestamp {
            hasher.update(email.received_at.timestamp().to_string().as_bytes());
        } else {
            hasher.update(b"subject:");
            hasher.update(email.subject.trim().as_bytes());
        }
        hasher.update(b"|");
        hasher.update(email.body.as_bytes());
        Self(format!("sha256:{}", hex::encode(hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

type HmacSha256 = Hmac<Sha256>;

/// Mailgun-style webhook signature: HMAC-SHA256 over `timestamp + token`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookSignature {
    pub timestamp: String,
    pub token: String,
    pub signature: String,
}

impl WebhookSignature {
    pub fn sign(signing_key: &str, timestamp: &str, token: &str) -> Self {
        Self {
            timestamp: timestamp.to_string(),
            token: token.to_string(),
            signature: hex::encode(Self::digest(signing_key, timestamp, token)),
        }
    }

    /// Constant-time comparison of the provided signature.
    pub fn verify(&self, signing_key: &str) -> bool {
        let Ok(provided) = hex::decode(self.signature.trim()) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(signing_key.as_bytes()) else {
            return false;
        };
        mac.update(self.timestamp.as_bytes());
        mac.update(self.token.as_bytes());
        mac.verify_slice(&provided).is_ok()
    }

    /// Seconds between the signed timestamp and `now`; `None` if unparseable
    /// or too far out to measure.
    pub fn age_secs(&self, now: DateTime<Utc>) -> Option<i64> {
        let signed_at = self.timestamp.trim().parse::<i64>().ok()?;
        now.timestamp().checked_sub(signed_at)?.checked_abs()
    }

    fn digest(signing_key: &str, timestamp: &str, token: &str) -> Vec<u8> {
        match HmacSha256::new_from_slice(signing_key.as_bytes()) {
            Ok(mut mac) => {
                mac.update(timestamp.as_bytes());
                mac.update(token.as_bytes());
                mac.finalize().into_bytes().to_vec()
            }
            Err(_) => Vec::new(),
        }
    }
}

fn attribution_line() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)^\s*on\s.+\swrote:\s*$").expect("static regex is valid"))
}

/// Drops quoted history from a reply: `>` lines, and everything from an
/// `On ... wrote:` attribution or an `-----Original Message-----` marker on.
pub fn strip_quoted_reply(body: &str) -> String {
    let mut kept = Vec::new();
    for line in body.lines() {
        let trimmed = line.trim();
        if attribution_line().is_match(line)
            || trimmed.eq_ignore_ascii_case("-----original message-----")
        {
            break;
        }
        if trimmed.starts_with('>') {
            continue;
        }
        kept.push(line);
    }

    kept.join("\n").trim().to_string()
}
