use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::campaign::CampaignId;
use crate::domain::intent::Intent;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn generate() -> Self {
        Self(format!("MSG-{}", Uuid::new_v4().simple()))
    }
}

/// A buyer address, normalized to its lower-cased bare form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BuyerEmail(String);

impl BuyerEmail {
    /// Accepts `jane@example.com` as well as `Jane Doe <Jane@Example.com>`.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        let address = match (trimmed.rfind('<'), trimmed.rfind('>')) {
            (Some(start), Some(end)) if start < end => &trimmed[start + 1..end],
            _ => trimmed,
        };
        let address = address.trim().to_ascii_lowercase();

        let valid = match address.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
                    && !address.chars().any(char::is_whitespace)
            }
            None => false,
        };

        if !valid {
            return Err(DomainError::InvalidEmailAddress(raw.to_string()));
        }

        Ok(Self(address))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BuyerEmail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

impl MessageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "inbound" => Some(Self::Inbound),
            "outbound" => Some(Self::Outbound),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageOrigin {
    Human,
    Automated,
}

impl MessageOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Automated => "automated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "human" => Some(Self::Human),
            "automated" => Some(Self::Automated),
            _ => None,
        }
    }
}

/// One email in a conversation. Never mutated after it is persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub direction: MessageDirection,
    pub origin: MessageOrigin,
    pub subject: String,
    pub body: String,
    pub intent: Option<Intent>,
    /// `Message-Id` header of the email, used for reply threading.
    pub provider_message_id: Option<String>,
    pub sent_at: DateTime<Utc>,
}

impl Message {
    pub fn inbound(
        subject: impl Into<String>,
        body: impl Into<String>,
        provider_message_id: Option<String>,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::generate(),
            direction: MessageDirection::Inbound,
            origin: MessageOrigin::Human,
            subject: subject.into(),
            body: body.into(),
            intent: None,
            provider_message_id,
            sent_at,
        }
    }

    pub fn outbound(
        origin: MessageOrigin,
        subject: impl Into<String>,
        body: impl Into<String>,
        provider_message_id: Option<String>,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::generate(),
            direction: MessageDirection::Outbound,
            origin,
            subject: subject.into(),
            body: body.into(),
            intent: None,
            provider_message_id,
            sent_at,
        }
    }

    pub fn with_intent(mut self, intent: Intent) -> Self {
        self.intent = Some(intent);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub campaign_id: CampaignId,
    pub buyer_email: BuyerEmail,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn start(campaign_id: CampaignId, buyer_email: BuyerEmail, created_at: DateTime<Utc>) -> Self {
        Self {
            id: ConversationId(format!("CONV-{}", Uuid::new_v4().simple())),
            campaign_id,
            buyer_email,
            messages: Vec::new(),
            created_at,
        }
    }

    /// Inserts the message after every message sent at or before it, so the
    /// history stays ordered by time with insertion order breaking ties.
    pub fn append(&mut self, message: Message) {
        let position = self
            .messages
            .iter()
            .rposition(|existing| existing.sent_at <= message.sent_at)
            .map(|index| index + 1)
            .unwrap_or(0);
        self.messages.insert(position, message);
    }

    pub fn latest_inbound(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|message| message.direction == MessageDirection::Inbound)
    }

    pub fn outbound_count(&self) -> usize {
        self.messages.iter().filter(|message| message.direction == MessageDirection::Outbound).count()
    }
}
