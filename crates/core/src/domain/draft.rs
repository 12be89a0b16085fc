use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::campaign::CampaignId;
use crate::domain::conversation::{BuyerEmail, ConversationId, MessageId};
use crate::domain::StatusChange;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DraftId(pub String);

impl DraftId {
    pub fn generate() -> Self {
        Self(format!("DRAFT-{}", Uuid::new_v4().simple()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    Pending,
    Edited,
    Sent,
    Discarded,
}

impl DraftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Edited => "edited",
            Self::Sent => "sent",
            Self::Discarded => "discarded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "edited" => Some(Self::Edited),
            "sent" => Some(Self::Sent),
            "discarded" => Some(Self::Discarded),
            _ => None,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::Sent | Self::Discarded)
    }
}

/// A composed reply waiting for a human to edit, send or discard it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    pub id: DraftId,
    pub campaign_id: CampaignId,
    pub conversation_id: ConversationId,
    pub buyer_email: BuyerEmail,
    pub inbound_message_id: MessageId,
    pub subject: String,
    pub body: String,
    pub edited_subject: Option<String>,
    pub edited_body: Option<String>,
    pub status: DraftStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl Draft {
    #[allow(clippy::too_many_arguments)]
    pub fn pending(
        campaign_id: CampaignId,
        conversation_id: ConversationId,
        buyer_email: BuyerEmail,
        inbound_message_id: MessageId,
        subject: impl Into<String>,
        body: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: DraftId::generate(),
            campaign_id,
            conversation_id,
            buyer_email,
            inbound_message_id,
            subject: subject.into(),
            body: body.into(),
            edited_subject: None,
            edited_body: None,
            status: DraftStatus::Pending,
            created_at: now,
            updated_at: now,
            sent_at: None,
        }
    }

    pub fn outgoing_subject(&self) -> &str {
        self.edited_subject.as_deref().unwrap_or(&self.subject)
    }

    pub fn outgoing_body(&self) -> &str {
        self.edited_body.as_deref().unwrap_or(&self.body)
    }

    /// `pending|edited -> edited`. The composed text is kept untouched.
    pub fn edit(
        &mut self,
        body: impl Into<String>,
        subject: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if self.status.is_final() {
            return Err(self.finalized_error());
        }

        self.edited_body = Some(body.into());
        if let Some(subject) = subject.filter(|value| !value.trim().is_empty()) {
            self.edited_subject = Some(subject);
        }
        self.status = DraftStatus::Edited;
        self.updated_at = now;
        Ok(())
    }

    pub fn ensure_sendable(&self) -> Result<(), DomainError> {
        match self.status {
            DraftStatus::Pending | DraftStatus::Edited => Ok(()),
            DraftStatus::Sent => Err(DomainError::AlreadySent { draft_id: self.id.0.clone() }),
            DraftStatus::Discarded => Err(self.finalized_error()),
        }
    }

    pub fn mark_sent(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.ensure_sendable()?;
        self.status = DraftStatus::Sent;
        self.sent_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Any non-terminal state -> discarded. Discarding twice is a no-op.
    pub fn discard(&mut self, now: DateTime<Utc>) -> Result<StatusChange, DomainError> {
        match self.status {
            DraftStatus::Pending | DraftStatus::Edited => {
                self.status = DraftStatus::Discarded;
                self.updated_at = now;
                Ok(StatusChange::Applied)
            }
            DraftStatus::Discarded => Ok(StatusChange::Unchanged),
            DraftStatus::Sent => Err(self.finalized_error()),
        }
    }

    fn finalized_error(&self) -> DomainError {
        DomainError::AlreadyFinalized { draft_id: self.id.0.clone(), status: self.status }
    }
}
