use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use parley_core::audit::AuditEvent;
use parley_core::domain::campaign::{CampaignContext, CampaignId};
use parley_core::domain::conversation::{
    BuyerEmail, Conversation, ConversationId, Message, MessageId,
};
use parley_core::domain::draft::{Draft, DraftId, DraftStatus};
use parley_core::domain::inbound::DedupKey;
use parley_core::domain::intent::Intent;
use parley_core::domain::schedule::{ScheduledSend, ScheduledSendId, ScheduledSendStatus};

pub mod audit;
pub mod campaign;
pub mod conversation;
pub mod draft;
pub mod inbound;
pub mod memory;
pub mod schedule;

pub use audit::SqlAuditRepository;
pub use campaign::SqlCampaignRepository;
pub use conversation::SqlConversationRepository;
pub use draft::SqlDraftRepository;
pub use inbound::SqlInboundGate;
pub use memory::InMemoryStore;
pub use schedule::SqlScheduledSendRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("not found: {0}")]
    NotFound(String),
}

#[async_trait]
pub trait CampaignRepository: Send + Sync {
    async fn find_by_id(&self, id: &CampaignId) -> Result<Option<CampaignContext>, RepositoryError>;
    /// Case-insensitive lookup of the address buyers reply to.
    async fn find_by_sender_address(
        &self,
        address: &str,
    ) -> Result<Option<CampaignContext>, RepositoryError>;
    async fn save(&self, campaign: CampaignContext) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn find(
        &self,
        campaign_id: &CampaignId,
        buyer_email: &BuyerEmail,
    ) -> Result<Option<Conversation>, RepositoryError>;

    async fn find_by_id(&self, id: &ConversationId)
        -> Result<Option<Conversation>, RepositoryError>;

    /// Appends to the (campaign, buyer) conversation, creating it on first use.
    async fn append_message(
        &self,
        campaign_id: &CampaignId,
        buyer_email: &BuyerEmail,
        message: Message,
    ) -> Result<ConversationId, RepositoryError>;

    /// Stores the classification snapshot of an inbound message. Returns false
    /// when the message is unknown or already carries one.
    async fn attach_intent(
        &self,
        message_id: &MessageId,
        intent: &Intent,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait ScheduledSendRepository: Send + Sync {
    async fn find_by_id(
        &self,
        id: &ScheduledSendId,
    ) -> Result<Option<ScheduledSend>, RepositoryError>;

    async fn list_for_buyer(
        &self,
        campaign_id: &CampaignId,
        buyer_email: &BuyerEmail,
        status: Option<ScheduledSendStatus>,
    ) -> Result<Vec<ScheduledSend>, RepositoryError>;

    async fn save(&self, send: ScheduledSend) -> Result<(), RepositoryError>;

    /// Moves the row from `expected` to `next`. Returns false when the row is
    /// missing or no longer in `expected`.
    async fn transition(
        &self,
        id: &ScheduledSendId,
        expected: ScheduledSendStatus,
        next: ScheduledSendStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Pauses every pending send for the buyer and returns the ids this call
    /// moved. Paused and terminal rows are left alone, so a repeat returns
    /// nothing. The inbound gate runs the same step inside its admission.
    async fn pause_pending(
        &self,
        campaign_id: &CampaignId,
        buyer_email: &BuyerEmail,
        at: DateTime<Utc>,
    ) -> Result<Vec<ScheduledSendId>, RepositoryError>;
}

#[async_trait]
pub trait DraftRepository: Send + Sync {
    async fn find_by_id(&self, id: &DraftId) -> Result<Option<Draft>, RepositoryError>;

    async fn list_by_campaign(
        &self,
        campaign_id: &CampaignId,
        status: Option<DraftStatus>,
    ) -> Result<Vec<Draft>, RepositoryError>;

    async fn insert(&self, draft: Draft) -> Result<(), RepositoryError>;

    /// Writes the draft only if the stored row is still in `expected`.
    async fn save_if_status(
        &self,
        draft: &Draft,
        expected: DraftStatus,
    ) -> Result<bool, RepositoryError>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct AdmissionRequest {
    pub dedup_key: DedupKey,
    pub campaign_id: CampaignId,
    pub buyer_email: BuyerEmail,
    pub message: Message,
    pub received_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundAdmission {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub paused: Vec<ScheduledSendId>,
    /// Set when pausing failed; the message is still recorded.
    pub freeze_error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdmissionOutcome {
    Admitted(InboundAdmission),
    Duplicate,
}

/// Step one of the reply pipeline: claim the dedup key, record the inbound
/// message and pause the buyer's pending sends as one unit.
#[async_trait]
pub trait InboundGate: Send + Sync {
    async fn admit(&self, request: AdmissionRequest) -> Result<AdmissionOutcome, RepositoryError>;

    async fn record_outcome(
        &self,
        dedup_key: &DedupKey,
        outcome: &str,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn append(&self, event: &AuditEvent) -> Result<(), RepositoryError>;

    async fn list_for_correlation(
        &self,
        correlation_id: &str,
    ) -> Result<Vec<AuditEvent>, RepositoryError>;

    async fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<AuditEvent>, RepositoryError>;
}

pub(crate) const RECEIPT_RECEIVED: &str = "received";

/// Fixed-width RFC 3339 so stored timestamps sort lexically.
pub(crate) fn encode_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|value| parse_timestamp(column, value)).transpose()
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_optional_decimal(
    column: &str,
    value: Option<String>,
) -> Result<Option<Decimal>, RepositoryError> {
    value
        .map(|raw| {
            Decimal::from_str(&raw).map_err(|error| {
                RepositoryError::Decode(format!("invalid decimal in `{column}`: `{raw}` ({error})"))
            })
        })
        .transpose()
}

pub(crate) fn parse_buyer_email(column: &str, value: String) -> Result<BuyerEmail, RepositoryError> {
    BuyerEmail::parse(&value)
        .map_err(|error| RepositoryError::Decode(format!("invalid address in `{column}`: {error}")))
}
