//! Capabilities the pipeline calls out to. Each is a trait object injected at
//! construction; HTTP implementations live in the server crate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tera::Context;
use thiserror::Error;

use parley_core::domain::campaign::CampaignId;
use parley_core::domain::conversation::{BuyerEmail, ConversationId};
use parley_core::domain::notification::{NotificationKind, OwnerNotification};

use crate::templates::ReplyTemplates;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
    #[error("collaborator timed out after {0:?}")]
    Timeout(Duration),
    #[error("collaborator rejected the request: {0}")]
    Rejected(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferRequest {
    pub campaign_id: CampaignId,
    pub conversation_id: ConversationId,
    pub domain_name: String,
    pub buyer_email: BuyerEmail,
    pub seller_email: String,
    pub amount: Decimal,
    pub currency: String,
    pub validity_hours: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentOffer {
    pub url: String,
    pub amount: Decimal,
    pub currency: String,
}

#[async_trait]
pub trait EscrowProvider: Send + Sync {
    async fn create_offer(&self, request: OfferRequest) -> Result<PaymentOffer, CollaboratorError>;
}

/// Escrow stand-in for deployments without a provider; every request fails
/// and the reply carries a confirm-price note instead of a link.
#[derive(Clone, Debug, Default)]
pub struct UnconfiguredEscrow;

#[async_trait]
impl EscrowProvider for UnconfiguredEscrow {
    async fn create_offer(&self, _request: OfferRequest) -> Result<PaymentOffer, CollaboratorError> {
        Err(CollaboratorError::Unavailable("no escrow provider configured".to_string()))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: Option<String>,
    pub reply_to: Option<String>,
    pub tags: Vec<String>,
    /// Provider id of the message being answered, for threading.
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryId(pub String);

#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, email: OutboundEmail) -> Result<DeliveryId, CollaboratorError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: OwnerNotification) -> Result<(), CollaboratorError>;
}

/// Renders owner notifications from templates and mails them.
pub struct TransportNotifier {
    transport: Arc<dyn EmailTransport>,
    templates: Arc<ReplyTemplates>,
}

impl TransportNotifier {
    pub fn new(transport: Arc<dyn EmailTransport>, templates: Arc<ReplyTemplates>) -> Self {
        Self { transport, templates }
    }

    pub fn render(&self, notification: &OwnerNotification) -> Result<OutboundEmail, CollaboratorError> {
        let mut context = Context::new();
        context.insert("buyer_email", notification.buyer_email.as_str());
        context.insert("domain_name", &notification.domain_name);
        context.insert("buyer_excerpt", &notification.buyer_excerpt);
        context.insert("reply_excerpt", &notification.reply_excerpt);
        context.insert("draft_id", &notification.draft_id);
        context.insert("delivery_issue", &notification.delivery_issue);
        context.insert("campaign_id", &notification.campaign_id.0);
        context.insert("conversation_id", &notification.conversation_id.0);

        let text = self
            .templates
            .render(notification.kind.template_name(), &context)
            .map_err(|error| CollaboratorError::Rejected(format!("template render failed: {error}")))?;

        Ok(OutboundEmail {
            to: notification.to.clone(),
            subject: notification_subject(notification.kind, &notification.domain_name),
            text,
            tags: vec!["parley".to_string(), format!("notify:{}", notification.kind.as_str())],
            ..OutboundEmail::default()
        })
    }
}

#[async_trait]
impl Notifier for TransportNotifier {
    async fn notify(&self, notification: OwnerNotification) -> Result<(), CollaboratorError> {
        let email = self.render(&notification)?;
        self.transport.send(email).await.map(|_| ())
    }
}

fn notification_subject(kind: NotificationKind, domain_name: &str) -> String {
    match kind {
        NotificationKind::AutoResponseSent => format!("[{domain_name}] Automatic reply sent"),
        NotificationKind::NeedsReview => format!("[{domain_name}] Reply draft needs review"),
        NotificationKind::ManuallySent => format!("[{domain_name}] Reviewed reply sent"),
        NotificationKind::BuyerOptedOut => format!("[{domain_name}] Buyer not interested"),
    }
}
