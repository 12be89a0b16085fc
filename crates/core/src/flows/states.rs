use serde::{Deserialize, Serialize};

use crate::domain::notification::NotificationKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyState {
    Received,
    Frozen,
    Classified,
    Composed,
    AutoSent,
    Drafted,
    NoCampaignMatch,
    BuyerOptedOut,
    Duplicate,
}

impl ReplyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Frozen => "frozen",
            Self::Classified => "classified",
            Self::Composed => "composed",
            Self::AutoSent => "auto_sent",
            Self::Drafted => "drafted",
            Self::NoCampaignMatch => "no_campaign_match",
            Self::BuyerOptedOut => "buyer_opted_out",
            Self::Duplicate => "duplicate",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::AutoSent
                | Self::Drafted
                | Self::NoCampaignMatch
                | Self::BuyerOptedOut
                | Self::Duplicate
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyEvent {
    CampaignUnresolved,
    DuplicateDelivery,
    InboundRecorded,
    IntentClassified,
    ReplyComposed,
    DeliveryResolved,
}

/// Facts the transition table branches on.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReplyContext {
    pub auto_respond: bool,
    pub notification_configured: bool,
    pub escrow_allowed: bool,
    pub opted_out: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyAction {
    ClassifyIntent,
    EvaluateNegotiation,
    ComposeReply,
    RequestPaymentOffer,
    PersistOutboundMessage,
    SendEmail,
    CreateDraft,
    NotifyOwner(NotificationKind),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: ReplyState,
    pub to: ReplyState,
    pub event: ReplyEvent,
    pub actions: Vec<ReplyAction>,
}

impl TransitionOutcome {
    pub fn notification(&self) -> Option<NotificationKind> {
        self.actions.iter().find_map(|action| match action {
            ReplyAction::NotifyOwner(kind) => Some(*kind),
            _ => None,
        })
    }

    pub fn requires(&self, action: &ReplyAction) -> bool {
        self.actions.contains(action)
    }
}
