//! Pure decision logic for the inbound-reply pipeline: domain types, the
//! intent classifier, the negotiation policy and the reply state machine.
//! Nothing in this crate performs I/O.

pub mod audit;
pub mod classifier;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod negotiation;

pub use classifier::{classify, IntentClassifier, KeywordIntentClassifier};
pub use domain::campaign::{CampaignContext, CampaignId, CampaignPricing};
pub use domain::conversation::{
    BuyerEmail, Conversation, ConversationId, Message, MessageDirection, MessageId, MessageOrigin,
};
pub use domain::draft::{Draft, DraftId, DraftStatus};
pub use domain::inbound::{DedupKey, InboundEmail, WebhookSignature};
pub use domain::intent::{Intent, IntentFlags, Sentiment};
pub use domain::notification::{NotificationKind, OwnerNotification};
pub use domain::schedule::{ScheduledSend, ScheduledSendId, ScheduledSendStatus};
pub use domain::StatusChange;
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{FlowEngine, ReplyFlow, ReplyState};
pub use negotiation::{
    decide, DeterministicNegotiationPolicy, NegotiationDecision, NegotiationPolicy,
    NegotiationStance,
};
