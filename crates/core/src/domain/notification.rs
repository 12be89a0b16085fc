use serde::{Deserialize, Serialize};

use crate::domain::campaign::CampaignId;
use crate::domain::conversation::{BuyerEmail, ConversationId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    AutoResponseSent,
    NeedsReview,
    ManuallySent,
    BuyerOptedOut,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoResponseSent => "auto_response_sent",
            Self::NeedsReview => "needs_review",
            Self::ManuallySent => "manually_sent",
            Self::BuyerOptedOut => "buyer_opted_out",
        }
    }

    pub fn template_name(&self) -> &'static str {
        match self {
            Self::AutoResponseSent => "notify_auto_response_sent",
            Self::NeedsReview => "notify_needs_review",
            Self::ManuallySent => "notify_manually_sent",
            Self::BuyerOptedOut => "notify_buyer_opted_out",
        }
    }
}

/// Message to the campaign owner about one terminal pipeline outcome.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerNotification {
    pub kind: NotificationKind,
    pub to: String,
    pub campaign_id: CampaignId,
    pub domain_name: String,
    pub buyer_email: BuyerEmail,
    pub conversation_id: ConversationId,
    pub draft_id: Option<String>,
    pub buyer_excerpt: String,
    pub reply_excerpt: Option<String>,
    /// Set when the reply could not be delivered or stored for review.
    pub delivery_issue: Option<String>,
}
