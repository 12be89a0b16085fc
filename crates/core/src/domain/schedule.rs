use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::campaign::CampaignId;
use crate::domain::conversation::BuyerEmail;
use crate::domain::StatusChange;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScheduledSendId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledSendStatus {
    Pending,
    Paused,
    Sent,
    Cancelled,
}

impl ScheduledSendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paused => "paused",
            Self::Sent => "sent",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "paused" => Some(Self::Paused),
            "sent" => Some(Self::Sent),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Cancelled)
    }

    /// `pending -> paused`; pausing a paused send is a no-op.
    pub fn pause(self) -> Result<(Self, StatusChange), DomainError> {
        match self {
            Self::Pending => Ok((Self::Paused, StatusChange::Applied)),
            Self::Paused => Ok((Self::Paused, StatusChange::Unchanged)),
            Self::Sent | Self::Cancelled => {
                Err(DomainError::InvalidScheduleTransition { from: self, action: "pause" })
            }
        }
    }

    /// `paused -> pending`; every other state is rejected.
    pub fn resume(self) -> Result<Self, DomainError> {
        match self {
            Self::Paused => Ok(Self::Pending),
            other => Err(DomainError::InvalidScheduleTransition { from: other, action: "resume" }),
        }
    }
}

/// A follow-up email queued by the campaign engine for one buyer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledSend {
    pub id: ScheduledSendId,
    pub campaign_id: CampaignId,
    pub buyer_email: BuyerEmail,
    pub step: u32,
    pub scheduled_for: DateTime<Utc>,
    pub status: ScheduledSendStatus,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledSend {
    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<StatusChange, DomainError> {
        let (next, change) = self.status.pause()?;
        if change.is_applied() {
            self.status = next;
            self.updated_at = now;
        }
        Ok(change)
    }

    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.status = self.status.resume()?;
        self.updated_at = now;
        Ok(())
    }
}
