use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use parley_core::audit::AuditEvent;
use parley_core::domain::campaign::{CampaignContext, CampaignId};
use parley_core::domain::conversation::{
    BuyerEmail, Conversation, ConversationId, Message, MessageDirection, MessageId,
};
use parley_core::domain::draft::{Draft, DraftId, DraftStatus};
use parley_core::domain::inbound::DedupKey;
use parley_core::domain::intent::Intent;
use parley_core::domain::schedule::{ScheduledSend, ScheduledSendId, ScheduledSendStatus};

use super::campaign::normalize_address;
use super::{
    AdmissionOutcome, AdmissionRequest, AuditRepository, CampaignRepository,
    ConversationRepository, DraftRepository, InboundAdmission, InboundGate, RepositoryError,
    ScheduledSendRepository, RECEIPT_RECEIVED,
};

#[derive(Default)]
struct MemoryState {
    campaigns: HashMap<CampaignId, CampaignContext>,
    conversations: HashMap<ConversationId, Conversation>,
    scheduled_sends: HashMap<ScheduledSendId, ScheduledSend>,
    drafts: HashMap<DraftId, Draft>,
    receipts: HashMap<DedupKey, String>,
    audit_events: Vec<AuditEvent>,
    fail_admissions: bool,
    fail_freeze: bool,
    fail_draft_inserts: bool,
}

impl MemoryState {
    fn conversation_id_for(&self, campaign_id: &CampaignId, buyer_email: &BuyerEmail) -> Option<ConversationId> {
        self.conversations
            .values()
            .find(|conversation| {
                &conversation.campaign_id == campaign_id && &conversation.buyer_email == buyer_email
            })
            .map(|conversation| conversation.id.clone())
    }

    fn append(
        &mut self,
        campaign_id: &CampaignId,
        buyer_email: &BuyerEmail,
        message: Message,
    ) -> Result<ConversationId, RepositoryError> {
        if !self.campaigns.contains_key(campaign_id) {
            return Err(RepositoryError::NotFound(format!("campaign `{campaign_id}`")));
        }

        let id = match self.conversation_id_for(campaign_id, buyer_email) {
            Some(id) => id,
            None => {
                let conversation =
                    Conversation::start(campaign_id.clone(), buyer_email.clone(), message.sent_at);
                let id = conversation.id.clone();
                self.conversations.insert(id.clone(), conversation);
                id
            }
        };

        if let Some(conversation) = self.conversations.get_mut(&id) {
            conversation.append(message);
        }
        Ok(id)
    }

    fn pause_pending(
        &mut self,
        campaign_id: &CampaignId,
        buyer_email: &BuyerEmail,
        at: DateTime<Utc>,
    ) -> Result<Vec<ScheduledSendId>, RepositoryError> {
        let mut candidates: Vec<&mut ScheduledSend> = self
            .scheduled_sends
            .values_mut()
            .filter(|send| {
                &send.campaign_id == campaign_id
                    && &send.buyer_email == buyer_email
                    && send.status == ScheduledSendStatus::Pending
            })
            .collect();
        candidates.sort_by(|left, right| {
            left.scheduled_for.cmp(&right.scheduled_for).then_with(|| left.id.0.cmp(&right.id.0))
        });

        let mut paused = Vec::new();
        for send in candidates {
            let change =
                send.pause(at).map_err(|error| RepositoryError::Decode(error.to_string()))?;
            if change.is_applied() {
                paused.push(send.id.clone());
            }
        }
        Ok(paused)
    }
}

/// All repositories over one shared in-memory state. A single lock covers
/// every table, so `admit` is atomic the same way the SQL transaction is.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later `admit` fail as if the database were unreachable.
    pub async fn fail_admissions(&self, fail: bool) {
        self.state.write().await.fail_admissions = fail;
    }

    /// Makes the pause step of later admissions fail.
    pub async fn fail_freeze(&self, fail: bool) {
        self.state.write().await.fail_freeze = fail;
    }

    /// Makes later draft inserts fail.
    pub async fn fail_draft_inserts(&self, fail: bool) {
        self.state.write().await.fail_draft_inserts = fail;
    }

    pub async fn conversation_for(
        &self,
        campaign_id: &CampaignId,
        buyer_email: &BuyerEmail,
    ) -> Option<Conversation> {
        let state = self.state.read().await;
        state
            .conversation_id_for(campaign_id, buyer_email)
            .and_then(|id| state.conversations.get(&id).cloned())
    }

    pub async fn drafts(&self) -> Vec<Draft> {
        let mut drafts: Vec<Draft> = self.state.read().await.drafts.values().cloned().collect();
        drafts.sort_by(|left, right| left.created_at.cmp(&right.created_at));
        drafts
    }

    pub async fn scheduled_send(&self, id: &ScheduledSendId) -> Option<ScheduledSend> {
        self.state.read().await.scheduled_sends.get(id).cloned()
    }

    pub async fn receipt_outcome(&self, dedup_key: &DedupKey) -> Option<String> {
        self.state.read().await.receipts.get(dedup_key).cloned()
    }

    pub async fn audit_events(&self) -> Vec<AuditEvent> {
        self.state.read().await.audit_events.clone()
    }
}

#[async_trait::async_trait]
impl CampaignRepository for InMemoryStore {
    async fn find_by_id(&self, id: &CampaignId) -> Result<Option<CampaignContext>, RepositoryError> {
        Ok(self.state.read().await.campaigns.get(id).cloned())
    }

    async fn find_by_sender_address(
        &self,
        address: &str,
    ) -> Result<Option<CampaignContext>, RepositoryError> {
        let address = normalize_address(address);
        let state = self.state.read().await;
        Ok(state
            .campaigns
            .values()
            .find(|campaign| normalize_address(&campaign.sender_address) == address)
            .cloned())
    }

    async fn save(&self, campaign: CampaignContext) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.campaigns.insert(campaign.campaign_id.clone(), campaign);
        Ok(())
    }
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryStore {
    async fn find(
        &self,
        campaign_id: &CampaignId,
        buyer_email: &BuyerEmail,
    ) -> Result<Option<Conversation>, RepositoryError> {
        Ok(self.conversation_for(campaign_id, buyer_email).await)
    }

    async fn find_by_id(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        Ok(self.state.read().await.conversations.get(id).cloned())
    }

    async fn append_message(
        &self,
        campaign_id: &CampaignId,
        buyer_email: &BuyerEmail,
        message: Message,
    ) -> Result<ConversationId, RepositoryError> {
        self.state.write().await.append(campaign_id, buyer_email, message)
    }

    async fn attach_intent(
        &self,
        message_id: &MessageId,
        intent: &Intent,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        let target = state
            .conversations
            .values_mut()
            .flat_map(|conversation| conversation.messages.iter_mut())
            .find(|message| &message.id == message_id);

        match target {
            Some(message)
                if message.direction == MessageDirection::Inbound && message.intent.is_none() =>
            {
                message.intent = Some(intent.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait::async_trait]
impl ScheduledSendRepository for InMemoryStore {
    async fn find_by_id(
        &self,
        id: &ScheduledSendId,
    ) -> Result<Option<ScheduledSend>, RepositoryError> {
        Ok(self.scheduled_send(id).await)
    }

    async fn list_for_buyer(
        &self,
        campaign_id: &CampaignId,
        buyer_email: &BuyerEmail,
        status: Option<ScheduledSendStatus>,
    ) -> Result<Vec<ScheduledSend>, RepositoryError> {
        let state = self.state.read().await;
        let mut sends: Vec<ScheduledSend> = state
            .scheduled_sends
            .values()
            .filter(|send| &send.campaign_id == campaign_id && &send.buyer_email == buyer_email)
            .filter(|send| status.map_or(true, |status| send.status == status))
            .cloned()
            .collect();
        sends.sort_by(|left, right| {
            left.scheduled_for.cmp(&right.scheduled_for).then_with(|| left.id.0.cmp(&right.id.0))
        });
        Ok(sends)
    }

    async fn save(&self, send: ScheduledSend) -> Result<(), RepositoryError> {
        self.state.write().await.scheduled_sends.insert(send.id.clone(), send);
        Ok(())
    }

    async fn transition(
        &self,
        id: &ScheduledSendId,
        expected: ScheduledSendStatus,
        next: ScheduledSendStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        match state.scheduled_sends.get_mut(id) {
            Some(send) if send.status == expected => {
                send.status = next;
                send.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn pause_pending(
        &self,
        campaign_id: &CampaignId,
        buyer_email: &BuyerEmail,
        at: DateTime<Utc>,
    ) -> Result<Vec<ScheduledSendId>, RepositoryError> {
        self.state.write().await.pause_pending(campaign_id, buyer_email, at)
    }
}

#[async_trait::async_trait]
impl DraftRepository for InMemoryStore {
    async fn find_by_id(&self, id: &DraftId) -> Result<Option<Draft>, RepositoryError> {
        Ok(self.state.read().await.drafts.get(id).cloned())
    }

    async fn list_by_campaign(
        &self,
        campaign_id: &CampaignId,
        status: Option<DraftStatus>,
    ) -> Result<Vec<Draft>, RepositoryError> {
        Ok(self
            .drafts()
            .await
            .into_iter()
            .filter(|draft| &draft.campaign_id == campaign_id)
            .filter(|draft| status.map_or(true, |status| draft.status == status))
            .collect())
    }

    async fn insert(&self, draft: Draft) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        if state.fail_draft_inserts {
            return Err(RepositoryError::Decode("draft store unavailable".to_string()));
        }
        if state.drafts.contains_key(&draft.id) {
            return Err(RepositoryError::Decode(format!("duplicate draft id `{}`", draft.id.0)));
        }
        state.drafts.insert(draft.id.clone(), draft);
        Ok(())
    }

    async fn save_if_status(
        &self,
        draft: &Draft,
        expected: DraftStatus,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        match state.drafts.get_mut(&draft.id) {
            Some(stored) if stored.status == expected => {
                *stored = draft.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait::async_trait]
impl InboundGate for InMemoryStore {
    async fn admit(&self, request: AdmissionRequest) -> Result<AdmissionOutcome, RepositoryError> {
        let mut state = self.state.write().await;
        if state.fail_admissions {
            return Err(RepositoryError::Database(sqlx::Error::PoolTimedOut));
        }
        if state.receipts.contains_key(&request.dedup_key) {
            return Ok(AdmissionOutcome::Duplicate);
        }

        let message_id = request.message.id.clone();
        let conversation_id =
            state.append(&request.campaign_id, &request.buyer_email, request.message)?;
        state.receipts.insert(request.dedup_key, RECEIPT_RECEIVED.to_string());

        let (paused, freeze_error) = if state.fail_freeze {
            (Vec::new(), Some("scheduled send store unavailable".to_string()))
        } else {
            match state.pause_pending(&request.campaign_id, &request.buyer_email, request.received_at) {
                Ok(paused) => (paused, None),
                Err(error) => (Vec::new(), Some(error.to_string())),
            }
        };

        Ok(AdmissionOutcome::Admitted(InboundAdmission {
            conversation_id,
            message_id,
            paused,
            freeze_error,
        }))
    }

    async fn record_outcome(
        &self,
        dedup_key: &DedupKey,
        outcome: &str,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        match state.receipts.get_mut(dedup_key) {
            Some(stored) => {
                *stored = outcome.to_string();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(format!("inbound receipt `{}`", dedup_key.as_str()))),
        }
    }
}

#[async_trait::async_trait]
impl AuditRepository for InMemoryStore {
    async fn append(&self, event: &AuditEvent) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        if !state.audit_events.iter().any(|existing| existing.event_id == event.event_id) {
            state.audit_events.push(event.clone());
        }
        Ok(())
    }

    async fn list_for_correlation(
        &self,
        correlation_id: &str,
    ) -> Result<Vec<AuditEvent>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .audit_events
            .iter()
            .filter(|event| event.correlation_id == correlation_id)
            .cloned()
            .collect())
    }

    async fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<AuditEvent>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .audit_events
            .iter()
            .filter(|event| event.conversation_id.as_ref() == Some(conversation_id))
            .cloned()
            .collect())
    }
}
