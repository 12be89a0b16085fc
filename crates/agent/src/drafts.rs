use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use parley_core::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use parley_core::domain::campaign::{CampaignContext, CampaignId};
use parley_core::domain::conversation::{Message, MessageId, MessageOrigin};
use parley_core::domain::draft::{Draft, DraftId, DraftStatus};
use parley_core::domain::notification::NotificationKind;
use parley_core::domain::StatusChange;
use parley_core::errors::DomainError;
use parley_db::repositories::{CampaignRepository, ConversationRepository, DraftRepository};

use crate::collaborators::{DeliveryId, EmailTransport, Notifier};
use crate::errors::PipelineError;
use crate::runtime::{excerpt, owner_notification, reply_email};

const ACTOR: &str = "draft-review";
/// Compare-and-set attempts before a concurrently changing draft is reported.
const MAX_ATTEMPTS: usize = 3;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DraftSendReport {
    pub draft: Draft,
    pub delivery_id: DeliveryId,
    pub message_id: Option<MessageId>,
    pub notified: bool,
    pub warnings: Vec<String>,
}

/// Human review of drafted replies: edit, send or discard.
///
/// Every status change is written with a compare-and-set against the status
/// that was read, so two reviewers acting on the same draft cannot both send
/// it.
pub struct DraftReviewService {
    drafts: Arc<dyn DraftRepository>,
    conversations: Arc<dyn ConversationRepository>,
    campaigns: Arc<dyn CampaignRepository>,
    transport: Arc<dyn EmailTransport>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditSink>,
}

impl DraftReviewService {
    pub fn new(
        drafts: Arc<dyn DraftRepository>,
        conversations: Arc<dyn ConversationRepository>,
        campaigns: Arc<dyn CampaignRepository>,
        transport: Arc<dyn EmailTransport>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { drafts, conversations, campaigns, transport, notifier, audit }
    }

    pub async fn get(&self, id: &DraftId) -> Result<Draft, PipelineError> {
        self.drafts
            .find_by_id(id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("draft `{}`", id.0)))
    }

    /// Drafts still waiting on a reviewer, oldest first.
    pub async fn list_pending(&self, campaign_id: &CampaignId) -> Result<Vec<Draft>, PipelineError> {
        let mut drafts: Vec<Draft> = self
            .drafts
            .list_by_campaign(campaign_id, None)
            .await?
            .into_iter()
            .filter(|draft| !draft.status.is_final())
            .collect();
        drafts.sort_by(|left, right| left.created_at.cmp(&right.created_at));
        Ok(drafts)
    }

    pub async fn edit(
        &self,
        id: &DraftId,
        body: &str,
        subject: Option<String>,
        correlation_id: &str,
    ) -> Result<Draft, PipelineError> {
        for _ in 0..MAX_ATTEMPTS {
            let mut draft = self.get(id).await?;
            let expected = draft.status;
            draft.edit(body, subject.clone(), Utc::now())?;

            if self.drafts.save_if_status(&draft, expected).await? {
                self.emit(&draft, correlation_id, "review.draft_edited", AuditOutcome::Success);
                return Ok(draft);
            }
        }
        Err(concurrently_changed(id).into())
    }

    /// Claims the draft by moving it to `sent`, then hands it to the
    /// transport. A transport failure puts the draft back as it was.
    pub async fn send(
        &self,
        id: &DraftId,
        correlation_id: &str,
    ) -> Result<DraftSendReport, PipelineError> {
        let (before, sent) = self.claim_for_send(id).await?;
        let campaign = match self.campaign_for(&sent).await {
            Ok(campaign) => campaign,
            Err(error) => {
                self.release(&before).await;
                return Err(error);
            }
        };

        let answered = match self.conversations.find_by_id(&sent.conversation_id).await {
            Ok(conversation) => conversation.and_then(|conversation| {
                conversation.messages.into_iter().find(|message| message.id == sent.inbound_message_id)
            }),
            Err(_) => None,
        };
        let in_reply_to = answered.as_ref().and_then(|message| message.provider_message_id.clone());
        let buyer_text = answered.map(|message| message.body).unwrap_or_default();

        let email = reply_email(
            &campaign,
            &sent.buyer_email,
            sent.outgoing_subject(),
            sent.outgoing_body(),
            in_reply_to,
            "manual_reply",
        );
        let delivery_id = match self.transport.send(email).await {
            Ok(delivery_id) => delivery_id,
            Err(error) => {
                warn!(
                    event_name = "review.send_failed",
                    correlation_id,
                    draft_id = %id.0,
                    error = %error,
                    "reviewed reply not delivered; draft released"
                );
                self.release(&before).await;
                self.emit(&before, correlation_id, "review.send_failed", AuditOutcome::Failed);
                return Err(error.into());
            }
        };

        let mut warnings = Vec::new();
        let outbound = Message::outbound(
            MessageOrigin::Human,
            sent.outgoing_subject(),
            sent.outgoing_body(),
            Some(delivery_id.0.clone()),
            Utc::now(),
        );
        let message_id = outbound.id.clone();
        let message_id = match self
            .conversations
            .append_message(&sent.campaign_id, &sent.buyer_email, outbound)
            .await
        {
            Ok(_) => Some(message_id),
            Err(error) => {
                warnings.push(format!("sent reply not recorded in conversation: {error}"));
                None
            }
        };

        let mut notified = false;
        let notification = owner_notification(
            NotificationKind::ManuallySent,
            &campaign,
            &sent.buyer_email,
            &sent.conversation_id,
            &buyer_text,
        );
        if let Some(mut notification) = notification {
            notification.draft_id = Some(sent.id.0.clone());
            notification.reply_excerpt = Some(excerpt(sent.outgoing_body()));
            match self.notifier.notify(notification).await {
                Ok(()) => notified = true,
                Err(error) => warnings.push(format!("owner notification failed: {error}")),
            }
        }

        self.emit(&sent, correlation_id, "review.draft_sent", AuditOutcome::Success);
        info!(
            event_name = "review.draft_sent",
            correlation_id,
            draft_id = %id.0,
            delivery_id = %delivery_id.0,
            "reviewed reply sent"
        );
        Ok(DraftSendReport { draft: sent, delivery_id, message_id, notified, warnings })
    }

    /// Discarding an already-discarded draft succeeds without a write.
    pub async fn discard(&self, id: &DraftId, correlation_id: &str) -> Result<Draft, PipelineError> {
        for _ in 0..MAX_ATTEMPTS {
            let mut draft = self.get(id).await?;
            let expected = draft.status;
            if draft.discard(Utc::now())? == StatusChange::Unchanged {
                return Ok(draft);
            }
            if self.drafts.save_if_status(&draft, expected).await? {
                self.emit(&draft, correlation_id, "review.draft_discarded", AuditOutcome::Success);
                return Ok(draft);
            }
        }
        Err(concurrently_changed(id).into())
    }

    async fn claim_for_send(&self, id: &DraftId) -> Result<(Draft, Draft), PipelineError> {
        for _ in 0..MAX_ATTEMPTS {
            let before = self.get(id).await?;
            let mut sent = before.clone();
            sent.mark_sent(Utc::now())?;
            if self.drafts.save_if_status(&sent, before.status).await? {
                return Ok((before, sent));
            }
        }
        Err(concurrently_changed(id).into())
    }

    async fn release(&self, before: &Draft) {
        match self.drafts.save_if_status(before, DraftStatus::Sent).await {
            Ok(true) => {}
            Ok(false) => warn!(
                event_name = "review.release_skipped",
                draft_id = %before.id.0,
                "draft changed while sending; not released"
            ),
            Err(error) => warn!(
                event_name = "review.release_failed",
                draft_id = %before.id.0,
                error = %error,
                "draft left claimed after failed send"
            ),
        }
    }

    async fn campaign_for(&self, draft: &Draft) -> Result<CampaignContext, PipelineError> {
        self.campaigns
            .find_by_id(&draft.campaign_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("campaign `{}`", draft.campaign_id)))
    }

    fn emit(&self, draft: &Draft, correlation_id: &str, event_type: &str, outcome: AuditOutcome) {
        let audit = AuditContext::new(
            Some(draft.campaign_id.clone()),
            Some(draft.conversation_id.clone()),
            correlation_id,
            ACTOR,
        );
        self.audit.emit(
            audit
                .event(event_type, AuditCategory::Review, outcome)
                .with_metadata("draft_id", draft.id.0.clone())
                .with_metadata("status", draft.status.as_str()),
        );
    }
}

fn concurrently_changed(id: &DraftId) -> DomainError {
    DomainError::InvariantViolation(format!("draft {} kept changing during review", id.0))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use parley_core::audit::InMemoryAuditSink;
    use parley_core::domain::campaign::CampaignId;
    use parley_core::domain::conversation::{BuyerEmail, Message, MessageDirection, MessageOrigin};
    use parley_core::domain::draft::{Draft, DraftId, DraftStatus};
    use parley_core::domain::notification::NotificationKind;
    use parley_core::errors::DomainError;
    use parley_db::repositories::{CampaignRepository, ConversationRepository, DraftRepository, InMemoryStore};

    use super::DraftReviewService;
    use crate::errors::PipelineError;
    use crate::fakes::{campaign, RecordingNotifier, RecordingTransport};

    struct Harness {
        store: InMemoryStore,
        transport: Arc<RecordingTransport>,
        notifier: Arc<RecordingNotifier>,
        service: DraftReviewService,
        draft_id: DraftId,
    }

    async fn harness(transport: RecordingTransport) -> Harness {
        let store = InMemoryStore::new();
        let campaign = campaign("cmp-1");
        CampaignRepository::save(&store, campaign.clone()).await.expect("campaign");
        let buyer = BuyerEmail::parse("buyer@example.com").expect("valid");

        let inbound = Message::inbound(
            "Re: example.io",
            "Would you take $1,800?",
            Some("<m1@mail.example.com>".to_string()),
            Utc::now(),
        );
        let inbound_id = inbound.id.clone();
        let conversation_id = store
            .append_message(&campaign.campaign_id, &buyer, inbound)
            .await
            .expect("inbound");

        let draft = Draft::pending(
            campaign.campaign_id.clone(),
            conversation_id,
            buyer,
            inbound_id,
            "Re: example.io",
            "Thanks for the offer. I'll check with the owner.",
            Utc::now(),
        );
        let draft_id = draft.id.clone();
        store.insert(draft).await.expect("draft");

        let transport = Arc::new(transport);
        let notifier = Arc::new(RecordingNotifier::default());
        let service = DraftReviewService::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            transport.clone(),
            notifier.clone(),
            Arc::new(InMemoryAuditSink::default()),
        );
        Harness { store, transport, notifier, service, draft_id }
    }

    #[tokio::test]
    async fn edited_body_is_what_gets_sent() {
        let h = harness(RecordingTransport::default()).await;

        h.service
            .edit(&h.draft_id, "We can discuss $1,800 with the owner.", None, "req-1")
            .await
            .expect("edit");
        let report = h.service.send(&h.draft_id, "req-2").await.expect("send");

        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, "We can discuss $1,800 with the owner.");
        assert_eq!(sent[0].in_reply_to.as_deref(), Some("<m1@mail.example.com>"));
        assert_eq!(sent[0].tags, vec!["parley".to_string(), "manual_reply".to_string()]);
        assert_eq!(report.draft.status, DraftStatus::Sent);
        assert_eq!(report.draft.body, "Thanks for the offer. I'll check with the owner.");

        let conversation = h
            .store
            .conversation_for(
                &CampaignId("cmp-1".into()),
                &BuyerEmail::parse("buyer@example.com").expect("valid"),
            )
            .await
            .expect("conversation");
        let last = conversation.messages.last().expect("outbound");
        assert_eq!(last.direction, MessageDirection::Outbound);
        assert_eq!(last.origin, MessageOrigin::Human);
        assert_eq!(last.body, "We can discuss $1,800 with the owner.");

        assert!(report.notified);
        assert_eq!(h.notifier.notifications()[0].kind, NotificationKind::ManuallySent);
    }

    #[tokio::test]
    async fn sent_draft_rejects_edit_and_resend() {
        let h = harness(RecordingTransport::default()).await;
        h.service.send(&h.draft_id, "req-1").await.expect("send");

        let edit = h.service.edit(&h.draft_id, "late", None, "req-2").await.expect_err("final");
        assert!(matches!(edit, PipelineError::Domain(DomainError::AlreadyFinalized { .. })));

        let resend = h.service.send(&h.draft_id, "req-3").await.expect_err("final");
        assert!(matches!(resend, PipelineError::Domain(DomainError::AlreadySent { .. })));
        assert_eq!(h.transport.attempts(), 1);
    }

    #[tokio::test]
    async fn discarded_draft_stays_discarded() {
        let h = harness(RecordingTransport::default()).await;

        let discarded = h.service.discard(&h.draft_id, "req-1").await.expect("discard");
        assert_eq!(discarded.status, DraftStatus::Discarded);
        h.service.discard(&h.draft_id, "req-2").await.expect("discard again");

        let send = h.service.send(&h.draft_id, "req-3").await.expect_err("discarded");
        assert!(matches!(send, PipelineError::Domain(DomainError::AlreadyFinalized { .. })));
        assert_eq!(h.transport.attempts(), 0);
        assert!(h.service.list_pending(&CampaignId("cmp-1".into())).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn transport_failure_releases_the_draft() {
        let h = harness(RecordingTransport::failing()).await;

        let error = h.service.send(&h.draft_id, "req-1").await.expect_err("transport down");
        assert!(matches!(error, PipelineError::Delivery(_)));

        let draft = h.service.get(&h.draft_id).await.expect("draft");
        assert_eq!(draft.status, DraftStatus::Pending);
        assert!(draft.sent_at.is_none());
        assert!(h.notifier.notifications().is_empty());
    }

    #[tokio::test]
    async fn unknown_draft_is_not_found() {
        let h = harness(RecordingTransport::default()).await;

        let error = h.service.get(&DraftId("DRAFT-missing".into())).await.expect_err("missing");
        assert!(matches!(error, PipelineError::NotFound(_)));
        assert_eq!(
            h.service.list_pending(&CampaignId("cmp-1".into())).await.expect("list").len(),
            1
        );
    }
}
