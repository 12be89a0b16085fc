use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use parley_core::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use parley_core::classifier::IntentClassifier;
use parley_core::domain::campaign::{CampaignContext, CampaignId};
use parley_core::domain::conversation::{
    BuyerEmail, ConversationId, Message, MessageId, MessageOrigin,
};
use parley_core::domain::draft::{Draft, DraftId};
use parley_core::domain::inbound::{strip_quoted_reply, DedupKey, InboundEmail};
use parley_core::domain::intent::Intent;
use parley_core::domain::notification::{NotificationKind, OwnerNotification};
use parley_core::domain::schedule::ScheduledSendId;
use parley_core::errors::DomainError;
use parley_core::flows::{
    FlowEngine, ReplyAction, ReplyContext, ReplyEvent, ReplyFlow, ReplyState, TransitionOutcome,
};
use parley_core::negotiation::{NegotiationDecision, NegotiationPolicy};
use parley_db::repositories::{
    AdmissionOutcome, AdmissionRequest, CampaignRepository, ConversationRepository,
    DraftRepository, InboundGate,
};

use crate::collaborators::{
    CollaboratorError, DeliveryId, EmailTransport, EscrowProvider, Notifier, OfferRequest,
    OutboundEmail, PaymentOffer,
};
use crate::composer::{ComposeRequest, ComposedReply, ReplyComposer, ReplySource};
use crate::errors::PipelineError;

const ACTOR: &str = "reply-pipeline";
const EXCERPT_CHARS: usize = 500;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplySettings {
    pub escrow_timeout: Duration,
    pub offer_validity_hours: u32,
}

impl Default for ReplySettings {
    fn default() -> Self {
        Self { escrow_timeout: Duration::from_secs(10), offer_validity_hours: 72 }
    }
}

pub struct ReplyDependencies {
    pub campaigns: Arc<dyn CampaignRepository>,
    pub conversations: Arc<dyn ConversationRepository>,
    pub drafts: Arc<dyn DraftRepository>,
    pub gate: Arc<dyn InboundGate>,
    pub classifier: Arc<dyn IntentClassifier>,
    pub policy: Arc<dyn NegotiationPolicy>,
    pub composer: ReplyComposer,
    pub escrow: Arc<dyn EscrowProvider>,
    pub transport: Arc<dyn EmailTransport>,
    pub notifier: Arc<dyn Notifier>,
    pub audit: Arc<dyn AuditSink>,
}

/// What happened to one inbound email.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReplyReport {
    pub outcome: ReplyState,
    pub correlation_id: String,
    pub campaign_id: Option<CampaignId>,
    pub conversation_id: Option<ConversationId>,
    pub inbound_message_id: Option<MessageId>,
    pub paused: Vec<ScheduledSendId>,
    pub intent: Option<Intent>,
    pub decision: Option<NegotiationDecision>,
    pub reply_source: Option<ReplySource>,
    pub payment_offer: Option<PaymentOffer>,
    pub draft_id: Option<DraftId>,
    pub outbound_message_id: Option<MessageId>,
    pub delivery_id: Option<DeliveryId>,
    pub notified: Option<NotificationKind>,
    /// Non-fatal failures after the inbound message was recorded.
    pub warnings: Vec<String>,
}

impl ReplyReport {
    fn new(correlation_id: &str) -> Self {
        Self {
            outcome: ReplyState::Received,
            correlation_id: correlation_id.to_string(),
            campaign_id: None,
            conversation_id: None,
            inbound_message_id: None,
            paused: Vec::new(),
            intent: None,
            decision: None,
            reply_source: None,
            payment_offer: None,
            draft_id: None,
            outbound_message_id: None,
            delivery_id: None,
            notified: None,
            warnings: Vec::new(),
        }
    }
}

/// Everything the delivery step needs once the flow has resolved.
#[derive(Clone, Copy)]
struct Delivery<'a> {
    outcome: &'a TransitionOutcome,
    reply: &'a ComposedReply,
    campaign: &'a CampaignContext,
    buyer_email: &'a BuyerEmail,
    email: &'a InboundEmail,
    inbound_message_id: &'a MessageId,
    conversation_id: &'a ConversationId,
}

/// Drives one inbound buyer email through the reply flow.
///
/// Only campaign resolution and admission can fail the call. Once the inbound
/// message is recorded, every later failure becomes a warning on the report so
/// the webhook is acknowledged and the provider does not redeliver.
pub struct ReplyOrchestrator {
    deps: ReplyDependencies,
    settings: ReplySettings,
    engine: FlowEngine<ReplyFlow>,
}

impl ReplyOrchestrator {
    pub fn new(deps: ReplyDependencies, settings: ReplySettings) -> Self {
        Self { deps, settings, engine: FlowEngine::default() }
    }

    pub async fn handle(
        &self,
        email: InboundEmail,
        correlation_id: &str,
    ) -> Result<ReplyReport, PipelineError> {
        let mut report = ReplyReport::new(correlation_id);
        let mut audit = AuditContext::new(None, None, correlation_id, ACTOR);
        let mut context = ReplyContext::default();
        let mut state = self.engine.initial_state();

        let buyer_email = BuyerEmail::parse(&email.sender)?;

        let Some(campaign) = self.resolve_campaign(&email).await? else {
            info!(
                event_name = "pipeline.no_campaign_match",
                correlation_id,
                recipient = %email.recipient,
                "inbound email matched no campaign"
            );
            state = self.step(state, ReplyEvent::CampaignUnresolved, &context, &audit)?.to;
            report.outcome = state;
            return Ok(report);
        };
        audit = AuditContext::new(Some(campaign.campaign_id.clone()), None, correlation_id, ACTOR);
        report.campaign_id = Some(campaign.campaign_id.clone());

        let dedup_key = email.dedup_key();
        let inbound = Message::inbound(
            email.subject.clone(),
            email.body.clone(),
            email.provider_message_id.clone(),
            email.received_at,
        );
        let admission = match self
            .deps
            .gate
            .admit(AdmissionRequest {
                dedup_key: dedup_key.clone(),
                campaign_id: campaign.campaign_id.clone(),
                buyer_email: buyer_email.clone(),
                message: inbound.clone(),
                received_at: email.received_at,
            })
            .await?
        {
            AdmissionOutcome::Admitted(admission) => admission,
            AdmissionOutcome::Duplicate => {
                info!(
                    event_name = "pipeline.duplicate",
                    correlation_id,
                    dedup_key = dedup_key.as_str(),
                    "inbound email already processed"
                );
                state = self.step(state, ReplyEvent::DuplicateDelivery, &context, &audit)?.to;
                report.outcome = state;
                return Ok(report);
            }
        };

        audit = audit.with_conversation(admission.conversation_id.clone());
        report.conversation_id = Some(admission.conversation_id.clone());
        report.inbound_message_id = Some(admission.message_id.clone());
        report.paused = admission.paused.clone();
        match &admission.freeze_error {
            Some(error) => {
                report.warnings.push(format!("scheduled sends not paused: {error}"));
                self.deps.audit.emit(
                    audit
                        .event("schedule.freeze_failed", AuditCategory::Schedule, AuditOutcome::Degraded)
                        .with_metadata("error", error.clone()),
                );
            }
            None => {
                self.deps.audit.emit(
                    audit
                        .event("schedule.frozen", AuditCategory::Schedule, AuditOutcome::Success)
                        .with_metadata("paused", admission.paused.len().to_string()),
                );
            }
        }

        context.auto_respond = campaign.auto_respond;
        context.notification_configured = campaign.notification_address().is_some();
        state = self.step(state, ReplyEvent::InboundRecorded, &context, &audit)?.to;

        let intent = self.deps.classifier.classify(&email.body);
        match self.deps.conversations.attach_intent(&admission.message_id, &intent).await {
            Ok(true) => {}
            Ok(false) => report.warnings.push("intent snapshot already recorded".to_string()),
            Err(error) => report.warnings.push(format!("intent snapshot not stored: {error}")),
        }
        self.deps.audit.emit(
            audit
                .event("classification.completed", AuditCategory::Classification, AuditOutcome::Success)
                .with_metadata("sentiment", intent.sentiment.as_str())
                .with_metadata(
                    "offered_price",
                    intent.offered_price.map(|price| price.to_string()).unwrap_or_default(),
                ),
        );
        context.opted_out = intent.is_opt_out();
        report.intent = Some(intent.clone());

        let outcome = self.step(state, ReplyEvent::IntentClassified, &context, &audit)?;
        state = outcome.to;
        if state == ReplyState::BuyerOptedOut {
            if let Some(kind) = outcome.notification() {
                let notification = owner_notification(
                    kind,
                    &campaign,
                    &buyer_email,
                    &admission.conversation_id,
                    &email.body,
                );
                self.notify(notification, &mut report, &audit).await;
            }
            return Ok(self.finish(report, state, &dedup_key).await);
        }

        let decision = self.deps.policy.decide(&intent, &campaign.pricing);
        self.deps.audit.emit(
            audit
                .event("negotiation.decided", AuditCategory::Negotiation, AuditOutcome::Success)
                .with_metadata("stance", decision.stance.as_str())
                .with_metadata("escrow_allowed", decision.escrow_allowed.to_string())
                .with_metadata("requires_owner_approval", decision.requires_owner_approval.to_string())
                .with_metadata("reasons", decision.reasons.join("; ")),
        );
        report.decision = Some(decision.clone());

        let history = match self.deps.conversations.find_by_id(&admission.conversation_id).await {
            Ok(conversation) => {
                conversation.map(|conversation| conversation.messages).unwrap_or_default()
            }
            Err(error) => {
                report.warnings.push(format!("conversation history unavailable: {error}"));
                Vec::new()
            }
        };
        let mut reply = self
            .deps
            .composer
            .compose(&ComposeRequest {
                campaign: &campaign,
                decision: &decision,
                intent: &intent,
                inbound: &inbound,
                history: &history,
            })
            .await?;
        report.reply_source = Some(reply.source);
        self.deps.audit.emit(
            audit
                .event(
                    "composition.completed",
                    AuditCategory::Composition,
                    match reply.source {
                        ReplySource::Generated => AuditOutcome::Success,
                        ReplySource::Fallback => AuditOutcome::Degraded,
                    },
                )
                .with_metadata("source", reply.source.as_str())
                .with_metadata("guardrail_findings", reply.guardrail_findings.join(",")),
        );

        context.escrow_allowed = decision.escrow_allowed;
        let outcome = self.step(state, ReplyEvent::ReplyComposed, &context, &audit)?;
        state = outcome.to;
        if outcome.requires(&ReplyAction::RequestPaymentOffer) {
            self.attach_payment(
                &mut reply,
                &campaign,
                &buyer_email,
                &admission.conversation_id,
                &decision,
                &mut report,
                &audit,
            )
            .await?;
        }

        let outcome = self.step(state, ReplyEvent::DeliveryResolved, &context, &audit)?;
        state = outcome.to;
        let delivery = Delivery {
            outcome: &outcome,
            reply: &reply,
            campaign: &campaign,
            buyer_email: &buyer_email,
            email: &email,
            inbound_message_id: &admission.message_id,
            conversation_id: &admission.conversation_id,
        };
        if outcome.requires(&ReplyAction::PersistOutboundMessage) {
            self.auto_send(&delivery, &mut report, &audit).await;
        }
        if outcome.requires(&ReplyAction::CreateDraft) {
            self.create_draft(&delivery, &mut report, &audit).await;
        }

        Ok(self.finish(report, state, &dedup_key).await)
    }

    async fn resolve_campaign(
        &self,
        email: &InboundEmail,
    ) -> Result<Option<CampaignContext>, PipelineError> {
        if let Some(campaign_id) = &email.campaign_id {
            if let Some(campaign) = self.deps.campaigns.find_by_id(campaign_id).await? {
                return Ok(Some(campaign));
            }
        }

        // Recipient headers may list several addresses in display-name form.
        for raw in email.recipient.split(',') {
            let Ok(address) = BuyerEmail::parse(raw) else {
                continue;
            };
            if let Some(campaign) =
                self.deps.campaigns.find_by_sender_address(address.as_str()).await?
            {
                return Ok(Some(campaign));
            }
        }
        Ok(None)
    }

    fn step(
        &self,
        state: ReplyState,
        event: ReplyEvent,
        context: &ReplyContext,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, PipelineError> {
        self.engine
            .apply_with_audit(&state, &event, context, self.deps.audit.as_ref(), audit)
            .map_err(|error| PipelineError::Domain(DomainError::from(error)))
    }

    #[allow(clippy::too_many_arguments)]
    async fn attach_payment(
        &self,
        reply: &mut ComposedReply,
        campaign: &CampaignContext,
        buyer_email: &BuyerEmail,
        conversation_id: &ConversationId,
        decision: &NegotiationDecision,
        report: &mut ReplyReport,
        audit: &AuditContext,
    ) -> Result<(), PipelineError> {
        let offer = match decision.price_to_quote {
            Some(amount) => {
                let request = OfferRequest {
                    campaign_id: campaign.campaign_id.clone(),
                    conversation_id: conversation_id.clone(),
                    domain_name: campaign.domain_name.clone(),
                    buyer_email: buyer_email.clone(),
                    seller_email: campaign.seller_email.clone(),
                    amount,
                    currency: campaign.currency.clone(),
                    validity_hours: self.settings.offer_validity_hours,
                };
                match tokio::time::timeout(
                    self.settings.escrow_timeout,
                    self.deps.escrow.create_offer(request),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(CollaboratorError::Timeout(self.settings.escrow_timeout)),
                }
            }
            None => Err(CollaboratorError::Rejected("no price to quote".to_string())),
        };

        match offer {
            Ok(offer) => {
                self.deps.composer.append_payment_section(
                    reply,
                    campaign,
                    &offer,
                    self.settings.offer_validity_hours,
                )?;
                self.deps.audit.emit(
                    audit
                        .event("escrow.offer_created", AuditCategory::Delivery, AuditOutcome::Success)
                        .with_metadata("amount", offer.amount.to_string()),
                );
                report.payment_offer = Some(offer);
            }
            Err(error) => {
                warn!(
                    event_name = "escrow.offer_failed",
                    correlation_id = %report.correlation_id,
                    error = %error,
                    "payment offer unavailable; adding confirm-price note"
                );
                self.deps.composer.append_confirm_price_note(reply, campaign)?;
                self.deps.audit.emit(
                    audit
                        .event("escrow.offer_failed", AuditCategory::Delivery, AuditOutcome::Degraded)
                        .with_metadata("error", error.to_string()),
                );
                report.warnings.push(format!("payment offer unavailable: {error}"));
            }
        }
        Ok(())
    }

    async fn auto_send(
        &self,
        delivery: &Delivery<'_>,
        report: &mut ReplyReport,
        audit: &AuditContext,
    ) {
        let Delivery { outcome, reply, campaign, buyer_email, email, conversation_id, .. } =
            *delivery;
        let sent_at = Utc::now().max(email.received_at);
        let outbound =
            Message::outbound(MessageOrigin::Automated, &reply.subject, &reply.body, None, sent_at);
        let outbound_id = outbound.id.clone();

        // The copy in the conversation must exist before the email leaves.
        let delivery_issue = match self
            .deps
            .conversations
            .append_message(&campaign.campaign_id, buyer_email, outbound)
            .await
        {
            Err(error) => {
                warn!(
                    event_name = "delivery.persist_failed",
                    correlation_id = %report.correlation_id,
                    error = %error,
                    "outbound reply not recorded; email not sent"
                );
                report.warnings.push(format!("outbound reply not recorded, not sent: {error}"));
                Some(format!("the reply could not be recorded, so it was not sent: {error}"))
            }
            Ok(_) => {
                report.outbound_message_id = Some(outbound_id);
                self.send_reply(campaign, buyer_email, reply, email, report, audit).await
            }
        };

        if let Some(kind) = outcome.notification() {
            let notification = owner_notification(
                kind,
                campaign,
                buyer_email,
                conversation_id,
                &email.body,
            )
            .map(|notification| OwnerNotification {
                reply_excerpt: Some(excerpt(&reply.body)),
                delivery_issue,
                ..notification
            });
            self.notify(notification, report, audit).await;
        }
    }

    /// Returns the problem to report to the owner when the send failed.
    async fn send_reply(
        &self,
        campaign: &CampaignContext,
        buyer_email: &BuyerEmail,
        reply: &ComposedReply,
        email: &InboundEmail,
        report: &mut ReplyReport,
        audit: &AuditContext,
    ) -> Option<String> {
        let message = reply_email(
            campaign,
            buyer_email,
            &reply.subject,
            &reply.body,
            email.provider_message_id.clone(),
            "auto_response",
        );
        match self.deps.transport.send(message).await {
            Ok(delivery_id) => {
                self.deps.audit.emit(
                    audit
                        .event("delivery.sent", AuditCategory::Delivery, AuditOutcome::Success)
                        .with_metadata("delivery_id", delivery_id.0.clone()),
                );
                report.delivery_id = Some(delivery_id);
                None
            }
            Err(error) => {
                warn!(
                    event_name = "delivery.send_failed",
                    correlation_id = %report.correlation_id,
                    error = %error,
                    "automatic reply not delivered"
                );
                self.deps.audit.emit(
                    audit
                        .event("delivery.send_failed", AuditCategory::Delivery, AuditOutcome::Failed)
                        .with_metadata("error", error.to_string()),
                );
                report.warnings.push(format!("automatic reply not delivered: {error}"));
                Some(format!("the email provider did not accept the reply: {error}"))
            }
        }
    }

    async fn create_draft(
        &self,
        delivery: &Delivery<'_>,
        report: &mut ReplyReport,
        audit: &AuditContext,
    ) {
        let Delivery { outcome, reply, campaign, buyer_email, email, inbound_message_id, conversation_id } =
            *delivery;
        let draft = Draft::pending(
            campaign.campaign_id.clone(),
            conversation_id.clone(),
            buyer_email.clone(),
            inbound_message_id.clone(),
            &reply.subject,
            &reply.body,
            Utc::now(),
        );
        let draft_id = draft.id.clone();

        let delivery_issue = match self.deps.drafts.insert(draft).await {
            Ok(()) => {
                self.deps.audit.emit(
                    audit
                        .event("review.draft_created", AuditCategory::Review, AuditOutcome::Success)
                        .with_metadata("draft_id", draft_id.0.clone()),
                );
                report.draft_id = Some(draft_id);
                None
            }
            Err(error) => {
                warn!(
                    event_name = "review.draft_failed",
                    correlation_id = %report.correlation_id,
                    error = %error,
                    "draft not stored"
                );
                self.deps.audit.emit(
                    audit
                        .event("review.draft_failed", AuditCategory::Review, AuditOutcome::Failed)
                        .with_metadata("error", error.to_string()),
                );
                report.warnings.push(format!("draft not stored: {error}"));
                Some(format!("the draft could not be stored: {error}"))
            }
        };

        if let Some(kind) = outcome.notification() {
            let notification = owner_notification(
                kind,
                campaign,
                buyer_email,
                conversation_id,
                &email.body,
            )
            .map(|notification| OwnerNotification {
                draft_id: report.draft_id.as_ref().map(|id| id.0.clone()),
                reply_excerpt: Some(excerpt(&reply.body)),
                delivery_issue,
                ..notification
            });
            self.notify(notification, report, audit).await;
        }
    }

    async fn notify(
        &self,
        notification: Option<OwnerNotification>,
        report: &mut ReplyReport,
        audit: &AuditContext,
    ) {
        let Some(notification) = notification else {
            return;
        };
        let kind = notification.kind;
        match self.deps.notifier.notify(notification).await {
            Ok(()) => {
                self.deps.audit.emit(
                    audit
                        .event("notify.sent", AuditCategory::Delivery, AuditOutcome::Success)
                        .with_metadata("kind", kind.as_str()),
                );
                report.notified = Some(kind);
            }
            Err(error) => {
                warn!(
                    event_name = "notify.failed",
                    correlation_id = %report.correlation_id,
                    kind = kind.as_str(),
                    error = %error,
                    "owner notification failed"
                );
                report.warnings.push(format!("owner notification failed: {error}"));
            }
        }
    }

    async fn finish(
        &self,
        mut report: ReplyReport,
        state: ReplyState,
        dedup_key: &DedupKey,
    ) -> ReplyReport {
        report.outcome = state;
        if let Err(error) = self.deps.gate.record_outcome(dedup_key, state.as_str()).await {
            report.warnings.push(format!("receipt outcome not recorded: {error}"));
        }
        info!(
            event_name = "pipeline.completed",
            correlation_id = %report.correlation_id,
            outcome = state.as_str(),
            warnings = report.warnings.len(),
            "inbound email processed"
        );
        report
    }
}

pub(crate) fn owner_notification(
    kind: NotificationKind,
    campaign: &CampaignContext,
    buyer_email: &BuyerEmail,
    conversation_id: &ConversationId,
    buyer_text: &str,
) -> Option<OwnerNotification> {
    let to = campaign.notification_address()?;
    Some(OwnerNotification {
        kind,
        to: to.to_string(),
        campaign_id: campaign.campaign_id.clone(),
        domain_name: campaign.domain_name.clone(),
        buyer_email: buyer_email.clone(),
        conversation_id: conversation_id.clone(),
        draft_id: None,
        buyer_excerpt: excerpt(&strip_quoted_reply(buyer_text)),
        reply_excerpt: None,
        delivery_issue: None,
    })
}

pub(crate) fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}...", trimmed[..cut].trim_end()),
        None => trimmed.to_string(),
    }
}

/// Email to the buyer, threaded under the message being answered.
pub(crate) fn reply_email(
    campaign: &CampaignContext,
    buyer_email: &BuyerEmail,
    subject: &str,
    body: &str,
    in_reply_to: Option<String>,
    kind_tag: &str,
) -> OutboundEmail {
    OutboundEmail {
        to: buyer_email.to_string(),
        subject: subject.to_string(),
        text: body.to_string(),
        html: None,
        reply_to: Some(campaign.sender_address.clone()),
        tags: vec!["parley".to_string(), kind_tag.to_string()],
        references: in_reply_to.iter().cloned().collect(),
        in_reply_to,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use rust_decimal::Decimal;

    use parley_core::audit::InMemoryAuditSink;
    use parley_core::classifier::KeywordIntentClassifier;
    use parley_core::domain::campaign::{CampaignContext, CampaignId};
    use parley_core::domain::conversation::{BuyerEmail, MessageDirection, MessageOrigin};
    use parley_core::domain::inbound::InboundEmail;
    use parley_core::domain::notification::NotificationKind;
    use parley_core::domain::schedule::{ScheduledSend, ScheduledSendId, ScheduledSendStatus};
    use parley_core::flows::ReplyState;
    use parley_core::negotiation::DeterministicNegotiationPolicy;
    use parley_db::repositories::{CampaignRepository, InMemoryStore, ScheduledSendRepository};

    use super::{ReplyDependencies, ReplyOrchestrator, ReplySettings};
    use crate::composer::{ReplyComposer, ReplySource};
    use crate::errors::PipelineError;
    use crate::fakes::{campaign, FakeEscrow, RecordingNotifier, RecordingTransport};
    use crate::guardrails::GuardrailPolicy;
    use crate::llm::DisabledGenerator;
    use crate::templates::ReplyTemplates;

    struct Harness {
        store: InMemoryStore,
        transport: Arc<RecordingTransport>,
        notifier: Arc<RecordingNotifier>,
        escrow: Arc<FakeEscrow>,
        audit: InMemoryAuditSink,
        orchestrator: ReplyOrchestrator,
    }

    async fn harness(campaign: CampaignContext, escrow: FakeEscrow) -> Harness {
        harness_with(campaign, escrow, RecordingTransport::default()).await
    }

    async fn harness_with(
        campaign: CampaignContext,
        escrow: FakeEscrow,
        transport: RecordingTransport,
    ) -> Harness {
        let store = InMemoryStore::new();
        CampaignRepository::save(&store, campaign).await.expect("campaign");
        let transport = Arc::new(transport);
        let notifier = Arc::new(RecordingNotifier::default());
        let escrow = Arc::new(escrow);
        let audit = InMemoryAuditSink::default();

        let orchestrator = ReplyOrchestrator::new(
            ReplyDependencies {
                campaigns: Arc::new(store.clone()),
                conversations: Arc::new(store.clone()),
                drafts: Arc::new(store.clone()),
                gate: Arc::new(store.clone()),
                classifier: Arc::new(KeywordIntentClassifier),
                policy: Arc::new(DeterministicNegotiationPolicy),
                composer: ReplyComposer::new(
                    Arc::new(DisabledGenerator),
                    Arc::new(ReplyTemplates::new().expect("templates")),
                    GuardrailPolicy::default(),
                    Duration::from_millis(200),
                ),
                escrow: escrow.clone(),
                transport: transport.clone(),
                notifier: notifier.clone(),
                audit: Arc::new(audit.clone()),
            },
            ReplySettings::default(),
        );

        Harness { store, transport, notifier, escrow, audit, orchestrator }
    }

    fn auto_responding(id: &str) -> CampaignContext {
        CampaignContext { auto_respond: true, ..campaign(id) }
    }

    fn email(message_id: &str, body: &str) -> InboundEmail {
        InboundEmail {
            sender: "Jane Buyer <Buyer@Example.com>".to_string(),
            recipient: "offers+cmp-1@seller.test".to_string(),
            subject: "Re: example.io".to_string(),
            body: body.to_string(),
            provider_message_id: Some(format!("<{message_id}@mail.example.com>")),
            in_reply_to: None,
            received_at: Utc::now(),
            provider_timestamp: true,
            campaign_id: None,
        }
    }

    fn buyer() -> BuyerEmail {
        BuyerEmail::parse("buyer@example.com").expect("valid")
    }

    #[tokio::test]
    async fn low_offer_waits_for_owner_in_a_draft() {
        let h = harness(campaign("cmp-1"), FakeEscrow::default()).await;

        let report = h
            .orchestrator
            .handle(email("m1", "Would you take $1,800?"), "req-1")
            .await
            .expect("pipeline");

        assert_eq!(report.outcome, ReplyState::Drafted);
        let decision = report.decision.expect("decision");
        assert!(decision.requires_owner_approval);
        assert!(!decision.escrow_allowed);
        assert_eq!(report.reply_source, Some(ReplySource::Fallback));

        let drafts = h.store.drafts().await;
        assert_eq!(drafts.len(), 1);
        assert!(drafts[0].body.contains("check with the owner"));
        assert!(!drafts[0].body.contains("1,500"));
        assert_eq!(Some(drafts[0].id.clone()), report.draft_id);

        assert!(h.transport.sent().is_empty());
        assert!(h.escrow.requests().is_empty());
        let notifications = h.notifier.notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, NotificationKind::NeedsReview);
        assert_eq!(notifications[0].draft_id.as_deref(), Some(drafts[0].id.0.as_str()));
        assert_eq!(report.notified, Some(NotificationKind::NeedsReview));
    }

    #[tokio::test]
    async fn ready_buyer_gets_payment_link_at_asking_price() {
        let h = harness(auto_responding("cmp-1"), FakeEscrow::default()).await;

        let report = h
            .orchestrator
            .handle(email("m1", "I'll take it, how do I pay?"), "req-2")
            .await
            .expect("pipeline");

        assert_eq!(report.outcome, ReplyState::AutoSent);
        let requests = h.escrow.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].amount, Decimal::from(2_500));
        assert_eq!(requests[0].buyer_email, buyer());

        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "buyer@example.com");
        assert_eq!(sent[0].in_reply_to.as_deref(), Some("<m1@mail.example.com>"));
        assert!(sent[0].text.contains("2,500 USD"));
        assert!(sent[0].text.contains("https://escrow.test/offers/1"));
        assert!(report.delivery_id.is_some());

        let conversation = h
            .store
            .conversation_for(&CampaignId("cmp-1".into()), &buyer())
            .await
            .expect("conversation");
        assert_eq!(conversation.messages.len(), 2);
        assert_eq!(conversation.messages[1].direction, MessageDirection::Outbound);
        assert_eq!(conversation.messages[1].origin, MessageOrigin::Automated);
        assert_eq!(Some(conversation.messages[1].id.clone()), report.outbound_message_id);
        assert!(conversation.messages[0].intent.is_some());

        assert_eq!(report.notified, Some(NotificationKind::AutoResponseSent));
    }

    #[tokio::test]
    async fn escrow_failure_degrades_to_confirm_price_note() {
        let h = harness(auto_responding("cmp-1"), FakeEscrow::failing()).await;

        let report = h
            .orchestrator
            .handle(email("m1", "I'll take it, send the payment link"), "req-3")
            .await
            .expect("pipeline");

        assert_eq!(report.outcome, ReplyState::AutoSent);
        assert!(report.payment_offer.is_none());
        assert!(report.warnings.iter().any(|warning| warning.contains("payment offer")));
        let sent = h.transport.sent();
        assert!(sent[0].text.contains("confirm the final price"));
        assert!(!sent[0].text.contains("https://"));
    }

    #[tokio::test]
    async fn opted_out_buyer_gets_no_reply() {
        let h = harness(auto_responding("cmp-1"), FakeEscrow::default()).await;

        let report = h
            .orchestrator
            .handle(email("m1", "Not interested, please remove me from your list."), "req-4")
            .await
            .expect("pipeline");

        assert_eq!(report.outcome, ReplyState::BuyerOptedOut);
        assert!(report.decision.is_none());
        assert!(h.store.drafts().await.is_empty());
        assert!(h.transport.sent().is_empty());
        assert!(h.escrow.requests().is_empty());
        let notifications = h.notifier.notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, NotificationKind::BuyerOptedOut);
    }

    #[tokio::test]
    async fn redelivery_is_processed_once() {
        let h = harness(campaign("cmp-1"), FakeEscrow::default()).await;
        let inbound = email("m1", "Would you take $1,800?");

        let first = h.orchestrator.handle(inbound.clone(), "req-5").await.expect("first");
        let second = h.orchestrator.handle(inbound, "req-6").await.expect("second");

        assert_eq!(first.outcome, ReplyState::Drafted);
        assert_eq!(second.outcome, ReplyState::Duplicate);
        assert!(second.draft_id.is_none());
        assert_eq!(h.store.drafts().await.len(), 1);
        assert_eq!(h.notifier.notifications().len(), 1);
        let conversation = h
            .store
            .conversation_for(&CampaignId("cmp-1".into()), &buyer())
            .await
            .expect("conversation");
        assert_eq!(conversation.messages.len(), 1);
    }

    #[tokio::test]
    async fn missing_notification_address_skips_notifier() {
        let campaign = CampaignContext { notification_email: None, ..campaign("cmp-1") };
        let h = harness(campaign, FakeEscrow::default()).await;

        let report = h
            .orchestrator
            .handle(email("m1", "Would you take $1,800?"), "req-7")
            .await
            .expect("pipeline");

        assert_eq!(report.outcome, ReplyState::Drafted);
        assert!(report.notified.is_none());
        assert!(h.notifier.notifications().is_empty());
    }

    #[tokio::test]
    async fn unknown_recipient_matches_no_campaign() {
        let h = harness(campaign("cmp-1"), FakeEscrow::default()).await;
        let mut inbound = email("m1", "Would you take $1,800?");
        inbound.recipient = "someone-else@seller.test".to_string();

        let report = h.orchestrator.handle(inbound, "req-8").await.expect("pipeline");

        assert_eq!(report.outcome, ReplyState::NoCampaignMatch);
        assert!(h.store.conversation_for(&CampaignId("cmp-1".into()), &buyer()).await.is_none());
    }

    #[tokio::test]
    async fn explicit_campaign_and_display_name_recipients_resolve() {
        let h = harness(campaign("cmp-1"), FakeEscrow::default()).await;

        let mut routed = email("m1", "Tell me more");
        routed.recipient = "unrelated@seller.test".to_string();
        routed.campaign_id = Some(CampaignId("cmp-1".into()));
        let report = h.orchestrator.handle(routed, "req-9").await.expect("pipeline");
        assert_eq!(report.campaign_id, Some(CampaignId("cmp-1".into())));

        let mut listed = email("m2", "Tell me more");
        listed.recipient = "cc@other.test, Offers <OFFERS+cmp-1@seller.test>".to_string();
        let report = h.orchestrator.handle(listed, "req-10").await.expect("pipeline");
        assert_eq!(report.campaign_id, Some(CampaignId("cmp-1".into())));
    }

    #[tokio::test]
    async fn inbound_freezes_pending_follow_ups() {
        let h = harness(campaign("cmp-1"), FakeEscrow::default()).await;
        ScheduledSendRepository::save(
            &h.store,
            ScheduledSend {
                id: ScheduledSendId("SS-1".into()),
                campaign_id: CampaignId("cmp-1".into()),
                buyer_email: buyer(),
                step: 2,
                scheduled_for: Utc::now() + chrono::Duration::days(2),
                status: ScheduledSendStatus::Pending,
                updated_at: Utc::now(),
            },
        )
        .await
        .expect("scheduled send");

        let report = h
            .orchestrator
            .handle(email("m1", "Tell me more"), "req-11")
            .await
            .expect("pipeline");

        assert_eq!(report.paused, vec![ScheduledSendId("SS-1".into())]);
        assert_eq!(
            h.store.scheduled_send(&ScheduledSendId("SS-1".into())).await.map(|send| send.status),
            Some(ScheduledSendStatus::Paused)
        );
    }

    #[tokio::test]
    async fn freeze_failure_is_a_warning_not_an_error() {
        let h = harness(campaign("cmp-1"), FakeEscrow::default()).await;
        h.store.fail_freeze(true).await;

        let report = h
            .orchestrator
            .handle(email("m1", "Tell me more"), "req-12")
            .await
            .expect("pipeline");

        assert_eq!(report.outcome, ReplyState::Drafted);
        assert!(report.warnings.iter().any(|warning| warning.contains("not paused")));
    }

    #[tokio::test]
    async fn admission_failure_fails_the_call() {
        let h = harness(campaign("cmp-1"), FakeEscrow::default()).await;
        h.store.fail_admissions(true).await;

        let error = h
            .orchestrator
            .handle(email("m1", "Tell me more"), "req-13")
            .await
            .expect_err("store down");

        assert!(matches!(error, PipelineError::Persistence(_)));
        assert!(h.notifier.notifications().is_empty());
    }

    #[tokio::test]
    async fn owner_hears_about_an_undelivered_auto_reply() {
        let h = harness_with(
            auto_responding("cmp-1"),
            FakeEscrow::default(),
            RecordingTransport::failing(),
        )
        .await;

        let report = h
            .orchestrator
            .handle(email("m1", "Tell me more"), "req-16")
            .await
            .expect("pipeline");

        assert_eq!(report.outcome, ReplyState::AutoSent);
        assert!(report.delivery_id.is_none());
        assert!(report.outbound_message_id.is_some());
        assert_eq!(h.transport.attempts(), 1);
        assert!(report.warnings.iter().any(|warning| warning.contains("not delivered")));

        let notifications = h.notifier.notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, NotificationKind::AutoResponseSent);
        assert!(notifications[0]
            .delivery_issue
            .as_deref()
            .is_some_and(|issue| issue.contains("did not accept")));
        assert_eq!(report.notified, Some(NotificationKind::AutoResponseSent));
        assert!(h.audit.event_types().iter().any(|event_type| event_type == "delivery.send_failed"));
    }

    #[tokio::test]
    async fn owner_hears_about_a_draft_that_was_not_stored() {
        let h = harness(campaign("cmp-1"), FakeEscrow::default()).await;
        h.store.fail_draft_inserts(true).await;

        let report = h
            .orchestrator
            .handle(email("m1", "Would you take $1,800?"), "req-17")
            .await
            .expect("pipeline");

        assert_eq!(report.outcome, ReplyState::Drafted);
        assert!(report.draft_id.is_none());
        assert!(h.store.drafts().await.is_empty());

        let notifications = h.notifier.notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, NotificationKind::NeedsReview);
        assert!(notifications[0].draft_id.is_none());
        assert!(notifications[0].delivery_issue.is_some());
        assert_eq!(report.notified, Some(NotificationKind::NeedsReview));
    }

    #[tokio::test]
    async fn delivered_replies_carry_no_delivery_issue() {
        let h = harness(auto_responding("cmp-1"), FakeEscrow::default()).await;

        h.orchestrator.handle(email("m1", "Tell me more"), "req-18").await.expect("pipeline");

        let notifications = h.notifier.notifications();
        assert_eq!(notifications.len(), 1);
        assert!(notifications[0].delivery_issue.is_none());
    }

    #[tokio::test]
    async fn invalid_sender_is_rejected() {
        let h = harness(campaign("cmp-1"), FakeEscrow::default()).await;
        let mut inbound = email("m1", "Tell me more");
        inbound.sender = "not-an-address".to_string();

        let error = h.orchestrator.handle(inbound, "req-14").await.expect_err("bad sender");
        assert!(matches!(error, PipelineError::Domain(_)));
    }

    #[tokio::test]
    async fn outcome_and_audit_trail_are_recorded() {
        let h = harness(campaign("cmp-1"), FakeEscrow::default()).await;
        let inbound = email("m1", "Would you take $1,800?");
        let dedup_key = inbound.dedup_key();

        h.orchestrator.handle(inbound, "req-15").await.expect("pipeline");

        assert_eq!(h.store.receipt_outcome(&dedup_key).await.as_deref(), Some("drafted"));
        let events = h.audit.events();
        assert!(events.iter().all(|event| event.correlation_id == "req-15"));
        let types = h.audit.event_types();
        for expected in [
            "flow.transition_applied",
            "classification.completed",
            "negotiation.decided",
            "composition.completed",
            "review.draft_created",
            "notify.sent",
        ] {
            assert!(types.iter().any(|event_type| event_type == expected), "{expected}");
        }
    }
}
