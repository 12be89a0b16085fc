use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::domain::notification::NotificationKind;
use crate::flows::states::{ReplyAction, ReplyContext, ReplyEvent, ReplyState, TransitionOutcome};

pub trait FlowDefinition {
    fn initial_state(&self) -> ReplyState;
    fn transition(
        &self,
        current: &ReplyState,
        event: &ReplyEvent,
        context: &ReplyContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// Inbound reply pipeline:
/// `Received -> Frozen -> Classified -> Composed -> AutoSent | Drafted`,
/// with `NoCampaignMatch`, `Duplicate` and `BuyerOptedOut` as early exits.
#[derive(Clone, Debug, Default)]
pub struct ReplyFlow;

impl FlowDefinition for ReplyFlow {
    fn initial_state(&self) -> ReplyState {
        ReplyState::Received
    }

    fn transition(
        &self,
        current: &ReplyState,
        event: &ReplyEvent,
        context: &ReplyContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_reply(current, event, context)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> ReplyState {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &ReplyState,
        event: &ReplyEvent,
        context: &ReplyContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &ReplyState,
        event: &ReplyEvent,
        context: &ReplyContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    audit
                        .event("flow.transition_applied", AuditCategory::Flow, AuditOutcome::Success)
                        .with_metadata("from", outcome.from.as_str())
                        .with_metadata("to", outcome.to.as_str())
                        .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    audit
                        .event("flow.transition_rejected", AuditCategory::Flow, AuditOutcome::Rejected)
                        .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<ReplyFlow> {
    fn default() -> Self {
        Self::new(ReplyFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("reply pipeline already finished in {state:?}; cannot apply {event:?}")]
    AlreadyTerminal { state: ReplyState, event: ReplyEvent },
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: ReplyState, event: ReplyEvent },
}

fn transition_reply(
    current: &ReplyState,
    event: &ReplyEvent,
    context: &ReplyContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use ReplyAction::{
        ClassifyIntent, ComposeReply, CreateDraft, EvaluateNegotiation, NotifyOwner,
        PersistOutboundMessage, RequestPaymentOffer, SendEmail,
    };
    use ReplyEvent::{
        CampaignUnresolved, DeliveryResolved, DuplicateDelivery, InboundRecorded,
        IntentClassified, ReplyComposed,
    };
    use ReplyState::{
        AutoSent, BuyerOptedOut, Classified, Composed, Drafted, Duplicate, Frozen,
        NoCampaignMatch, Received,
    };

    if current.is_terminal() {
        return Err(FlowTransitionError::AlreadyTerminal { state: *current, event: *event });
    }

    let notify = |kind: NotificationKind| {
        if context.notification_configured {
            vec![NotifyOwner(kind)]
        } else {
            Vec::new()
        }
    };

    let (to, actions) = match (current, event) {
        (Received, CampaignUnresolved) => (NoCampaignMatch, Vec::new()),
        (Received, DuplicateDelivery) => (Duplicate, Vec::new()),
        (Received, InboundRecorded) => (Frozen, vec![ClassifyIntent]),
        (Frozen, IntentClassified) if context.opted_out => {
            (BuyerOptedOut, notify(NotificationKind::BuyerOptedOut))
        }
        (Frozen, IntentClassified) => (Classified, vec![EvaluateNegotiation, ComposeReply]),
        (Classified, ReplyComposed) if context.escrow_allowed => {
            (Composed, vec![RequestPaymentOffer])
        }
        (Classified, ReplyComposed) => (Composed, Vec::new()),
        (Composed, DeliveryResolved) if context.auto_respond => {
            let mut actions = vec![PersistOutboundMessage, SendEmail];
            actions.extend(notify(NotificationKind::AutoResponseSent));
            (AutoSent, actions)
        }
        (Composed, DeliveryResolved) => {
            let mut actions = vec![CreateDraft];
            actions.extend(notify(NotificationKind::NeedsReview));
            (Drafted, actions)
        }
        _ => {
            return Err(FlowTransitionError::InvalidTransition { state: *current, event: *event });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: *event, actions })
}
