//! Reply pipeline runtime.
//!
//! Drives one inbound buyer email through dedup, freeze, classification,
//! negotiation, composition and delivery, and exposes the draft review
//! workflow for replies that wait on a human.
//!
//! # Safety principle
//!
//! Text generation only writes prose. Prices, payment links and approvals are
//! decided by `parley_core::negotiation` and enforced on the generated text by
//! [`guardrails`] before anything leaves the system.

pub mod collaborators;
pub mod composer;
pub mod drafts;
pub mod errors;
pub mod fakes;
pub mod guardrails;
pub mod llm;
pub mod runtime;
pub mod schedule_guard;
pub mod templates;

pub use collaborators::{
    CollaboratorError, DeliveryId, EmailTransport, EscrowProvider, Notifier, OfferRequest,
    OutboundEmail, PaymentOffer, TransportNotifier,
};
pub use composer::{ComposeRequest, ComposedReply, ReplyComposer, ReplySource};
pub use drafts::DraftReviewService;
pub use errors::PipelineError;
pub use llm::{DisabledGenerator, GenerationRequest, TextGenerator};
pub use runtime::{ReplyDependencies, ReplyOrchestrator, ReplyReport, ReplySettings};
pub use schedule_guard::ScheduleGuard;
pub use templates::ReplyTemplates;
