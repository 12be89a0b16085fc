//! Recording collaborator doubles for pipeline and router tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;

use parley_core::domain::campaign::{CampaignContext, CampaignId, CampaignPricing};
use parley_core::domain::notification::OwnerNotification;

use crate::collaborators::{
    CollaboratorError, DeliveryId, EmailTransport, EscrowProvider, Notifier, OfferRequest,
    OutboundEmail, PaymentOffer,
};
use crate::llm::{GenerationRequest, TextGenerator};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Campaign for `example.io`: asking 2,500 USD, floor 1,500, review mode,
/// owner notifications on.
pub fn campaign(id: &str) -> CampaignContext {
    CampaignContext {
        campaign_id: CampaignId(id.to_string()),
        domain_name: "example.io".to_string(),
        seller_name: "Dana".to_string(),
        seller_email: "dana@seller.test".to_string(),
        sender_address: format!("offers+{id}@seller.test"),
        pricing: CampaignPricing::new(Some(Decimal::from(2_500)), Some(Decimal::from(1_500))),
        currency: "USD".to_string(),
        auto_respond: false,
        notification_email: Some("owner@seller.test".to_string()),
        required_token: None,
        signature: "Best regards,\nDana".to_string(),
    }
}

#[derive(Clone, Debug)]
enum Script {
    Reply(String),
    Fail,
    Stall(Duration),
}

/// Returns a fixed reply, fails, or stalls past any timeout.
#[derive(Clone, Debug)]
pub struct ScriptedGenerator {
    script: Script,
    requests: Arc<Mutex<Vec<GenerationRequest>>>,
}

impl ScriptedGenerator {
    pub fn replying(text: impl Into<String>) -> Self {
        Self::with_script(Script::Reply(text.into()))
    }

    pub fn failing() -> Self {
        Self::with_script(Script::Fail)
    }

    pub fn stalling(delay: Duration) -> Self {
        Self::with_script(Script::Stall(delay))
    }

    fn with_script(script: Script) -> Self {
        Self { script, requests: Arc::default() }
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String> {
        lock(&self.requests).push(request);
        match &self.script {
            Script::Reply(text) => Ok(text.clone()),
            Script::Fail => bail!("scripted generation failure"),
            Script::Stall(delay) => {
                tokio::time::sleep(*delay).await;
                bail!("scripted generation stalled")
            }
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<OutboundEmail>>>,
    attempts: Arc<AtomicUsize>,
    fail: bool,
}

impl RecordingTransport {
    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }

    pub fn sent(&self) -> Vec<OutboundEmail> {
        lock(&self.sent).clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmailTransport for RecordingTransport {
    async fn send(&self, email: OutboundEmail) -> Result<DeliveryId, CollaboratorError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail {
            return Err(CollaboratorError::Unavailable("scripted transport failure".to_string()));
        }
        lock(&self.sent).push(email);
        Ok(DeliveryId(format!("delivery-{attempt}")))
    }
}

#[derive(Clone, Debug, Default)]
pub struct RecordingNotifier {
    notifications: Arc<Mutex<Vec<OwnerNotification>>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }

    pub fn notifications(&self) -> Vec<OwnerNotification> {
        lock(&self.notifications).clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: OwnerNotification) -> Result<(), CollaboratorError> {
        if self.fail {
            return Err(CollaboratorError::Unavailable("scripted notifier failure".to_string()));
        }
        lock(&self.notifications).push(notification);
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct FakeEscrow {
    requests: Arc<Mutex<Vec<OfferRequest>>>,
    fail: bool,
}

impl FakeEscrow {
    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }

    pub fn requests(&self) -> Vec<OfferRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl EscrowProvider for FakeEscrow {
    async fn create_offer(&self, request: OfferRequest) -> Result<PaymentOffer, CollaboratorError> {
        let offer_number = {
            let mut requests = lock(&self.requests);
            requests.push(request.clone());
            requests.len()
        };
        if self.fail {
            return Err(CollaboratorError::Rejected("scripted escrow failure".to_string()));
        }
        Ok(PaymentOffer {
            url: format!("https://escrow.test/offers/{offer_number}"),
            amount: request.amount,
            currency: request.currency,
        })
    }
}
