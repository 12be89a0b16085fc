use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::campaign::CampaignPricing;
use crate::domain::intent::Intent;

/// Framing the composer must use for the reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationStance {
    /// Offer meets the price, or the buyer accepts it: move to payment.
    Proceed,
    /// Offer below the price: acknowledge and check with the owner.
    HoldForOwner,
    /// No price authority: any price talk goes to the owner.
    DeferToOwner,
    /// Restate the asking price.
    QuoteAsking,
    /// Only a floor is known: ask the buyer to name a number.
    InviteOffer,
    /// No price framing needed.
    Converse,
}

impl NegotiationStance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proceed => "proceed",
            Self::HoldForOwner => "hold_for_owner",
            Self::DeferToOwner => "defer_to_owner",
            Self::QuoteAsking => "quote_asking",
            Self::InviteOffer => "invite_offer",
            Self::Converse => "converse",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationDecision {
    pub can_disclose_payment: bool,
    pub requires_owner_approval: bool,
    pub price_to_quote: Option<Decimal>,
    pub escrow_allowed: bool,
    pub stance: NegotiationStance,
    pub reasons: Vec<String>,
}

impl NegotiationDecision {
    fn new(stance: NegotiationStance) -> Self {
        Self {
            can_disclose_payment: false,
            requires_owner_approval: false,
            price_to_quote: None,
            escrow_allowed: false,
            stance,
            reasons: Vec::new(),
        }
    }

    fn quoting(mut self, price: Option<Decimal>) -> Self {
        self.price_to_quote = price;
        self
    }

    fn with_escrow(mut self) -> Self {
        self.escrow_allowed = true;
        self.can_disclose_payment = true;
        self
    }

    fn with_owner_approval(mut self) -> Self {
        self.requires_owner_approval = true;
        self.escrow_allowed = false;
        self.can_disclose_payment = false;
        self
    }

    fn because(mut self, reason: impl Into<String>) -> Self {
        self.reasons.push(reason.into());
        self
    }
}

pub trait NegotiationPolicy: Send + Sync {
    fn decide(&self, intent: &Intent, pricing: &CampaignPricing) -> NegotiationDecision;
}

#[derive(Clone, Debug, Default)]
pub struct DeterministicNegotiationPolicy;

impl NegotiationPolicy for DeterministicNegotiationPolicy {
    fn decide(&self, intent: &Intent, pricing: &CampaignPricing) -> NegotiationDecision {
        decide(intent, pricing)
    }
}

/// Pure pricing-authority decision. The minimum price is a floor the reply
/// never discloses; only an offer at or above the reference price unlocks
/// escrow.
pub fn decide(intent: &Intent, pricing: &CampaignPricing) -> NegotiationDecision {
    use NegotiationStance::{
        Converse, DeferToOwner, HoldForOwner, InviteOffer, Proceed, QuoteAsking,
    };

    let Some(reference) = pricing.asking_price.or(pricing.minimum_price) else {
        return if intent.talks_price() {
            NegotiationDecision::new(DeferToOwner)
                .with_owner_approval()
                .because("no price configured; price discussion deferred to owner")
        } else {
            NegotiationDecision::new(Converse).because("no price configured")
        };
    };
    let asking = pricing.asking_price;

    if let Some(offer) = intent.offered_price {
        return if offer >= reference {
            NegotiationDecision::new(Proceed)
                .quoting(asking.or(Some(offer)))
                .with_escrow()
                .because(format!("offer {offer} meets configured price {reference}"))
        } else {
            NegotiationDecision::new(HoldForOwner)
                .quoting(asking)
                .with_owner_approval()
                .because(format!("offer {offer} below configured price {reference}"))
        };
    }

    if intent.wants_to_buy() {
        return match asking {
            Some(asking) => NegotiationDecision::new(Proceed)
                .quoting(Some(asking))
                .with_escrow()
                .because("buyer ready without counter-offer; proceeding at asking price"),
            None => NegotiationDecision::new(DeferToOwner)
                .with_owner_approval()
                .because("buyer ready but only a floor is configured"),
        };
    }

    if intent.flags.price_objection || intent.flags.negotiating {
        return match asking {
            Some(asking) => NegotiationDecision::new(QuoteAsking)
                .quoting(Some(asking))
                .because("price discussion without an offer; restating asking price"),
            None => NegotiationDecision::new(InviteOffer)
                .because("price discussion without an offer; inviting a number"),
        };
    }

    match asking {
        Some(asking) if intent.flags.interested || intent.flags.has_questions => {
            NegotiationDecision::new(QuoteAsking)
                .quoting(Some(asking))
                .because("interested buyer; sharing asking price")
        }
        _ => NegotiationDecision::new(Converse).because("no pricing signal"),
    }
}
