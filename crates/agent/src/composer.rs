use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tera::Context;
use tracing::warn;

use parley_core::domain::campaign::CampaignContext;
use parley_core::domain::conversation::{Message, MessageDirection};
use parley_core::domain::inbound::strip_quoted_reply;
use parley_core::domain::intent::Intent;
use parley_core::negotiation::{NegotiationDecision, NegotiationStance};

use crate::collaborators::PaymentOffer;
use crate::errors::PipelineError;
use crate::guardrails::{insert_before_signature, GuardedText, GuardrailPolicy, ReplyCheck};
use crate::llm::{GenerationRequest, TextGenerator};
use crate::templates::{ReplyTemplates, CONFIRM_PRICE_NOTE, FALLBACK_REPLY, PAYMENT_SECTION};

const HISTORY_WINDOW: usize = 6;
const MAX_REPLY_TOKENS: u32 = 400;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplySource {
    Generated,
    Fallback,
}

impl ReplySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generated => "generated",
            Self::Fallback => "fallback",
        }
    }
}

pub struct ComposeRequest<'a> {
    pub campaign: &'a CampaignContext,
    pub decision: &'a NegotiationDecision,
    pub intent: &'a Intent,
    pub inbound: &'a Message,
    /// Earlier messages of the conversation, oldest first.
    pub history: &'a [Message],
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposedReply {
    pub subject: String,
    pub body: String,
    pub source: ReplySource,
    /// Guardrail reason codes hit while composing, repairs included.
    pub guardrail_findings: Vec<String>,
}

/// Writes the reply body: generated text when it passes the guardrails,
/// the fallback template otherwise.
pub struct ReplyComposer {
    generator: Arc<dyn TextGenerator>,
    templates: Arc<ReplyTemplates>,
    guardrails: GuardrailPolicy,
    generation_timeout: Duration,
}

impl ReplyComposer {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        templates: Arc<ReplyTemplates>,
        guardrails: GuardrailPolicy,
        generation_timeout: Duration,
    ) -> Self {
        Self { generator, templates, guardrails, generation_timeout }
    }

    pub async fn compose(&self, request: &ComposeRequest<'_>) -> Result<ComposedReply, PipelineError> {
        let subject = reply_subject(&request.inbound.subject, &request.campaign.domain_name);
        let check = ReplyCheck {
            decision: request.decision,
            campaign: request.campaign,
            offered_price: request.intent.offered_price,
        };
        let mut findings = Vec::new();

        let generation = self.generator.generate(generation_request(request));
        match tokio::time::timeout(self.generation_timeout, generation).await {
            Ok(Ok(text)) => match self.guardrails.review(&text, &check) {
                GuardedText::Accepted { text, repairs } => {
                    findings.extend(repairs.into_iter().map(str::to_string));
                    return Ok(ComposedReply {
                        subject,
                        body: text,
                        source: ReplySource::Generated,
                        guardrail_findings: findings,
                    });
                }
                GuardedText::Denied { reason_code, detail } => {
                    warn!(
                        event_name = "compose.generation_rejected",
                        campaign_id = %request.campaign.campaign_id,
                        reason_code,
                        detail = %detail,
                        "generated reply rejected; using fallback"
                    );
                    findings.push(reason_code.to_string());
                }
            },
            Ok(Err(error)) => {
                warn!(
                    event_name = "compose.generation_failed",
                    campaign_id = %request.campaign.campaign_id,
                    error = %error,
                    "text generation failed; using fallback"
                );
                findings.push("generation_failed".to_string());
            }
            Err(_) => {
                warn!(
                    event_name = "compose.generation_timeout",
                    campaign_id = %request.campaign.campaign_id,
                    timeout_ms = self.generation_timeout.as_millis() as u64,
                    "text generation timed out; using fallback"
                );
                findings.push("generation_timeout".to_string());
            }
        }

        let fallback = self.render_fallback(request)?;
        let (body, repairs) = self.guardrails.repair(&fallback, &check);
        findings.extend(repairs.into_iter().map(str::to_string));

        Ok(ComposedReply { subject, body, source: ReplySource::Fallback, guardrail_findings: findings })
    }

    /// Adds the escrow link above the signature.
    pub fn append_payment_section(
        &self,
        reply: &mut ComposedReply,
        campaign: &CampaignContext,
        offer: &PaymentOffer,
        validity_hours: u32,
    ) -> Result<(), PipelineError> {
        let mut context = Context::new();
        context.insert("domain_name", &campaign.domain_name);
        context.insert("amount", &format_amount(offer.amount));
        context.insert("currency", &offer.currency);
        context.insert("url", &offer.url);
        context.insert("validity_hours", &validity_hours);

        let section = self.templates.render(PAYMENT_SECTION, &context)?;
        reply.body = insert_before_signature(&reply.body, &campaign.signature_block(), &section);
        Ok(())
    }

    /// Used when escrow was allowed but no link could be produced.
    pub fn append_confirm_price_note(
        &self,
        reply: &mut ComposedReply,
        campaign: &CampaignContext,
    ) -> Result<(), PipelineError> {
        let mut context = Context::new();
        context.insert("domain_name", &campaign.domain_name);

        let note = self.templates.render(CONFIRM_PRICE_NOTE, &context)?;
        reply.body = insert_before_signature(&reply.body, &campaign.signature_block(), &note);
        Ok(())
    }

    fn render_fallback(&self, request: &ComposeRequest<'_>) -> Result<String, PipelineError> {
        let campaign = request.campaign;
        let decision = request.decision;

        let mut context = Context::new();
        context.insert("domain_name", &campaign.domain_name);
        context.insert("stance", decision.stance.as_str());
        context.insert("price", &decision.price_to_quote.map(format_amount));
        context.insert("currency", &campaign.currency);
        context.insert("owner_check", &decision.requires_owner_approval);
        context.insert("signature", &campaign.signature_block());

        Ok(self.templates.render(FALLBACK_REPLY, &context)?)
    }
}

/// `Re: <original subject>`, or `Re: <domain>` when the buyer sent none.
pub fn reply_subject(inbound_subject: &str, domain_name: &str) -> String {
    let trimmed = inbound_subject.trim();
    if trimmed.is_empty() {
        format!("Re: {domain_name}")
    } else if trimmed.get(..3).is_some_and(|prefix| prefix.eq_ignore_ascii_case("re:")) {
        trimmed.to_string()
    } else {
        format!("Re: {trimmed}")
    }
}

/// Whole amounts get thousands separators: `2500` becomes `2,500`.
pub fn format_amount(amount: Decimal) -> String {
    let text = amount.normalize().to_string();
    let (whole, fraction) = match text.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (text.as_str(), None),
    };
    let (sign, digits) = match whole.strip_prefix('-') {
        Some(digits) => ("-", digits),
        None => ("", whole),
    };

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    match fraction {
        Some(fraction) => format!("{sign}{grouped}.{fraction}"),
        None => format!("{sign}{grouped}"),
    }
}

fn generation_request(request: &ComposeRequest<'_>) -> GenerationRequest {
    GenerationRequest {
        system: system_prompt(request.campaign, request.decision),
        prompt: conversation_prompt(request),
        max_tokens: MAX_REPLY_TOKENS,
    }
}

fn system_prompt(campaign: &CampaignContext, decision: &NegotiationDecision) -> String {
    let price = decision
        .price_to_quote
        .map(|price| format!("{} {}", format_amount(price), campaign.currency));

    let stance = match (decision.stance, price) {
        (NegotiationStance::Proceed, Some(price)) => format!(
            "The buyer is ready to buy at {price}. Confirm that price warmly. Payment instructions are added separately."
        ),
        (NegotiationStance::QuoteAsking, Some(price)) => {
            format!("The asking price is {price}. You may state it. Do not offer a discount.")
        }
        (NegotiationStance::HoldForOwner, _) => "The buyer made an offer below the asking price. Thank them, neither accept nor reject it, and say you will check with the owner.".to_string(),
        (NegotiationStance::DeferToOwner, _) => {
            "Do not state any price. Say you will check with the owner and get back to them.".to_string()
        }
        (NegotiationStance::InviteOffer, _) => {
            "Do not state any price. Invite the buyer to name the number they have in mind.".to_string()
        }
        _ => "Do not state any price. Answer the buyer's message helpfully.".to_string(),
    };

    let mut lines = vec![
        format!(
            "You write short, friendly email replies for {}, who is selling the domain {}.",
            campaign.seller_name, campaign.domain_name
        ),
        "Write only the reply body. Do not invent facts, deadlines or other domains.".to_string(),
        stance,
        "Never include links, payment instructions or escrow details.".to_string(),
    ];
    if let Some(token) = campaign.required_token() {
        lines.push(format!("Include this reference verbatim: {token}"));
    }
    lines.push(format!("End with this signature:\n{}", campaign.signature_block()));
    lines.join("\n")
}

fn conversation_prompt(request: &ComposeRequest<'_>) -> String {
    let skip = request.history.len().saturating_sub(HISTORY_WINDOW);
    let mut sections: Vec<String> = request
        .history
        .iter()
        .skip(skip)
        .filter(|message| message.id != request.inbound.id)
        .map(|message| {
            let speaker = match message.direction {
                MessageDirection::Inbound => "Buyer",
                MessageDirection::Outbound => "Seller",
            };
            format!("{speaker}:\n{}", strip_quoted_reply(&message.body))
        })
        .collect();
    sections.push(format!("Latest buyer message:\n{}", strip_quoted_reply(&request.inbound.body)));
    sections.join("\n\n")
}
