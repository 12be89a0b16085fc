use rust_decimal::Decimal;

use parley_core::classifier::extract_amounts;
use parley_core::domain::campaign::CampaignContext;
use parley_core::negotiation::NegotiationDecision;

pub const OWNER_CHECK_SENTENCE: &str = "I'll check with the owner and get back to you shortly.";

const AGREEMENT_PHRASES: &[&str] = &[
    "it's a deal",
    "we have a deal",
    "you have a deal",
    "you've got a deal",
    "accept your offer",
    "offer accepted",
    "happy to accept",
    "agreed",
    "it's yours",
    "sold to you",
];

const PAYMENT_PHRASES: &[&str] = &[
    "escrow",
    "payment link",
    "checkout",
    "invoice",
    "wire transfer",
    "bank transfer",
    "paypal",
];

/// What the generated text is checked against.
#[derive(Clone, Copy, Debug)]
pub struct ReplyCheck<'a> {
    pub decision: &'a NegotiationDecision,
    pub campaign: &'a CampaignContext,
    /// The buyer's own number may be echoed back.
    pub offered_price: Option<Decimal>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Repair {
    AppendOwnerCheck,
    AppendSignature(String),
    AppendRequiredToken(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Deny { reason_code: &'static str, detail: String },
    Degrade { reason_code: &'static str, repair: Repair },
}

/// Result of running a reply through the guardrails.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardedText {
    Accepted { text: String, repairs: Vec<&'static str> },
    Denied { reason_code: &'static str, detail: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailPolicy {
    pub max_reply_chars: usize,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self { max_reply_chars: 4_000 }
    }
}

impl GuardrailPolicy {
    /// First violated rule, denials before repairs.
    pub fn evaluate(&self, text: &str, check: &ReplyCheck<'_>) -> GuardrailDecision {
        if let Some((reason_code, detail)) = self.denial(text, check) {
            return GuardrailDecision::Deny { reason_code, detail };
        }
        match next_repair(text, check) {
            Some((reason_code, repair)) => GuardrailDecision::Degrade { reason_code, repair },
            None => GuardrailDecision::Allow,
        }
    }

    /// Rejects unsafe text, then applies every repair it needs.
    pub fn review(&self, text: &str, check: &ReplyCheck<'_>) -> GuardedText {
        if let Some((reason_code, detail)) = self.denial(text, check) {
            return GuardedText::Denied { reason_code, detail };
        }
        let (text, repairs) = self.repair(text, check);
        GuardedText::Accepted { text, repairs }
    }

    /// Applies repairs only. Used on template text, which is trusted.
    pub fn repair(&self, text: &str, check: &ReplyCheck<'_>) -> (String, Vec<&'static str>) {
        let mut text = text.trim().to_string();
        let mut repairs = Vec::new();
        while let Some((reason_code, repair)) = next_repair(&text, check) {
            text = apply_repair(&text, check.campaign, &repair);
            repairs.push(reason_code);
        }
        (text, repairs)
    }

    fn denial(&self, text: &str, check: &ReplyCheck<'_>) -> Option<(&'static str, String)> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Some(("empty_generation", "generated reply is empty".to_string()));
        }
        if trimmed.chars().count() > self.max_reply_chars {
            return Some((
                "reply_too_long",
                format!("generated reply exceeds {} characters", self.max_reply_chars),
            ));
        }

        let decision = check.decision;
        let pricing = &check.campaign.pricing;
        let amounts = extract_amounts(trimmed);

        if let Some(minimum) = pricing.minimum_price {
            if pricing.asking_price != Some(minimum) && amounts.contains(&minimum.normalize()) {
                return Some(("minimum_price_disclosed", format!("reply states the floor {minimum}")));
            }
        }

        let allowed: Vec<Decimal> = [decision.price_to_quote, check.offered_price]
            .into_iter()
            .flatten()
            .map(|amount| amount.normalize())
            .collect();
        if let Some(amount) = amounts.iter().find(|amount| !allowed.contains(amount)) {
            return Some(("unapproved_price", format!("reply states unapproved amount {amount}")));
        }

        let lowered = normalize(trimmed);
        if decision.requires_owner_approval
            && contains_any(&lowered, AGREEMENT_PHRASES)
            && !mentions_owner(&lowered)
        {
            return Some((
                "agreement_without_owner",
                "reply agrees to terms that need owner approval".to_string(),
            ));
        }
        if !decision.can_disclose_payment
            && (contains_any(&lowered, PAYMENT_PHRASES) || lowered.contains("://"))
        {
            return Some(("payment_not_authorized", "reply discusses payment or links".to_string()));
        }

        None
    }
}

fn next_repair(text: &str, check: &ReplyCheck<'_>) -> Option<(&'static str, Repair)> {
    if check.decision.requires_owner_approval && !mentions_owner(&normalize(text)) {
        return Some(("owner_check_missing", Repair::AppendOwnerCheck));
    }
    let signature = check.campaign.signature_block();
    if !text.contains(signature.trim()) {
        return Some(("signature_missing", Repair::AppendSignature(signature)));
    }
    if let Some(token) = check.campaign.required_token() {
        if !text.contains(token) {
            return Some(("required_token_missing", Repair::AppendRequiredToken(token.to_string())));
        }
    }
    None
}

fn apply_repair(text: &str, campaign: &CampaignContext, repair: &Repair) -> String {
    match repair {
        Repair::AppendOwnerCheck => {
            insert_before_signature(text, &campaign.signature_block(), OWNER_CHECK_SENTENCE)
        }
        Repair::AppendSignature(signature) => format!("{}\n\n{signature}", text.trim_end()),
        Repair::AppendRequiredToken(token) => {
            insert_before_signature(text, &campaign.signature_block(), token)
        }
    }
}

/// Places `addition` just above the signature block, or at the end when the
/// text has no signature.
pub fn insert_before_signature(text: &str, signature: &str, addition: &str) -> String {
    let signature = signature.trim();
    match text.rfind(signature).filter(|_| !signature.is_empty()) {
        Some(index) => {
            let head = text[..index].trim_end();
            let tail = &text[index..];
            if head.is_empty() {
                format!("{addition}\n\n{tail}")
            } else {
                format!("{head}\n\n{addition}\n\n{tail}")
            }
        }
        None => format!("{}\n\n{addition}", text.trim_end()),
    }
}

fn normalize(text: &str) -> String {
    text.to_lowercase().replace(['\u{2019}', '\u{2018}'], "'")
}

fn mentions_owner(lowered: &str) -> bool {
    contains_any(lowered, &["owner"])
}

fn contains_any(haystack: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|phrase| {
        haystack.match_indices(phrase).any(|(index, _)| {
            let before = haystack[..index].chars().next_back();
            let after = haystack[index + phrase.len()..].chars().next();
            !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
        })
    })
}
