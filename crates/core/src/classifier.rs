//! Deterministic keyword and price classifier for buyer replies.
//!
//! Flags are detected independently from phrase lists; the offered price is
//! the largest currency-like amount in range. Both are heuristics: a year or a
//! phone fragment can read as a price, and the largest number wins when a
//! buyer mentions several.

use std::str::FromStr;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use rust_decimal::Decimal;

use crate::domain::inbound::strip_quoted_reply;
use crate::domain::intent::{Intent, IntentFlags};

pub const MIN_PLAUSIBLE_PRICE: i64 = 100;
pub const MAX_PLAUSIBLE_PRICE: i64 = 1_000_000;

const NOT_INTERESTED: &[&str] = &[
    "not interested",
    "no longer interested",
    "not really interested",
    "no thanks",
    "no thank you",
    "unsubscribe",
    "remove me",
    "take me off",
    "stop emailing",
    "stop contacting",
    "do not contact",
    "don't contact",
    "don't email",
    "not for me",
    "leave me alone",
    "i'll pass",
    "we'll pass",
];

const INTERESTED: &[&str] = &[
    "interested",
    "tell me more",
    "more info",
    "more information",
    "would like",
    "i'd like",
    "we'd like",
    "keen",
    "curious",
    "sounds good",
    "love to",
];

const PRICE_OBJECTION: &[&str] = &[
    "too expensive",
    "too high",
    "too much",
    "overpriced",
    "over priced",
    "pricey",
    "steep",
    "out of my budget",
    "over my budget",
    "over budget",
    "can't afford",
    "cannot afford",
];

const NEGOTIATING: &[&str] = &[
    "offer",
    "offering",
    "would you take",
    "would you accept",
    "will you take",
    "will you accept",
    "would you consider",
    "best price",
    "lowest price",
    "lower",
    "discount",
    "negotiable",
    "negotiate",
    "counter",
    "flexible",
    "meet in the middle",
    "how about",
    "willing to pay",
    "how much",
    "your price",
    "asking price",
    "what price",
];

const READY: &[&str] = &[
    "i'll take it",
    "i will take it",
    "we'll take it",
    "let's do it",
    "lets do it",
    "let's proceed",
    "happy to proceed",
    "like to proceed",
    "ready to buy",
    "ready to purchase",
    "ready to proceed",
    "it's a deal",
    "we have a deal",
    "you have a deal",
    "i accept",
    "we accept",
    "count me in",
    "where do i sign",
    "i'll buy",
    "i want to buy",
    "want to purchase",
];

const WANTS_PAYMENT_LINK: &[&str] = &[
    "how do i pay",
    "how can i pay",
    "how to pay",
    "how should i pay",
    "payment link",
    "pay link",
    "send the link",
    "send me the link",
    "send a link",
    "invoice",
    "escrow",
    "payment details",
    "payment instructions",
    "checkout",
];

const QUESTIONS: &[&str] = &[
    "question",
    "wondering",
    "can you tell",
    "could you tell",
    "let me know",
    "how much",
    "what is",
    "what's",
];

pub trait IntentClassifier: Send + Sync {
    fn classify(&self, text: &str) -> Intent;
}

#[derive(Clone, Debug, Default)]
pub struct KeywordIntentClassifier;

impl IntentClassifier for KeywordIntentClassifier {
    fn classify(&self, text: &str) -> Intent {
        classify(text)
    }
}

pub fn classify(text: &str) -> Intent {
    let body = strip_quoted_reply(text);
    let normalized = normalize_text(&body);

    let not_interested = contains_any(&normalized, NOT_INTERESTED);
    let without_refusals = remove_phrases(&normalized, NOT_INTERESTED);

    let flags = IntentFlags {
        interested: contains_any(&without_refusals, INTERESTED),
        price_objection: contains_any(&normalized, PRICE_OBJECTION),
        negotiating: contains_any(&normalized, NEGOTIATING),
        ready: contains_any(&normalized, READY),
        not_interested,
        has_questions: normalized.contains('?') || contains_any(&normalized, QUESTIONS),
        wants_payment_link: contains_any(&normalized, WANTS_PAYMENT_LINK),
        has_price_offer: false,
    };

    Intent::from_flags(flags, extract_offered_price(&body))
}

/// Largest amount in [`MIN_PLAUSIBLE_PRICE`, `MAX_PLAUSIBLE_PRICE`] written
/// with a currency marker, a `k` suffix, or as a bare number of 3+ digits.
pub fn extract_offered_price(text: &str) -> Option<Decimal> {
    extract_amounts(text).into_iter().max()
}

/// Every distinct plausible amount in the text, ascending.
pub fn extract_amounts(text: &str) -> Vec<Decimal> {
    let mut candidates = Vec::new();

    for pattern in [prefixed_amount(), suffixed_amount(), bare_amount(), thousands_amount()] {
        for captures in pattern.captures_iter(text) {
            candidates.extend(amount_from(&captures));
        }
    }

    let mut amounts: Vec<Decimal> = candidates
        .into_iter()
        .filter(|amount| {
            *amount >= Decimal::from(MIN_PLAUSIBLE_PRICE)
                && *amount <= Decimal::from(MAX_PLAUSIBLE_PRICE)
        })
        .map(|amount| amount.normalize())
        .collect();
    amounts.sort();
    amounts.dedup();
    amounts
}

fn amount_from(captures: &Captures<'_>) -> Option<Decimal> {
    let whole = captures.name("whole")?.as_str().replace(',', "");
    let literal = match captures.name("fraction") {
        Some(fraction) => format!("{whole}.{}", fraction.as_str()),
        None => whole,
    };
    let amount = Decimal::from_str(&literal).ok()?;

    if captures.name("thousands").is_some() {
        amount.checked_mul(Decimal::from(1_000))
    } else {
        Some(amount)
    }
}

fn prefixed_amount() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)(?:us\$|\$|€|£|\busd|\beur|\bgbp)\s?(?P<whole>\d{1,3}(?:,\d{3})+|\d+)(?:\.(?P<fraction>\d+))?(?:\s?(?P<thousands>k)\b)?",
        )
        .expect("static regex is valid")
    })
}

fn suffixed_amount() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?P<whole>\d{1,3}(?:,\d{3})+|\d+)(?:\.(?P<fraction>\d+))?\s?(?P<thousands>k)?\s?(?:dollars|usd|bucks|euros|eur)\b",
        )
        .expect("static regex is valid")
    })
}

fn bare_amount() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b(?P<whole>\d{1,3}(?:,\d{3})+|\d{3,})\b").expect("static regex is valid")
    })
}

fn thousands_amount() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(?P<whole>\d+)(?:\.(?P<fraction>\d+))?\s?(?P<thousands>k)\b")
            .expect("static regex is valid")
    })
}

fn normalize_text(text: &str) -> String {
    let lowered = text.to_lowercase().replace(['\u{2019}', '\u{2018}'], "'");
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn contains_any(haystack: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|phrase| find_phrase(haystack, phrase).is_some())
}

fn find_phrase(haystack: &str, phrase: &str) -> Option<usize> {
    haystack.match_indices(phrase).map(|(index, _)| index).find(|index| {
        let before = haystack[..*index].chars().next_back();
        let after = haystack[index + phrase.len()..].chars().next();
        !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char)
    })
}

fn is_word_char(character: char) -> bool {
    character.is_alphanumeric() || character == '\''
}

fn remove_phrases(haystack: &str, phrases: &[&str]) -> String {
    let mut remaining = haystack.to_string();
    for phrase in phrases {
        while let Some(index) = find_phrase(&remaining, phrase) {
            remaining.replace_range(index..index + phrase.len(), " ");
        }
    }
    remaining
}
