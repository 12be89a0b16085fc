use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    VeryPositive,
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VeryPositive => "very_positive",
            Self::Positive => "positive",
            Self::Neutral => "neutral",
            Self::Negative => "negative",
        }
    }
}

/// Independent content signals detected in one inbound message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentFlags {
    pub interested: bool,
    pub price_objection: bool,
    pub negotiating: bool,
    pub ready: bool,
    pub not_interested: bool,
    pub has_questions: bool,
    pub wants_payment_link: bool,
    pub has_price_offer: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub sentiment: Sentiment,
    pub flags: IntentFlags,
    /// Largest plausible amount found in the message, if any.
    pub offered_price: Option<Decimal>,
}

impl Intent {
    pub fn from_flags(flags: IntentFlags, offered_price: Option<Decimal>) -> Self {
        let flags = IntentFlags { has_price_offer: offered_price.is_some(), ..flags };
        Self { sentiment: sentiment_for(&flags), flags, offered_price }
    }

    pub fn is_opt_out(&self) -> bool {
        self.flags.not_interested
    }

    pub fn wants_to_buy(&self) -> bool {
        self.flags.ready || self.flags.wants_payment_link
    }

    pub fn talks_price(&self) -> bool {
        self.flags.has_price_offer
            || self.flags.negotiating
            || self.flags.price_objection
            || self.wants_to_buy()
    }
}

fn sentiment_for(flags: &IntentFlags) -> Sentiment {
    if flags.ready || flags.wants_payment_link {
        Sentiment::VeryPositive
    } else if flags.interested || flags.negotiating {
        Sentiment::Positive
    } else if flags.price_objection {
        Sentiment::Neutral
    } else if flags.not_interested {
        Sentiment::Negative
    } else {
        Sentiment::Neutral
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{Intent, IntentFlags, Sentiment};

    #[test]
    fn sentiment_follows_priority_order() {
        let cases = [
            (IntentFlags { ready: true, price_objection: true, ..Default::default() }, Sentiment::VeryPositive),
            (IntentFlags { wants_payment_link: true, ..Default::default() }, Sentiment::VeryPositive),
            (IntentFlags { negotiating: true, not_interested: true, ..Default::default() }, Sentiment::Positive),
            (IntentFlags { price_objection: true, not_interested: true, ..Default::default() }, Sentiment::Neutral),
            (IntentFlags { not_interested: true, ..Default::default() }, Sentiment::Negative),
            (IntentFlags::default(), Sentiment::Neutral),
        ];

        for (flags, expected) in cases {
            assert_eq!(Intent::from_flags(flags, None).sentiment, expected, "{flags:?}");
        }
    }

    #[test]
    fn price_offer_flag_tracks_offered_price() {
        let intent = Intent::from_flags(IntentFlags::default(), Some(Decimal::new(1_800, 0)));
        assert!(intent.flags.has_price_offer);
        assert!(intent.talks_price());

        let flags = IntentFlags { has_price_offer: true, ..Default::default() };
        assert!(!Intent::from_flags(flags, None).flags.has_price_offer);
    }
}
