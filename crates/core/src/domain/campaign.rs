use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CampaignId(pub String);

impl std::fmt::Display for CampaignId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Seller-set pricing authority for one campaign. Either bound may be absent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignPricing {
    pub asking_price: Option<Decimal>,
    pub minimum_price: Option<Decimal>,
}

impl CampaignPricing {
    pub fn new(asking_price: Option<Decimal>, minimum_price: Option<Decimal>) -> Self {
        Self { asking_price, minimum_price }
    }

    pub fn unpriced() -> Self {
        Self::default()
    }

    pub fn is_priced(&self) -> bool {
        self.asking_price.is_some() || self.minimum_price.is_some()
    }
}

/// Everything the negotiation policy and the reply composer are allowed to know
/// about a campaign. Passed explicitly into every call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignContext {
    pub campaign_id: CampaignId,
    pub domain_name: String,
    pub seller_name: String,
    pub seller_email: String,
    /// Address buyers reply to; inbound mail is matched to a campaign with it.
    pub sender_address: String,
    pub pricing: CampaignPricing,
    pub currency: String,
    pub auto_respond: bool,
    pub notification_email: Option<String>,
    /// Verbatim text that must appear in every outbound reply.
    pub required_token: Option<String>,
    pub signature: String,
}

impl CampaignContext {
    pub fn notification_address(&self) -> Option<&str> {
        self.notification_email.as_deref().map(str::trim).filter(|value| !value.is_empty())
    }

    pub fn required_token(&self) -> Option<&str> {
        self.required_token.as_deref().map(str::trim).filter(|value| !value.is_empty())
    }

    pub fn signature_block(&self) -> String {
        if self.signature.trim().is_empty() {
            format!("Best regards,\n{}", self.seller_name)
        } else {
            self.signature.trim_end().to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{CampaignContext, CampaignId, CampaignPricing};

    fn context() -> CampaignContext {
        CampaignContext {
            campaign_id: CampaignId("cmp-1".to_string()),
            domain_name: "example.io".to_string(),
            seller_name: "Dana".to_string(),
            seller_email: "dana@seller.test".to_string(),
            sender_address: "offers@seller.test".to_string(),
            pricing: CampaignPricing::new(Some(Decimal::new(2_500, 0)), None),
            currency: "USD".to_string(),
            auto_respond: false,
            notification_email: Some("   ".to_string()),
            required_token: None,
            signature: String::new(),
        }
    }

    #[test]
    fn blank_notification_address_counts_as_unset() {
        assert_eq!(context().notification_address(), None);
    }

    #[test]
    fn signature_block_falls_back_to_seller_name() {
        assert_eq!(context().signature_block(), "Best regards,\nDana");
    }

    #[test]
    fn pricing_reports_whether_any_bound_is_configured() {
        assert!(context().pricing.is_priced());
        assert!(!CampaignPricing::unpriced().is_priced());
    }
}
