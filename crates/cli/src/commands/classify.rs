use rust_decimal::Decimal;
use serde_json::json;

use parley_core::classifier::classify;
use parley_core::domain::campaign::CampaignPricing;
use parley_core::negotiation::decide;

use crate::commands::CommandResult;

/// Runs the classifier and negotiation policy without touching the database
/// or any collaborator.
pub fn run(text: &str, asking: Option<Decimal>, minimum: Option<Decimal>) -> CommandResult {
    if text.trim().is_empty() {
        return CommandResult::failure("classify", "invalid_input", "message text is empty", 2);
    }
    if let (Some(asking), Some(minimum)) = (asking, minimum) {
        if minimum > asking {
            return CommandResult::failure(
                "classify",
                "invalid_input",
                format!("minimum price {minimum} is above asking price {asking}"),
                2,
            );
        }
    }

    let intent = classify(text);
    let decision = decide(&intent, &CampaignPricing::new(asking, minimum));
    let message = format!(
        "sentiment={} stance={} owner_approval={} escrow={}",
        intent.sentiment.as_str(),
        decision.stance.as_str(),
        decision.requires_owner_approval,
        decision.escrow_allowed
    );

    CommandResult::success_with(
        "classify",
        message,
        Some(json!({ "intent": intent, "decision": decision })),
    )
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::Value;

    use super::run;

    fn payload(output: &str) -> Value {
        serde_json::from_str(output).expect("json output")
    }

    #[test]
    fn low_offer_needs_owner_approval() {
        let result = run("Would you take $1,800?", Some(Decimal::from(2_500)), Some(Decimal::from(1_500)));
        assert_eq!(result.exit_code, 0);

        let payload = payload(&result.output);
        assert_eq!(payload["data"]["decision"]["requires_owner_approval"], true);
        assert_eq!(payload["data"]["decision"]["escrow_allowed"], false);
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let result = run("Deal", Some(Decimal::from(1_000)), Some(Decimal::from(2_000)));
        assert_eq!(result.exit_code, 2);
        assert_eq!(payload(&result.output)["error_class"], "invalid_input");
    }
}
