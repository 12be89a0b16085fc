use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;

use parley_core::domain::campaign::{CampaignContext, CampaignId, CampaignPricing};
use parley_db::repositories::{CampaignRepository, SqlCampaignRepository};
use parley_db::{connect_with_settings, migrations};

use crate::commands::{load_config, runtime, CommandResult};

#[derive(Debug, Deserialize)]
struct CampaignFile {
    #[serde(default)]
    campaign: Vec<CampaignEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CampaignEntry {
    id: String,
    domain_name: String,
    seller_name: String,
    seller_email: String,
    sender_address: String,
    asking_price: Option<Decimal>,
    minimum_price: Option<Decimal>,
    #[serde(default = "default_currency")]
    currency: String,
    #[serde(default)]
    auto_respond: bool,
    notification_email: Option<String>,
    required_token: Option<String>,
    #[serde(default)]
    signature: String,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl CampaignEntry {
    fn into_context(self) -> Result<CampaignContext> {
        if !self.sender_address.contains('@') {
            bail!("campaign `{}`: sender_address `{}` is not an email address", self.id, self.sender_address);
        }
        if let (Some(asking), Some(minimum)) = (self.asking_price, self.minimum_price) {
            if minimum > asking {
                bail!("campaign `{}`: minimum_price {minimum} is above asking_price {asking}", self.id);
            }
        }

        Ok(CampaignContext {
            campaign_id: CampaignId(self.id),
            domain_name: self.domain_name,
            seller_name: self.seller_name,
            seller_email: self.seller_email,
            sender_address: self.sender_address.trim().to_ascii_lowercase(),
            pricing: CampaignPricing::new(self.asking_price, self.minimum_price),
            currency: self.currency.to_ascii_uppercase(),
            auto_respond: self.auto_respond,
            notification_email: self.notification_email,
            required_token: self.required_token,
            signature: self.signature,
        })
    }
}

/// Parses and validates every campaign before any is written.
pub fn parse_file(path: &Path) -> Result<Vec<CampaignContext>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read campaign file `{}`", path.display()))?;
    let file: CampaignFile = toml::from_str(&raw)
        .with_context(|| format!("failed to parse campaign file `{}`", path.display()))?;
    if file.campaign.is_empty() {
        bail!("campaign file `{}` has no [[campaign]] tables", path.display());
    }
    file.campaign.into_iter().map(CampaignEntry::into_context).collect()
}

pub fn import(path: &Path) -> CommandResult {
    let campaigns = match parse_file(path) {
        Ok(campaigns) => campaigns,
        Err(error) => {
            return CommandResult::failure("campaign_import", "invalid_input", format!("{error:#}"), 2)
        }
    };
    let config = match load_config("campaign_import") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("campaign_import") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let ids: Vec<String> = campaigns.iter().map(|campaign| campaign.campaign_id.0.clone()).collect();
    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let repository = SqlCampaignRepository::new(pool.clone());
        for campaign in campaigns {
            repository
                .save(campaign)
                .await
                .map_err(|error| ("persistence", error.to_string(), 6u8))?;
        }
        pool.close().await;
        Ok::<(), (&'static str, String, u8)>(())
    });

    match result {
        Ok(()) => CommandResult::success_with(
            "campaign_import",
            format!("imported {} campaign(s)", ids.len()),
            Some(json!({ "campaign_ids": ids })),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("campaign_import", error_class, message, exit_code)
        }
    }
}
