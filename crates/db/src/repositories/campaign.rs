use sqlx::{sqlite::SqliteRow, Row};

use parley_core::domain::campaign::{CampaignContext, CampaignId, CampaignPricing};

use super::{parse_optional_decimal, CampaignRepository, RepositoryError};
use crate::DbPool;

const CAMPAIGN_COLUMNS: &str = "id, domain_name, seller_name, seller_email, sender_address,
     asking_price, minimum_price, currency, auto_respond, notification_email,
     required_token, signature";

pub struct SqlCampaignRepository {
    pool: DbPool,
}

impl SqlCampaignRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CampaignRepository for SqlCampaignRepository {
    async fn find_by_id(&self, id: &CampaignId) -> Result<Option<CampaignContext>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {CAMPAIGN_COLUMNS} FROM campaign WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(campaign_from_row).transpose()
    }

    async fn find_by_sender_address(
        &self,
        address: &str,
    ) -> Result<Option<CampaignContext>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaign WHERE sender_address = ?"
        ))
        .bind(normalize_address(address))
        .fetch_optional(&self.pool)
        .await?;

        row.map(campaign_from_row).transpose()
    }

    async fn save(&self, campaign: CampaignContext) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO campaign (
                id, domain_name, seller_name, seller_email, sender_address,
                asking_price, minimum_price, currency, auto_respond, notification_email,
                required_token, signature
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                domain_name = excluded.domain_name,
                seller_name = excluded.seller_name,
                seller_email = excluded.seller_email,
                sender_address = excluded.sender_address,
                asking_price = excluded.asking_price,
                minimum_price = excluded.minimum_price,
                currency = excluded.currency,
                auto_respond = excluded.auto_respond,
                notification_email = excluded.notification_email,
                required_token = excluded.required_token,
                signature = excluded.signature",
        )
        .bind(&campaign.campaign_id.0)
        .bind(&campaign.domain_name)
        .bind(&campaign.seller_name)
        .bind(&campaign.seller_email)
        .bind(normalize_address(&campaign.sender_address))
        .bind(campaign.pricing.asking_price.map(|price| price.to_string()))
        .bind(campaign.pricing.minimum_price.map(|price| price.to_string()))
        .bind(&campaign.currency)
        .bind(i64::from(campaign.auto_respond))
        .bind(&campaign.notification_email)
        .bind(&campaign.required_token)
        .bind(&campaign.signature)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

pub(crate) fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

fn campaign_from_row(row: SqliteRow) -> Result<CampaignContext, RepositoryError> {
    Ok(CampaignContext {
        campaign_id: CampaignId(row.try_get("id")?),
        domain_name: row.try_get("domain_name")?,
        seller_name: row.try_get("seller_name")?,
        seller_email: row.try_get("seller_email")?,
        sender_address: row.try_get("sender_address")?,
        pricing: CampaignPricing::new(
            parse_optional_decimal("asking_price", row.try_get("asking_price")?)?,
            parse_optional_decimal("minimum_price", row.try_get("minimum_price")?)?,
        ),
        currency: row.try_get("currency")?,
        auto_respond: row.try_get::<i64, _>("auto_respond")? != 0,
        notification_email: row.try_get("notification_email")?,
        required_token: row.try_get("required_token")?,
        signature: row.try_get("signature")?,
    })
}
