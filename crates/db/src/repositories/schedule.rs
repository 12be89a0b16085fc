use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use parley_core::domain::campaign::CampaignId;
use parley_core::domain::conversation::BuyerEmail;
use parley_core::domain::schedule::{ScheduledSend, ScheduledSendId, ScheduledSendStatus};

use super::{
    encode_timestamp, parse_buyer_email, parse_timestamp, parse_u32, RepositoryError,
    ScheduledSendRepository,
};
use crate::DbPool;

pub struct SqlScheduledSendRepository {
    pool: DbPool,
}

impl SqlScheduledSendRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ScheduledSendRepository for SqlScheduledSendRepository {
    async fn find_by_id(
        &self,
        id: &ScheduledSendId,
    ) -> Result<Option<ScheduledSend>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, campaign_id, buyer_email, step, scheduled_for, status, updated_at
             FROM scheduled_send
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(scheduled_send_from_row).transpose()
    }

    async fn list_for_buyer(
        &self,
        campaign_id: &CampaignId,
        buyer_email: &BuyerEmail,
        status: Option<ScheduledSendStatus>,
    ) -> Result<Vec<ScheduledSend>, RepositoryError> {
        let rows = if let Some(status) = status {
            sqlx::query(
                "SELECT id, campaign_id, buyer_email, step, scheduled_for, status, updated_at
                 FROM scheduled_send
                 WHERE campaign_id = ? AND buyer_email = ? AND status = ?
                 ORDER BY scheduled_for ASC, id ASC",
            )
            .bind(&campaign_id.0)
            .bind(buyer_email.as_str())
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                "SELECT id, campaign_id, buyer_email, step, scheduled_for, status, updated_at
                 FROM scheduled_send
                 WHERE campaign_id = ? AND buyer_email = ?
                 ORDER BY scheduled_for ASC, id ASC",
            )
            .bind(&campaign_id.0)
            .bind(buyer_email.as_str())
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter().map(scheduled_send_from_row).collect()
    }

    async fn save(&self, send: ScheduledSend) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO scheduled_send (
                id, campaign_id, buyer_email, step, scheduled_for, status, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                campaign_id = excluded.campaign_id,
                buyer_email = excluded.buyer_email,
                step = excluded.step,
                scheduled_for = excluded.scheduled_for,
                status = excluded.status,
                updated_at = excluded.updated_at",
        )
        .bind(&send.id.0)
        .bind(&send.campaign_id.0)
        .bind(send.buyer_email.as_str())
        .bind(i64::from(send.step))
        .bind(encode_timestamp(&send.scheduled_for))
        .bind(send.status.as_str())
        .bind(encode_timestamp(&send.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn transition(
        &self,
        id: &ScheduledSendId,
        expected: ScheduledSendStatus,
        next: ScheduledSendStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE scheduled_send SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(next.as_str())
        .bind(encode_timestamp(&at))
        .bind(&id.0)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn pause_pending(
        &self,
        campaign_id: &CampaignId,
        buyer_email: &BuyerEmail,
        at: DateTime<Utc>,
    ) -> Result<Vec<ScheduledSendId>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let paused = pause_pending_in(&mut tx, campaign_id, buyer_email, at).await?;
        tx.commit().await?;
        Ok(paused)
    }
}

/// Pause step shared by `pause_pending` and the inbound gate's admission
/// transaction. Rows that are already paused or terminal are left alone.
pub(crate) async fn pause_pending_in(
    conn: &mut SqliteConnection,
    campaign_id: &CampaignId,
    buyer_email: &BuyerEmail,
    at: DateTime<Utc>,
) -> Result<Vec<ScheduledSendId>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT id, campaign_id, buyer_email, step, scheduled_for, status, updated_at
         FROM scheduled_send
         WHERE campaign_id = ? AND buyer_email = ? AND status = ?
         ORDER BY scheduled_for ASC, id ASC",
    )
    .bind(&campaign_id.0)
    .bind(buyer_email.as_str())
    .bind(ScheduledSendStatus::Pending.as_str())
    .fetch_all(&mut *conn)
    .await?;

    let mut paused = Vec::new();
    for row in rows {
        let mut send = scheduled_send_from_row(row)?;
        let change = send.pause(at).map_err(|error| RepositoryError::Decode(error.to_string()))?;
        if !change.is_applied() {
            continue;
        }

        let result = sqlx::query(
            "UPDATE scheduled_send SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(send.status.as_str())
        .bind(encode_timestamp(&send.updated_at))
        .bind(&send.id.0)
        .bind(ScheduledSendStatus::Pending.as_str())
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 1 {
            paused.push(send.id);
        }
    }

    Ok(paused)
}

fn scheduled_send_from_row(row: SqliteRow) -> Result<ScheduledSend, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = ScheduledSendStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown scheduled send status `{status_raw}`"))
    })?;

    Ok(ScheduledSend {
        id: ScheduledSendId(row.try_get("id")?),
        campaign_id: CampaignId(row.try_get("campaign_id")?),
        buyer_email: parse_buyer_email("buyer_email", row.try_get("buyer_email")?)?,
        step: parse_u32("step", row.try_get("step")?)?,
        scheduled_for: parse_timestamp("scheduled_for", row.try_get("scheduled_for")?)?,
        status,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
