use sqlx::{sqlite::SqliteRow, Row};

use parley_core::domain::campaign::CampaignId;
use parley_core::domain::conversation::{ConversationId, MessageId};
use parley_core::domain::draft::{Draft, DraftId, DraftStatus};

use super::{
    encode_timestamp, parse_buyer_email, parse_optional_timestamp, parse_timestamp,
    DraftRepository, RepositoryError,
};
use crate::DbPool;

const DRAFT_COLUMNS: &str = "id, campaign_id, conversation_id, buyer_email, inbound_message_id,
     subject, body, edited_subject, edited_body, status, created_at, updated_at, sent_at";

pub struct SqlDraftRepository {
    pool: DbPool,
}

impl SqlDraftRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl DraftRepository for SqlDraftRepository {
    async fn find_by_id(&self, id: &DraftId) -> Result<Option<Draft>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {DRAFT_COLUMNS} FROM draft WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(draft_from_row).transpose()
    }

    async fn list_by_campaign(
        &self,
        campaign_id: &CampaignId,
        status: Option<DraftStatus>,
    ) -> Result<Vec<Draft>, RepositoryError> {
        let rows = if let Some(status) = status {
            sqlx::query(&format!(
                "SELECT {DRAFT_COLUMNS} FROM draft
                 WHERE campaign_id = ? AND status = ?
                 ORDER BY created_at ASC, id ASC"
            ))
            .bind(&campaign_id.0)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "SELECT {DRAFT_COLUMNS} FROM draft
                 WHERE campaign_id = ?
                 ORDER BY created_at ASC, id ASC"
            ))
            .bind(&campaign_id.0)
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter().map(draft_from_row).collect()
    }

    async fn insert(&self, draft: Draft) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO draft (
                id, campaign_id, conversation_id, buyer_email, inbound_message_id,
                subject, body, edited_subject, edited_body, status, created_at, updated_at, sent_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&draft.id.0)
        .bind(&draft.campaign_id.0)
        .bind(&draft.conversation_id.0)
        .bind(draft.buyer_email.as_str())
        .bind(&draft.inbound_message_id.0)
        .bind(&draft.subject)
        .bind(&draft.body)
        .bind(&draft.edited_subject)
        .bind(&draft.edited_body)
        .bind(draft.status.as_str())
        .bind(encode_timestamp(&draft.created_at))
        .bind(encode_timestamp(&draft.updated_at))
        .bind(draft.sent_at.as_ref().map(encode_timestamp))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_if_status(
        &self,
        draft: &Draft,
        expected: DraftStatus,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE draft
             SET edited_subject = ?, edited_body = ?, status = ?, updated_at = ?, sent_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(&draft.edited_subject)
        .bind(&draft.edited_body)
        .bind(draft.status.as_str())
        .bind(encode_timestamp(&draft.updated_at))
        .bind(draft.sent_at.as_ref().map(encode_timestamp))
        .bind(&draft.id.0)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

fn draft_from_row(row: SqliteRow) -> Result<Draft, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = DraftStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown draft status `{status_raw}`")))?;

    Ok(Draft {
        id: DraftId(row.try_get("id")?),
        campaign_id: CampaignId(row.try_get("campaign_id")?),
        conversation_id: ConversationId(row.try_get("conversation_id")?),
        buyer_email: parse_buyer_email("buyer_email", row.try_get("buyer_email")?)?,
        inbound_message_id: MessageId(row.try_get("inbound_message_id")?),
        subject: row.try_get("subject")?,
        body: row.try_get("body")?,
        edited_subject: row.try_get("edited_subject")?,
        edited_body: row.try_get("edited_body")?,
        status,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
        sent_at: parse_optional_timestamp("sent_at", row.try_get("sent_at")?)?,
    })
}
