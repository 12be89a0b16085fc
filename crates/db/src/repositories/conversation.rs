use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};
use uuid::Uuid;

use parley_core::domain::campaign::CampaignId;
use parley_core::domain::conversation::{
    BuyerEmail, Conversation, ConversationId, Message, MessageDirection, MessageId, MessageOrigin,
};
use parley_core::domain::intent::Intent;

use super::{
    encode_timestamp, parse_buyer_email, parse_timestamp, ConversationRepository, RepositoryError,
};
use crate::DbPool;

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn find(
        &self,
        campaign_id: &CampaignId,
        buyer_email: &BuyerEmail,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, campaign_id, buyer_email, created_at
             FROM conversation
             WHERE campaign_id = ? AND buyer_email = ?",
        )
        .bind(&campaign_id.0)
        .bind(buyer_email.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => self.load(row).await.map(Some),
            None => Ok(None),
        }
    }

    async fn find_by_id(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, campaign_id, buyer_email, created_at FROM conversation WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => self.load(row).await.map(Some),
            None => Ok(None),
        }
    }

    async fn append_message(
        &self,
        campaign_id: &CampaignId,
        buyer_email: &BuyerEmail,
        message: Message,
    ) -> Result<ConversationId, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let conversation_id = append_message_in(&mut tx, campaign_id, buyer_email, &message).await?;
        tx.commit().await?;
        Ok(conversation_id)
    }

    async fn attach_intent(
        &self,
        message_id: &MessageId,
        intent: &Intent,
    ) -> Result<bool, RepositoryError> {
        let intent_json = serde_json::to_string(intent)
            .map_err(|error| RepositoryError::Decode(format!("cannot encode intent: {error}")))?;

        let result = sqlx::query(
            "UPDATE message
             SET intent_json = ?
             WHERE id = ? AND direction = 'inbound' AND intent_json IS NULL",
        )
        .bind(intent_json)
        .bind(&message_id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

impl SqlConversationRepository {
    async fn load(&self, row: SqliteRow) -> Result<Conversation, RepositoryError> {
        let id = ConversationId(row.try_get("id")?);
        let messages = sqlx::query(
            "SELECT id, direction, origin, subject, body, intent_json, provider_message_id, sent_at
             FROM message
             WHERE conversation_id = ?
             ORDER BY sent_at ASC, seq ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(message_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Conversation {
            id,
            campaign_id: CampaignId(row.try_get("campaign_id")?),
            buyer_email: parse_buyer_email("buyer_email", row.try_get("buyer_email")?)?,
            messages,
            created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        })
    }
}

/// Appends on an open connection or transaction, creating the conversation
/// row for a first contact.
pub(crate) async fn append_message_in(
    conn: &mut SqliteConnection,
    campaign_id: &CampaignId,
    buyer_email: &BuyerEmail,
    message: &Message,
) -> Result<ConversationId, RepositoryError> {
    sqlx::query(
        "INSERT INTO conversation (id, campaign_id, buyer_email, created_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(campaign_id, buyer_email) DO NOTHING",
    )
    .bind(format!("CONV-{}", Uuid::new_v4().simple()))
    .bind(&campaign_id.0)
    .bind(buyer_email.as_str())
    .bind(encode_timestamp(&message.sent_at))
    .execute(&mut *conn)
    .await?;

    let conversation_id: String =
        sqlx::query("SELECT id FROM conversation WHERE campaign_id = ? AND buyer_email = ?")
            .bind(&campaign_id.0)
            .bind(buyer_email.as_str())
            .fetch_one(&mut *conn)
            .await?
            .try_get("id")?;

    let intent_json = message
        .intent
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|error| RepositoryError::Decode(format!("cannot encode intent: {error}")))?;

    sqlx::query(
        "INSERT INTO message (
            id, conversation_id, direction, origin, subject, body,
            intent_json, provider_message_id, sent_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&message.id.0)
    .bind(&conversation_id)
    .bind(message.direction.as_str())
    .bind(message.origin.as_str())
    .bind(&message.subject)
    .bind(&message.body)
    .bind(intent_json)
    .bind(&message.provider_message_id)
    .bind(encode_timestamp(&message.sent_at))
    .execute(&mut *conn)
    .await?;

    Ok(ConversationId(conversation_id))
}

fn message_from_row(row: SqliteRow) -> Result<Message, RepositoryError> {
    let direction_raw = row.try_get::<String, _>("direction")?;
    let direction = MessageDirection::parse(&direction_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown message direction `{direction_raw}`"))
    })?;
    let origin_raw = row.try_get::<String, _>("origin")?;
    let origin = MessageOrigin::parse(&origin_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown message origin `{origin_raw}`")))?;
    let intent = row
        .try_get::<Option<String>, _>("intent_json")?
        .map(|raw| {
            serde_json::from_str::<Intent>(&raw)
                .map_err(|error| RepositoryError::Decode(format!("invalid intent_json: {error}")))
        })
        .transpose()?;

    Ok(Message {
        id: MessageId(row.try_get("id")?),
        direction,
        origin,
        subject: row.try_get("subject")?,
        body: row.try_get("body")?,
        intent,
        provider_message_id: row.try_get("provider_message_id")?,
        sent_at: parse_timestamp("sent_at", row.try_get("sent_at")?)?,
    })
}
