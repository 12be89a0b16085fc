use std::collections::BTreeMap;

use sqlx::{sqlite::SqliteRow, Row};

use parley_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
use parley_core::domain::campaign::CampaignId;
use parley_core::domain::conversation::ConversationId;

use super::{encode_timestamp, parse_timestamp, AuditRepository, RepositoryError};
use crate::DbPool;

pub struct SqlAuditRepository {
    pool: DbPool,
}

impl SqlAuditRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AuditRepository for SqlAuditRepository {
    async fn append(&self, event: &AuditEvent) -> Result<(), RepositoryError> {
        let metadata_json = serde_json::to_string(&event.metadata)
            .map_err(|error| RepositoryError::Decode(format!("cannot encode metadata: {error}")))?;

        sqlx::query(
            "INSERT INTO audit_event (
                id, campaign_id, conversation_id, correlation_id, event_type,
                category, actor, outcome, metadata_json, occurred_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING",
        )
        .bind(&event.event_id)
        .bind(event.campaign_id.as_ref().map(|id| id.0.as_str()))
        .bind(event.conversation_id.as_ref().map(|id| id.0.as_str()))
        .bind(&event.correlation_id)
        .bind(&event.event_type)
        .bind(event.category.as_str())
        .bind(&event.actor)
        .bind(event.outcome.as_str())
        .bind(metadata_json)
        .bind(encode_timestamp(&event.occurred_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_correlation(
        &self,
        correlation_id: &str,
    ) -> Result<Vec<AuditEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, campaign_id, conversation_id, correlation_id, event_type,
                    category, actor, outcome, metadata_json, occurred_at
             FROM audit_event
             WHERE correlation_id = ?
             ORDER BY occurred_at ASC, rowid ASC",
        )
        .bind(correlation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(audit_event_from_row).collect()
    }

    async fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<AuditEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, campaign_id, conversation_id, correlation_id, event_type,
                    category, actor, outcome, metadata_json, occurred_at
             FROM audit_event
             WHERE conversation_id = ?
             ORDER BY occurred_at ASC, rowid ASC",
        )
        .bind(&conversation_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(audit_event_from_row).collect()
    }
}

fn audit_event_from_row(row: SqliteRow) -> Result<AuditEvent, RepositoryError> {
    let category_raw = row.try_get::<String, _>("category")?;
    let category = AuditCategory::parse(&category_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown audit category `{category_raw}`")))?;
    let outcome_raw = row.try_get::<String, _>("outcome")?;
    let outcome = AuditOutcome::parse(&outcome_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown audit outcome `{outcome_raw}`")))?;
    let metadata_raw = row.try_get::<String, _>("metadata_json")?;
    let metadata = serde_json::from_str::<BTreeMap<String, String>>(&metadata_raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid metadata_json: {error}")))?;

    Ok(AuditEvent {
        event_id: row.try_get("id")?,
        campaign_id: row.try_get::<Option<String>, _>("campaign_id")?.map(CampaignId),
        conversation_id: row.try_get::<Option<String>, _>("conversation_id")?.map(ConversationId),
        correlation_id: row.try_get("correlation_id")?,
        event_type: row.try_get("event_type")?,
        category,
        actor: row.try_get("actor")?,
        outcome,
        metadata,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
    })
}
