use sqlx::Acquire;

use parley_core::domain::inbound::DedupKey;

use super::conversation::append_message_in;
use super::schedule::pause_pending_in;
use super::{
    encode_timestamp, AdmissionOutcome, AdmissionRequest, InboundAdmission, InboundGate,
    RepositoryError, RECEIPT_RECEIVED,
};
use crate::DbPool;

pub struct SqlInboundGate {
    pool: DbPool,
}

impl SqlInboundGate {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl InboundGate for SqlInboundGate {
    async fn admit(&self, request: AdmissionRequest) -> Result<AdmissionOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            "INSERT INTO inbound_receipt (dedup_key, campaign_id, buyer_email, outcome, received_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(dedup_key) DO NOTHING",
        )
        .bind(request.dedup_key.as_str())
        .bind(&request.campaign_id.0)
        .bind(request.buyer_email.as_str())
        .bind(RECEIPT_RECEIVED)
        .bind(encode_timestamp(&request.received_at))
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if !claimed {
            tx.rollback().await?;
            return Ok(AdmissionOutcome::Duplicate);
        }

        let message_id = request.message.id.clone();
        let conversation_id =
            append_message_in(&mut tx, &request.campaign_id, &request.buyer_email, &request.message)
                .await?;

        // The freeze runs in a savepoint so a failure there keeps the claim and
        // the message.
        let mut savepoint = Acquire::begin(&mut tx).await?;
        let (paused, freeze_error) = match pause_pending_in(
            &mut savepoint,
            &request.campaign_id,
            &request.buyer_email,
            request.received_at,
        )
        .await
        {
            Ok(paused) => {
                savepoint.commit().await?;
                (paused, None)
            }
            Err(error) => {
                savepoint.rollback().await?;
                tracing::warn!(
                    event_name = "inbound.freeze_failed",
                    dedup_key = request.dedup_key.as_str(),
                    error = %error,
                    "pausing scheduled sends failed; continuing without freeze"
                );
                (Vec::new(), Some(error.to_string()))
            }
        };

        tx.commit().await?;

        Ok(AdmissionOutcome::Admitted(InboundAdmission {
            conversation_id,
            message_id,
            paused,
            freeze_error,
        }))
    }

    async fn record_outcome(
        &self,
        dedup_key: &DedupKey,
        outcome: &str,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE inbound_receipt SET outcome = ? WHERE dedup_key = ?")
            .bind(outcome)
            .bind(dedup_key.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("inbound receipt `{}`", dedup_key.as_str())));
        }
        Ok(())
    }
}
