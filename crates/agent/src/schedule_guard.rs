use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use parley_core::domain::campaign::CampaignId;
use parley_core::domain::conversation::BuyerEmail;
use parley_core::domain::schedule::{ScheduledSend, ScheduledSendId, ScheduledSendStatus};
use parley_core::errors::DomainError;
use parley_db::repositories::ScheduledSendRepository;

use crate::errors::PipelineError;

/// Pauses and resumes a buyer's scheduled follow-ups. Every write is a
/// compare-and-set on the stored status, so concurrent callers never move a
/// row twice.
pub struct ScheduleGuard {
    sends: Arc<dyn ScheduledSendRepository>,
}

impl ScheduleGuard {
    pub fn new(sends: Arc<dyn ScheduledSendRepository>) -> Self {
        Self { sends }
    }

    /// Pauses every pending send for the buyer and returns the ones this call
    /// moved. This is the same repository step the inbound gate runs during
    /// admission, so a second call returns nothing.
    pub async fn freeze(
        &self,
        campaign_id: &CampaignId,
        buyer_email: &BuyerEmail,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledSendId>, PipelineError> {
        let paused = self.sends.pause_pending(campaign_id, buyer_email, now).await?;

        if !paused.is_empty() {
            info!(
                event_name = "schedule.frozen",
                campaign_id = %campaign_id,
                buyer_email = %buyer_email,
                paused = paused.len(),
                "scheduled sends paused"
            );
        }
        Ok(paused)
    }

    /// `paused -> pending` for one send, returning the updated row. Missing
    /// rows and rows in any other state are reported the same way.
    pub async fn resume_one(
        &self,
        id: &ScheduledSendId,
        now: DateTime<Utc>,
    ) -> Result<ScheduledSend, PipelineError> {
        let wrong_state =
            || DomainError::NotFoundOrWrongState { scheduled_send_id: id.0.clone() };

        let Some(send) = self.sends.find_by_id(id).await? else {
            return Err(wrong_state().into());
        };
        let Some(resumed) = self.try_resume(send, now).await? else {
            return Err(wrong_state().into());
        };

        info!(event_name = "schedule.resumed", scheduled_send_id = %id.0, "scheduled send resumed");
        Ok(resumed)
    }

    /// Resumes every paused send for the buyer and returns the rows moved.
    pub async fn resume_all(
        &self,
        campaign_id: &CampaignId,
        buyer_email: &BuyerEmail,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledSend>, PipelineError> {
        let paused = self
            .sends
            .list_for_buyer(campaign_id, buyer_email, Some(ScheduledSendStatus::Paused))
            .await?;

        let mut resumed = Vec::new();
        for send in paused {
            if let Some(send) = self.try_resume(send, now).await? {
                resumed.push(send);
            }
        }

        info!(
            event_name = "schedule.resumed_all",
            campaign_id = %campaign_id,
            buyer_email = %buyer_email,
            resumed = resumed.len(),
            "scheduled sends resumed"
        );
        Ok(resumed)
    }

    /// None when the row is not paused, or another caller moved it first.
    async fn try_resume(
        &self,
        mut send: ScheduledSend,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduledSend>, PipelineError> {
        let expected = send.status;
        if send.resume(now).is_err() {
            return Ok(None);
        }
        if !self.sends.transition(&send.id, expected, send.status, now).await? {
            return Ok(None);
        }
        Ok(Some(send))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use parley_core::domain::conversation::{BuyerEmail, Message};
    use parley_core::domain::inbound::DedupKey;
    use parley_core::domain::schedule::{ScheduledSend, ScheduledSendId, ScheduledSendStatus};
    use parley_core::errors::DomainError;
    use parley_db::repositories::{
        AdmissionOutcome, AdmissionRequest, CampaignRepository, InMemoryStore, InboundGate,
        ScheduledSendRepository,
    };

    use super::ScheduleGuard;
    use crate::errors::PipelineError;
    use crate::fakes::campaign;

    async fn store_with_sends(statuses: &[ScheduledSendStatus]) -> (InMemoryStore, BuyerEmail) {
        let store = InMemoryStore::new();
        let campaign = campaign("cmp-1");
        CampaignRepository::save(&store, campaign.clone()).await.expect("campaign");
        let buyer = BuyerEmail::parse("buyer@example.com").expect("valid");

        for (index, status) in statuses.iter().enumerate() {
            ScheduledSendRepository::save(
                &store,
                ScheduledSend {
                    id: ScheduledSendId(format!("SS-{index}")),
                    campaign_id: campaign.campaign_id.clone(),
                    buyer_email: buyer.clone(),
                    step: index as u32 + 1,
                    scheduled_for: Utc::now() + Duration::days(index as i64 + 1),
                    status: *status,
                    updated_at: Utc::now(),
                },
            )
            .await
            .expect("scheduled send");
        }
        (store, buyer)
    }

    #[tokio::test]
    async fn freeze_twice_equals_freeze_once() {
        let (store, buyer) = store_with_sends(&[
            ScheduledSendStatus::Pending,
            ScheduledSendStatus::Pending,
            ScheduledSendStatus::Sent,
        ])
        .await;
        let guard = ScheduleGuard::new(Arc::new(store.clone()));
        let campaign_id = campaign("cmp-1").campaign_id;

        let first = guard.freeze(&campaign_id, &buyer, Utc::now()).await.expect("freeze");
        let second = guard.freeze(&campaign_id, &buyer, Utc::now()).await.expect("re-freeze");

        assert_eq!(first.len(), 2);
        assert!(second.is_empty());
        let statuses: Vec<ScheduledSendStatus> = store
            .list_for_buyer(&campaign_id, &buyer, None)
            .await
            .expect("list")
            .into_iter()
            .map(|send| send.status)
            .collect();
        assert_eq!(
            statuses.iter().filter(|status| **status == ScheduledSendStatus::Paused).count(),
            2
        );
        assert!(statuses.contains(&ScheduledSendStatus::Sent));
    }

    #[tokio::test]
    async fn resume_one_only_moves_paused_rows() {
        let (store, _buyer) =
            store_with_sends(&[ScheduledSendStatus::Paused, ScheduledSendStatus::Pending]).await;
        let guard = ScheduleGuard::new(Arc::new(store.clone()));

        let resumed =
            guard.resume_one(&ScheduledSendId("SS-0".into()), Utc::now()).await.expect("resume");
        assert_eq!(resumed.id, ScheduledSendId("SS-0".into()));
        assert_eq!(resumed.status, ScheduledSendStatus::Pending);
        assert_eq!(
            store.scheduled_send(&ScheduledSendId("SS-0".into())).await.map(|send| send.status),
            Some(ScheduledSendStatus::Pending)
        );

        for id in ["SS-0", "SS-1", "SS-missing"] {
            let error = guard
                .resume_one(&ScheduledSendId(id.into()), Utc::now())
                .await
                .expect_err("not paused");
            assert!(
                matches!(
                    error,
                    PipelineError::Domain(DomainError::NotFoundOrWrongState { ref scheduled_send_id })
                        if scheduled_send_id == id
                ),
                "{id}: {error:?}"
            );
        }
    }

    #[tokio::test]
    async fn resume_all_restores_paused_sends() {
        let (store, buyer) = store_with_sends(&[
            ScheduledSendStatus::Paused,
            ScheduledSendStatus::Paused,
            ScheduledSendStatus::Cancelled,
        ])
        .await;
        let guard = ScheduleGuard::new(Arc::new(store.clone()));

        let resumed = guard
            .resume_all(&campaign("cmp-1").campaign_id, &buyer, Utc::now())
            .await
            .expect("resume all");

        assert_eq!(resumed.len(), 2);
        assert!(resumed.iter().all(|send| send.status == ScheduledSendStatus::Pending));
        for send in &resumed {
            assert_eq!(store.scheduled_send(&send.id).await.as_ref(), Some(send));
        }
        assert_eq!(
            store.scheduled_send(&ScheduledSendId("SS-2".into())).await.map(|send| send.status),
            Some(ScheduledSendStatus::Cancelled)
        );
    }

    #[tokio::test]
    async fn freeze_after_admission_finds_nothing_left_to_pause() {
        let (store, buyer) =
            store_with_sends(&[ScheduledSendStatus::Pending, ScheduledSendStatus::Pending]).await;
        let guard = ScheduleGuard::new(Arc::new(store.clone()));
        let campaign_id = campaign("cmp-1").campaign_id;
        let at = Utc::now();

        let outcome = store
            .admit(AdmissionRequest {
                dedup_key: DedupKey("msg-1".into()),
                campaign_id: campaign_id.clone(),
                buyer_email: buyer.clone(),
                message: Message::inbound("Re: offer", "Still available?", None, at),
                received_at: at,
            })
            .await
            .expect("admit");
        let AdmissionOutcome::Admitted(admission) = outcome else {
            panic!("first delivery should be admitted");
        };
        assert_eq!(admission.paused.len(), 2);

        let again = guard.freeze(&campaign_id, &buyer, Utc::now()).await.expect("freeze");
        assert!(again.is_empty());
    }
}
