use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use parley_agent::drafts::DraftSendReport;
use parley_core::domain::campaign::CampaignId;
use parley_core::domain::conversation::BuyerEmail;
use parley_core::domain::draft::{Draft, DraftId};
use parley_core::domain::schedule::{ScheduledSend, ScheduledSendId};
use parley_core::errors::ApplicationError;

use crate::api::{self, ApiResult, ApiState};

#[derive(Debug, Deserialize)]
pub struct DraftListQuery {
    pub campaign_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DraftList {
    pub campaign_id: String,
    pub drafts: Vec<Draft>,
}

#[derive(Debug, Deserialize)]
pub struct EditDraftRequest {
    pub body: String,
    #[serde(default)]
    pub subject: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ResumeResponse {
    pub resumed: Vec<ScheduledSend>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/drafts", get(list_drafts))
        .route("/api/v1/drafts/{id}", get(get_draft))
        .route("/api/v1/drafts/{id}/edit", post(edit_draft))
        .route("/api/v1/drafts/{id}/send", post(send_draft))
        .route("/api/v1/drafts/{id}/discard", post(discard_draft))
        .route("/api/v1/schedules/{id}/resume", post(resume_schedule))
        .route("/api/v1/campaigns/{campaign_id}/buyers/{email}/resume", post(resume_buyer))
        .with_state(state)
}

async fn list_drafts(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<DraftListQuery>,
) -> ApiResult<DraftList> {
    let correlation_id = api::correlation_id(&headers);
    let Some(campaign_id) = query.campaign_id.filter(|value| !value.trim().is_empty()) else {
        return Err(api::bad_request("campaign_id query parameter is required", &correlation_id));
    };

    let drafts = state
        .drafts
        .list_pending(&CampaignId(campaign_id.clone()))
        .await
        .map_err(|error| api::pipeline_error(error, &correlation_id))?;
    Ok(Json(DraftList { campaign_id, drafts }))
}

async fn get_draft(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Draft> {
    let correlation_id = api::correlation_id(&headers);
    state
        .drafts
        .get(&DraftId(id))
        .await
        .map(Json)
        .map_err(|error| api::pipeline_error(error, &correlation_id))
}

async fn edit_draft(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<EditDraftRequest>,
) -> ApiResult<Draft> {
    let correlation_id = api::correlation_id(&headers);
    if request.body.trim().is_empty() {
        return Err(api::bad_request("edited body must not be empty", &correlation_id));
    }

    let draft = state
        .drafts
        .edit(&DraftId(id), &request.body, request.subject, &correlation_id)
        .await
        .map_err(|error| api::pipeline_error(error, &correlation_id))?;
    info!(
        event_name = "review.api.draft_edited",
        correlation_id = %correlation_id,
        draft_id = %draft.id.0,
        "draft edited"
    );
    Ok(Json(draft))
}

async fn send_draft(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<DraftSendReport> {
    let correlation_id = api::correlation_id(&headers);
    let report = state
        .drafts
        .send(&DraftId(id), &correlation_id)
        .await
        .map_err(|error| api::pipeline_error(error, &correlation_id))?;
    info!(
        event_name = "review.api.draft_sent",
        correlation_id = %correlation_id,
        draft_id = %report.draft.id.0,
        delivery_id = %report.delivery_id.0,
        "draft sent"
    );
    Ok(Json(report))
}

async fn discard_draft(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Draft> {
    let correlation_id = api::correlation_id(&headers);
    state
        .drafts
        .discard(&DraftId(id), &correlation_id)
        .await
        .map(Json)
        .map_err(|error| api::pipeline_error(error, &correlation_id))
}

async fn resume_schedule(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<ResumeResponse> {
    let correlation_id = api::correlation_id(&headers);
    let resumed = state
        .schedules
        .resume_one(&ScheduledSendId(id), Utc::now())
        .await
        .map_err(|error| api::pipeline_error(error, &correlation_id))?;
    Ok(Json(ResumeResponse { resumed: vec![resumed] }))
}

async fn resume_buyer(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path((campaign_id, email)): Path<(String, String)>,
) -> ApiResult<ResumeResponse> {
    let correlation_id = api::correlation_id(&headers);
    let buyer = BuyerEmail::parse(&email)
        .map_err(|error| api::application_error(ApplicationError::Domain(error), &correlation_id))?;

    let resumed = state
        .schedules
        .resume_all(&CampaignId(campaign_id), &buyer, Utc::now())
        .await
        .map_err(|error| api::pipeline_error(error, &correlation_id))?;
    Ok(Json(ResumeResponse { resumed }))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use chrono::{Duration, Utc};
    use serde_json::{json, Value};

    use parley_agent::fakes::RecordingTransport;
    use parley_core::domain::campaign::CampaignId;
    use parley_core::domain::conversation::BuyerEmail;
    use parley_core::domain::schedule::{ScheduledSend, ScheduledSendId, ScheduledSendStatus};
    use parley_db::repositories::ScheduledSendRepository;

    use crate::testing::{api, api_with_transport, call, unsigned, TestApi};

    async fn drafted(test: &TestApi) -> String {
        let (status, body) = call(
            &test.router,
            "POST",
            "/api/v1/inbound/email",
            Some(json!({
                "sender": "buyer@example.com",
                "recipient": "offers+cmp-1@seller.test",
                "subject": "example.io",
                "stripped_text": "Would you take $1,800?",
                "message_id": "<m1@mail.example.com>",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["draft_id"].as_str().expect("draft id").to_string()
    }

    async fn seed_send(test: &TestApi, id: &str, status: ScheduledSendStatus) {
        ScheduledSendRepository::save(
            &test.store,
            ScheduledSend {
                id: ScheduledSendId(id.to_string()),
                campaign_id: CampaignId("cmp-1".to_string()),
                buyer_email: BuyerEmail::parse("buyer@example.com").expect("valid"),
                step: 2,
                scheduled_for: Utc::now() + Duration::days(3),
                status,
                updated_at: Utc::now(),
            },
        )
        .await
        .expect("scheduled send");
    }

    #[tokio::test]
    async fn listing_requires_a_campaign() {
        let test = api(unsigned()).await;

        let (status, _) = call(&test.router, "GET", "/api/v1/drafts", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let draft_id = drafted(&test).await;
        let (status, body) =
            call(&test.router, "GET", "/api/v1/drafts?campaign_id=cmp-1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["drafts"].as_array().map(Vec::len), Some(1));
        assert_eq!(body["drafts"][0]["id"], draft_id.as_str());
    }

    #[tokio::test]
    async fn edit_then_send_delivers_the_edited_body_once() {
        let test = api(unsigned()).await;
        let draft_id = drafted(&test).await;
        let notified_before = test.notifier.notifications().len();

        let (status, edited) = call(
            &test.router,
            "POST",
            &format!("/api/v1/drafts/{draft_id}/edit"),
            Some(json!({"body": "Let me check $1,800 with the owner.\n\nBest regards,\nDana"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{edited}");
        assert_eq!(edited["status"], "edited");

        let (status, report) =
            call(&test.router, "POST", &format!("/api/v1/drafts/{draft_id}/send"), None).await;
        assert_eq!(status, StatusCode::OK, "{report}");
        assert_eq!(report["draft"]["status"], "sent");

        let sent = test.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "buyer@example.com");
        assert!(sent[0].text.starts_with("Let me check $1,800"));
        assert_eq!(test.notifier.notifications().len(), notified_before + 1);

        for action in ["send", "edit"] {
            let body = (action == "edit").then(|| json!({"body": "too late"}));
            let (status, error) =
                call(&test.router, "POST", &format!("/api/v1/drafts/{draft_id}/{action}"), body)
                    .await;
            assert_eq!(status, StatusCode::CONFLICT, "{action}: {error}");
        }
        assert_eq!(test.transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn discarded_drafts_cannot_be_sent() {
        let test = api(unsigned()).await;
        let draft_id = drafted(&test).await;
        let discard = format!("/api/v1/drafts/{draft_id}/discard");

        let (status, body) = call(&test.router, "POST", &discard, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "discarded");

        let (again, _) = call(&test.router, "POST", &discard, None).await;
        assert_eq!(again, StatusCode::OK);

        let (status, _) =
            call(&test.router, "POST", &format!("/api/v1/drafts/{draft_id}/send"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(test.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn failed_delivery_leaves_draft_sendable() {
        let test = api_with_transport(unsigned(), RecordingTransport::failing()).await;
        let draft_id = drafted(&test).await;

        let (status, body) =
            call(&test.router, "POST", &format!("/api/v1/drafts/{draft_id}/send"), None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{body}");

        let (status, draft) =
            call(&test.router, "GET", &format!("/api/v1/drafts/{draft_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(draft["status"], "pending");
    }

    #[tokio::test]
    async fn unknown_draft_is_not_found() {
        let test = api(unsigned()).await;

        let (status, body) = call(&test.router, "GET", "/api/v1/drafts/DRAFT-missing", None).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_ne!(body["correlation_id"], Value::Null);
    }

    #[tokio::test]
    async fn resume_moves_paused_sends_only() {
        let test = api(unsigned()).await;
        seed_send(&test, "SS-1", ScheduledSendStatus::Paused).await;
        seed_send(&test, "SS-2", ScheduledSendStatus::Pending).await;

        let (status, body) =
            call(&test.router, "POST", "/api/v1/schedules/SS-1/resume", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["resumed"].as_array().map(Vec::len), Some(1));
        assert_eq!(body["resumed"][0]["id"], "SS-1");
        assert_eq!(body["resumed"][0]["status"], "pending");

        for id in ["SS-1", "SS-2", "SS-missing"] {
            let (status, _) =
                call(&test.router, "POST", &format!("/api/v1/schedules/{id}/resume"), None).await;
            assert_eq!(status, StatusCode::CONFLICT, "{id}");
        }
    }

    #[tokio::test]
    async fn resume_buyer_restores_every_paused_send() {
        let test = api(unsigned()).await;
        seed_send(&test, "SS-1", ScheduledSendStatus::Paused).await;
        seed_send(&test, "SS-2", ScheduledSendStatus::Paused).await;

        let (status, body) = call(
            &test.router,
            "POST",
            "/api/v1/campaigns/cmp-1/buyers/buyer%40example.com/resume",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["resumed"].as_array().map(Vec::len), Some(2));
        assert!(body["resumed"]
            .as_array()
            .is_some_and(|rows| rows.iter().all(|row| row["status"] == "pending")));
        assert_eq!(
            test.store.scheduled_send(&ScheduledSendId("SS-2".into())).await.map(|send| send.status),
            Some(ScheduledSendStatus::Pending)
        );

        let (status, _) = call(
            &test.router,
            "POST",
            "/api/v1/campaigns/cmp-1/buyers/not-an-address/resume",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
