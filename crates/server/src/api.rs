use std::sync::Arc;

use axum::{
    http::{HeaderMap, StatusCode},
    Json, Router,
};
use secrecy::SecretString;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use parley_agent::{DraftReviewService, PipelineError, ReplyOrchestrator, ScheduleGuard};
use parley_core::config::WebhookConfig;
use parley_core::errors::ApplicationError;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Services shared by the inbound and review routes.
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<ReplyOrchestrator>,
    pub drafts: Arc<DraftReviewService>,
    pub schedules: Arc<ScheduleGuard>,
    pub webhook: WebhookSettings,
}

#[derive(Clone, Debug)]
pub struct WebhookSettings {
    pub signing_key: Option<SecretString>,
    pub require_signature: bool,
    pub max_age_secs: u64,
}

impl From<&WebhookConfig> for WebhookSettings {
    fn from(config: &WebhookConfig) -> Self {
        Self {
            signing_key: config.signing_key.clone(),
            require_signature: config.require_signature,
            max_age_secs: config.max_age_secs,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ApiError {
    pub error: String,
    pub message: String,
    pub correlation_id: String,
}

pub type ApiRejection = (StatusCode, Json<ApiError>);
pub type ApiResult<T> = Result<Json<T>, ApiRejection>;

pub fn router(state: ApiState) -> Router {
    Router::new()
        .merge(crate::inbound::router(state.clone()))
        .merge(crate::review::router(state))
}

/// Uses the caller's correlation id when present, otherwise mints one.
pub fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty() && value.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| format!("req-{}", Uuid::new_v4()))
}

pub fn pipeline_error(error: PipelineError, correlation_id: &str) -> ApiRejection {
    application_error(error.into(), correlation_id)
}

pub fn application_error(error: ApplicationError, correlation_id: &str) -> ApiRejection {
    let interface = error.into_interface(correlation_id);
    let status =
        StatusCode::from_u16(interface.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        warn!(
            event_name = "api.request.failed",
            correlation_id = %correlation_id,
            status = status.as_u16(),
            error = %interface,
            "request failed"
        );
    }

    (
        status,
        Json(ApiError {
            error: interface.to_string(),
            message: interface.user_message().to_string(),
            correlation_id: correlation_id.to_string(),
        }),
    )
}

pub fn bad_request(message: impl Into<String>, correlation_id: &str) -> ApiRejection {
    rejection(StatusCode::BAD_REQUEST, message, correlation_id)
}

pub fn rejection(
    status: StatusCode,
    message: impl Into<String>,
    correlation_id: &str,
) -> ApiRejection {
    let message = message.into();
    (
        status,
        Json(ApiError { error: message.clone(), message, correlation_id: correlation_id.to_string() }),
    )
}
