//! In-memory wiring of the API for router tests.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use secrecy::SecretString;
use serde_json::Value;
use tower::ServiceExt;

use parley_agent::fakes::{campaign, FakeEscrow, RecordingNotifier, RecordingTransport};
use parley_agent::guardrails::GuardrailPolicy;
use parley_agent::{
    DisabledGenerator, DraftReviewService, ReplyComposer, ReplyDependencies, ReplyOrchestrator,
    ReplySettings, ReplyTemplates, ScheduleGuard,
};
use parley_core::audit::InMemoryAuditSink;
use parley_core::classifier::KeywordIntentClassifier;
use parley_core::negotiation::DeterministicNegotiationPolicy;
use parley_db::repositories::{CampaignRepository, InMemoryStore};

use crate::api::{self, ApiState, WebhookSettings};

pub const SIGNING_KEY: &str = "key-webhook-signing";

pub struct TestApi {
    pub store: InMemoryStore,
    pub transport: Arc<RecordingTransport>,
    pub notifier: Arc<RecordingNotifier>,
    pub router: Router,
}

pub async fn api(webhook: WebhookSettings) -> TestApi {
    api_with_transport(webhook, RecordingTransport::default()).await
}

pub async fn api_with_transport(webhook: WebhookSettings, transport: RecordingTransport) -> TestApi {
    let store = InMemoryStore::new();
    CampaignRepository::save(&store, campaign("cmp-1")).await.expect("campaign");

    let transport = Arc::new(transport);
    let notifier = Arc::new(RecordingNotifier::default());
    let audit = Arc::new(InMemoryAuditSink::default());
    let templates = Arc::new(ReplyTemplates::new().expect("templates"));

    let orchestrator = ReplyOrchestrator::new(
        ReplyDependencies {
            campaigns: Arc::new(store.clone()),
            conversations: Arc::new(store.clone()),
            drafts: Arc::new(store.clone()),
            gate: Arc::new(store.clone()),
            classifier: Arc::new(KeywordIntentClassifier),
            policy: Arc::new(DeterministicNegotiationPolicy),
            composer: ReplyComposer::new(
                Arc::new(DisabledGenerator),
                templates,
                GuardrailPolicy::default(),
                Duration::from_millis(200),
            ),
            escrow: Arc::new(FakeEscrow::default()),
            transport: transport.clone(),
            notifier: notifier.clone(),
            audit: audit.clone(),
        },
        ReplySettings::default(),
    );
    let drafts = DraftReviewService::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        transport.clone(),
        notifier.clone(),
        audit,
    );

    let router = api::router(ApiState {
        orchestrator: Arc::new(orchestrator),
        drafts: Arc::new(drafts),
        schedules: Arc::new(ScheduleGuard::new(Arc::new(store.clone()))),
        webhook,
    });

    TestApi { store, transport, notifier, router }
}

pub fn unsigned() -> WebhookSettings {
    WebhookSettings { signing_key: None, require_signature: false, max_age_secs: 300 }
}

pub fn signed() -> WebhookSettings {
    WebhookSettings {
        signing_key: Some(SecretString::from(SIGNING_KEY.to_string())),
        require_signature: true,
        max_age_secs: 300,
    }
}

pub async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    };

    let response = router.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.expect("body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, value)
}
