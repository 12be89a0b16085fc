use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

use parley_agent::collaborators::UnconfiguredEscrow;
use parley_agent::guardrails::GuardrailPolicy;
use parley_agent::{
    DisabledGenerator, DraftReviewService, EmailTransport, EscrowProvider, ReplyComposer,
    ReplyDependencies, ReplyOrchestrator, ReplySettings, ReplyTemplates, ScheduleGuard,
    TextGenerator, TransportNotifier,
};
use parley_core::classifier::KeywordIntentClassifier;
use parley_core::config::{AppConfig, ConfigError, LoadOptions};
use parley_core::negotiation::DeterministicNegotiationPolicy;
use parley_db::repositories::{
    SqlAuditRepository, SqlCampaignRepository, SqlConversationRepository, SqlDraftRepository,
    SqlInboundGate, SqlScheduledSendRepository,
};
use parley_db::{connect_with_settings, migrations, DbPool};

use crate::adapters::{
    HttpEscrowProvider, MailgunTransport, OpenAiCompatibleGenerator, UnconfiguredTransport,
};
use crate::api::{ApiState, WebhookSettings};
use crate::audit_writer;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub api: ApiState,
    pub audit_writer: JoinHandle<()>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("reply templates failed to load: {0}")]
    Templates(#[source] tera::Error),
    #[error("{name} client could not be built: {detail}")]
    Adapter { name: &'static str, detail: String },
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    let max_connections = if config.database.url.contains(":memory:") {
        1
    } else {
        config.database.max_connections
    };
    let db_pool =
        connect_with_settings(&config.database.url, max_connections, config.database.timeout_secs)
            .await
            .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let (audit_sink, audit_writer) =
        audit_writer::spawn(Arc::new(SqlAuditRepository::new(db_pool.clone())));
    let audit = Arc::new(audit_sink);

    let templates = Arc::new(ReplyTemplates::new().map_err(BootstrapError::Templates)?);
    let generator = generator(&config)?;
    let escrow = escrow(&config)?;
    let transport = transport(&config)?;
    let notifier = Arc::new(TransportNotifier::new(transport.clone(), templates.clone()));

    let campaigns = Arc::new(SqlCampaignRepository::new(db_pool.clone()));
    let conversations = Arc::new(SqlConversationRepository::new(db_pool.clone()));
    let drafts = Arc::new(SqlDraftRepository::new(db_pool.clone()));
    let schedules = Arc::new(SqlScheduledSendRepository::new(db_pool.clone()));

    let orchestrator = ReplyOrchestrator::new(
        ReplyDependencies {
            campaigns: campaigns.clone(),
            conversations: conversations.clone(),
            drafts: drafts.clone(),
            gate: Arc::new(SqlInboundGate::new(db_pool.clone())),
            classifier: Arc::new(KeywordIntentClassifier),
            policy: Arc::new(DeterministicNegotiationPolicy),
            composer: ReplyComposer::new(
                generator,
                templates,
                GuardrailPolicy::default(),
                Duration::from_secs(config.llm.timeout_secs),
            ),
            escrow,
            transport: transport.clone(),
            notifier: notifier.clone(),
            audit: audit.clone(),
        },
        ReplySettings {
            escrow_timeout: Duration::from_secs(config.escrow.timeout_secs),
            offer_validity_hours: config.escrow.offer_validity_hours,
        },
    );
    let review =
        DraftReviewService::new(drafts, conversations, campaigns, transport, notifier, audit);

    info!(
        event_name = "system.bootstrap.pipeline_ready",
        correlation_id = "bootstrap",
        llm_provider = ?config.llm.provider,
        escrow_configured = config.escrow.is_configured(),
        email_configured = config.email.is_configured(),
        signature_required = config.webhook.require_signature,
        "reply pipeline assembled"
    );

    let api = ApiState {
        orchestrator: Arc::new(orchestrator),
        drafts: Arc::new(review),
        schedules: Arc::new(ScheduleGuard::new(schedules)),
        webhook: WebhookSettings::from(&config.webhook),
    };

    Ok(Application { config, db_pool, api, audit_writer })
}

fn generator(config: &AppConfig) -> Result<Arc<dyn TextGenerator>, BootstrapError> {
    let generator = OpenAiCompatibleGenerator::from_config(&config.llm)
        .map_err(|error| BootstrapError::Adapter { name: "llm", detail: error.to_string() })?;
    Ok(match generator {
        Some(generator) => Arc::new(generator),
        None => Arc::new(DisabledGenerator),
    })
}

fn escrow(config: &AppConfig) -> Result<Arc<dyn EscrowProvider>, BootstrapError> {
    let escrow = HttpEscrowProvider::from_config(&config.escrow)
        .map_err(|error| BootstrapError::Adapter { name: "escrow", detail: error.to_string() })?;
    Ok(match escrow {
        Some(escrow) => Arc::new(escrow),
        None => Arc::new(UnconfiguredEscrow),
    })
}

fn transport(config: &AppConfig) -> Result<Arc<dyn EmailTransport>, BootstrapError> {
    let transport = MailgunTransport::from_config(&config.email)
        .map_err(|error| BootstrapError::Adapter { name: "mailgun", detail: error.to_string() })?;
    Ok(match transport {
        Some(transport) => Arc::new(transport),
        None => Arc::new(UnconfiguredTransport),
    })
}
