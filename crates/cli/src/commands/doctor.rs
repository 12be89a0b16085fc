use parley_core::config::{AppConfig, LlmProvider, LoadOptions};
use parley_db::connect_with_settings;
use serde::Serialize;

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn new(name: &'static str, status: CheckStatus, details: impl Into<String>) -> Self {
        Self { name, status, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

/// Exit code 1 when any check fails. Warnings mark collaborators that are
/// not configured; the pipeline still runs with fallbacks.
pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Fail { 1 } else { 0 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::new(
                "config_validation",
                CheckStatus::Pass,
                "configuration loaded and validated",
            ));
            checks.extend(collaborator_checks(&config));
            checks.push(check_database_connectivity(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::new("config_validation", CheckStatus::Fail, error.to_string()));
            for name in ["text_generation", "escrow", "email_transport", "webhook_signature"] {
                checks.push(DoctorCheck::new(
                    name,
                    CheckStatus::Skipped,
                    "skipped because configuration did not load",
                ));
            }
            checks.push(DoctorCheck::new(
                "database_connectivity",
                CheckStatus::Skipped,
                "skipped because configuration did not load",
            ));
        }
    }

    let failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let warned = checks.iter().any(|check| check.status == CheckStatus::Warn);
    let (overall_status, summary) = match (failed, warned) {
        (true, _) => (CheckStatus::Fail, "doctor: one or more readiness checks failed"),
        (false, true) => {
            (CheckStatus::Warn, "doctor: ready, some collaborators fall back to drafts")
        }
        (false, false) => (CheckStatus::Pass, "doctor: all readiness checks passed"),
    };

    DoctorReport { overall_status, summary: summary.to_string(), checks }
}

fn collaborator_checks(config: &AppConfig) -> Vec<DoctorCheck> {
    let generation = match config.llm.provider {
        LlmProvider::Disabled => DoctorCheck::new(
            "text_generation",
            CheckStatus::Warn,
            "llm.provider is disabled; replies use fallback templates",
        ),
        provider => DoctorCheck::new(
            "text_generation",
            CheckStatus::Pass,
            format!("{provider:?} model `{}`", config.llm.model),
        ),
    };

    let escrow = if config.escrow.is_configured() {
        DoctorCheck::new("escrow", CheckStatus::Pass, "escrow.base_url configured")
    } else {
        DoctorCheck::new(
            "escrow",
            CheckStatus::Warn,
            "escrow.base_url unset; ready buyers get a confirm-price note instead of a link",
        )
    };

    let email = if config.email.is_configured() {
        DoctorCheck::new(
            "email_transport",
            CheckStatus::Pass,
            format!("mailgun domain `{}`", config.email.domain.as_deref().unwrap_or_default()),
        )
    } else {
        DoctorCheck::new(
            "email_transport",
            CheckStatus::Warn,
            "email.domain or email.api_key unset; nothing can be sent",
        )
    };

    let webhook = match (config.webhook.signing_key.is_some(), config.webhook.require_signature) {
        (true, true) => {
            DoctorCheck::new("webhook_signature", CheckStatus::Pass, "signatures required")
        }
        (true, false) => DoctorCheck::new(
            "webhook_signature",
            CheckStatus::Warn,
            "signatures verified when present but not required",
        ),
        (false, _) => DoctorCheck::new(
            "webhook_signature",
            CheckStatus::Warn,
            "webhook.signing_key unset; inbound webhooks are not authenticated",
        ),
    };

    vec![generation, escrow, email, webhook]
}

fn check_database_connectivity(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck::new(
                "database_connectivity",
                CheckStatus::Fail,
                format!("failed to initialize async runtime: {error}"),
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| format!("failed to connect to database: {error}"))?;

        pool.close().await;
        Ok::<(), String>(())
    });

    match result {
        Ok(()) => DoctorCheck::new(
            "database_connectivity",
            CheckStatus::Pass,
            format!("connected using `{}`", config.database.url),
        ),
        Err(error) => DoctorCheck::new("database_connectivity", CheckStatus::Fail, error),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = vec![report.summary.clone()];

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
