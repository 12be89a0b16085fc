use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use parley_core::config::{resolve_config_path, AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

struct Field {
    key: &'static str,
    env_key: &'static str,
    value: String,
}

impl Field {
    fn new(key: &'static str, env_key: &'static str, value: impl Into<String>) -> Self {
        Self { key, env_key, value: value.into() }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = resolve_config_path(None);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(fields(&config).into_iter().map(|field| {
        let source = field_source(
            field.key,
            field.env_key,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        format!("- {} = {} (source: {source})", field.key, field.value)
    }));
    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    vec![
        Field::new("database.url", "PARLEY_DATABASE_URL", &config.database.url),
        Field::new(
            "database.max_connections",
            "PARLEY_DATABASE_MAX_CONNECTIONS",
            config.database.max_connections.to_string(),
        ),
        Field::new("llm.provider", "PARLEY_LLM_PROVIDER", format!("{:?}", config.llm.provider)),
        Field::new("llm.model", "PARLEY_LLM_MODEL", &config.llm.model),
        Field::new("llm.base_url", "PARLEY_LLM_BASE_URL", or_unset(config.llm.base_url.as_deref())),
        Field::new("llm.api_key", "PARLEY_LLM_API_KEY", redact(config.llm.api_key.as_ref())),
        Field::new(
            "escrow.base_url",
            "PARLEY_ESCROW_BASE_URL",
            or_unset(config.escrow.base_url.as_deref()),
        ),
        Field::new("escrow.api_key", "PARLEY_ESCROW_API_KEY", redact(config.escrow.api_key.as_ref())),
        Field::new(
            "escrow.offer_validity_hours",
            "PARLEY_ESCROW_OFFER_VALIDITY_HOURS",
            config.escrow.offer_validity_hours.to_string(),
        ),
        Field::new("email.base_url", "PARLEY_EMAIL_BASE_URL", &config.email.base_url),
        Field::new("email.domain", "PARLEY_EMAIL_DOMAIN", or_unset(config.email.domain.as_deref())),
        Field::new("email.api_key", "PARLEY_EMAIL_API_KEY", redact(config.email.api_key.as_ref())),
        Field::new(
            "email.from_address",
            "PARLEY_EMAIL_FROM_ADDRESS",
            or_unset(config.email.from_address.as_deref()),
        ),
        Field::new(
            "webhook.signing_key",
            "PARLEY_WEBHOOK_SIGNING_KEY",
            redact(config.webhook.signing_key.as_ref()),
        ),
        Field::new(
            "webhook.require_signature",
            "PARLEY_WEBHOOK_REQUIRE_SIGNATURE",
            config.webhook.require_signature.to_string(),
        ),
        Field::new(
            "server.bind_address",
            "PARLEY_SERVER_BIND_ADDRESS",
            &config.server.bind_address,
        ),
        Field::new("server.port", "PARLEY_SERVER_PORT", config.server.port.to_string()),
        Field::new("logging.level", "PARLEY_LOGGING_LEVEL", &config.logging.level),
        Field::new(
            "logging.format",
            "PARLEY_LOGGING_FORMAT",
            format!("{:?}", config.logging.format),
        ),
    ]
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("config file"));
            return format!("file ({})", file_path.display());
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn or_unset(value: Option<&str>) -> &str {
    value.unwrap_or("<unset>")
}

/// Keeps a short prefix such as `key-` so operators can tell keys apart.
fn redact(secret: Option<&SecretString>) -> String {
    let Some(secret) = secret else {
        return "<unset>".to_string();
    };
    let trimmed = secret.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    match trimmed.split_once('-') {
        Some((prefix, _)) if prefix.len() <= 8 => format!("{prefix}-***"),
        _ => "<redacted>".to_string(),
    }
}
