use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONFIG_FILE_CANDIDATES: [&str; 2] = ["parley.toml", "config/parley.toml"];

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub escrow: EscrowConfig,
    pub email: EmailConfig,
    pub webhook: WebhookConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct EscrowConfig {
    /// Unset disables payment offers; replies fall back to a confirm-price note.
    pub base_url: Option<String>,
    pub api_key: Option<SecretString>,
    pub timeout_secs: u64,
    pub offer_validity_hours: u32,
}

#[derive(Clone, Debug)]
pub struct EmailConfig {
    pub base_url: String,
    pub domain: Option<String>,
    pub api_key: Option<SecretString>,
    pub from_name: String,
    pub from_address: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct WebhookConfig {
    pub signing_key: Option<SecretString>,
    pub require_signature: bool,
    pub max_age_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Ollama,
    Disabled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub email_api_key: Option<String>,
    pub webhook_signing_key: Option<String>,
    pub server_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://parley.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Disabled,
                api_key: None,
                base_url: None,
                model: "gpt-4o-mini".to_string(),
                timeout_secs: 20,
                max_retries: 2,
            },
            escrow: EscrowConfig {
                base_url: None,
                api_key: None,
                timeout_secs: 10,
                offer_validity_hours: 72,
            },
            email: EmailConfig {
                base_url: "https://api.mailgun.net/v3".to_string(),
                domain: None,
                api_key: None,
                from_name: "Parley".to_string(),
                from_address: None,
                timeout_secs: 15,
            },
            webhook: WebhookConfig { signing_key: None, require_signature: false, max_age_secs: 900 },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            "disabled" | "none" => Ok(Self::Disabled),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama|disabled)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl EmailConfig {
    /// Transport is usable only with both a sending domain and an API key.
    pub fn is_configured(&self) -> bool {
        self.domain.as_deref().is_some_and(|value| !value.trim().is_empty())
            && self.api_key.as_ref().is_some_and(|value| !value.expose_secret().trim().is_empty())
    }
}

impl EscrowConfig {
    pub fn is_configured(&self) -> bool {
        self.base_url.as_deref().is_some_and(|value| !value.trim().is_empty())
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(CONFIG_FILE_CANDIDATES[0]));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
        }

        if let Some(escrow) = patch.escrow {
            if let Some(base_url) = escrow.base_url {
                self.escrow.base_url = Some(base_url);
            }
            if let Some(api_key) = escrow.api_key {
                self.escrow.api_key = Some(secret_value(api_key));
            }
            if let Some(timeout_secs) = escrow.timeout_secs {
                self.escrow.timeout_secs = timeout_secs;
            }
            if let Some(offer_validity_hours) = escrow.offer_validity_hours {
                self.escrow.offer_validity_hours = offer_validity_hours;
            }
        }

        if let Some(email) = patch.email {
            if let Some(base_url) = email.base_url {
                self.email.base_url = base_url;
            }
            if let Some(domain) = email.domain {
                self.email.domain = Some(domain);
            }
            if let Some(api_key) = email.api_key {
                self.email.api_key = Some(secret_value(api_key));
            }
            if let Some(from_name) = email.from_name {
                self.email.from_name = from_name;
            }
            if let Some(from_address) = email.from_address {
                self.email.from_address = Some(from_address);
            }
            if let Some(timeout_secs) = email.timeout_secs {
                self.email.timeout_secs = timeout_secs;
            }
        }

        if let Some(webhook) = patch.webhook {
            if let Some(signing_key) = webhook.signing_key {
                self.webhook.signing_key = Some(secret_value(signing_key));
            }
            if let Some(require_signature) = webhook.require_signature {
                self.webhook.require_signature = require_signature;
            }
            if let Some(max_age_secs) = webhook.max_age_secs {
                self.webhook.max_age_secs = max_age_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("PARLEY_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("PARLEY_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_env("PARLEY_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("PARLEY_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PARLEY_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("PARLEY_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("PARLEY_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("PARLEY_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("PARLEY_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_env("PARLEY_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_env("PARLEY_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("PARLEY_ESCROW_BASE_URL") {
            self.escrow.base_url = Some(value);
        }
        if let Some(value) = read_env("PARLEY_ESCROW_API_KEY") {
            self.escrow.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("PARLEY_ESCROW_TIMEOUT_SECS") {
            self.escrow.timeout_secs = parse_env("PARLEY_ESCROW_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_ESCROW_OFFER_VALIDITY_HOURS") {
            self.escrow.offer_validity_hours =
                parse_env("PARLEY_ESCROW_OFFER_VALIDITY_HOURS", &value)?;
        }

        if let Some(value) = read_env("PARLEY_EMAIL_BASE_URL") {
            self.email.base_url = value;
        }
        if let Some(value) = read_env("PARLEY_EMAIL_DOMAIN") {
            self.email.domain = Some(value);
        }
        if let Some(value) = read_env("PARLEY_EMAIL_API_KEY") {
            self.email.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("PARLEY_EMAIL_FROM_NAME") {
            self.email.from_name = value;
        }
        if let Some(value) = read_env("PARLEY_EMAIL_FROM_ADDRESS") {
            self.email.from_address = Some(value);
        }
        if let Some(value) = read_env("PARLEY_EMAIL_TIMEOUT_SECS") {
            self.email.timeout_secs = parse_env("PARLEY_EMAIL_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PARLEY_WEBHOOK_SIGNING_KEY") {
            self.webhook.signing_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("PARLEY_WEBHOOK_REQUIRE_SIGNATURE") {
            self.webhook.require_signature = parse_env("PARLEY_WEBHOOK_REQUIRE_SIGNATURE", &value)?;
        }
        if let Some(value) = read_env("PARLEY_WEBHOOK_MAX_AGE_SECS") {
            self.webhook.max_age_secs = parse_env("PARLEY_WEBHOOK_MAX_AGE_SECS", &value)?;
        }

        if let Some(value) = read_env("PARLEY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("PARLEY_SERVER_PORT") {
            self.server.port = parse_env("PARLEY_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("PARLEY_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_env("PARLEY_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("PARLEY_LOGGING_LEVEL").or_else(|| read_env("PARLEY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PARLEY_LOGGING_FORMAT").or_else(|| read_env("PARLEY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(email_api_key) = overrides.email_api_key {
            self.email.api_key = Some(secret_value(email_api_key));
        }
        if let Some(webhook_signing_key) = overrides.webhook_signing_key {
            self.webhook.signing_key = Some(secret_value(webhook_signing_key));
        }
        if let Some(server_port) = overrides.server_port {
            self.server.port = server_port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_escrow(&self.escrow)?;
        validate_email(&self.email)?;
        validate_webhook(&self.webhook)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    CONFIG_FILE_CANDIDATES.into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the openai provider".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for the ollama provider (e.g. http://localhost:11434)"
                        .to_string(),
                ));
            }
        }
        LlmProvider::Disabled => {}
    }

    validate_http_url("llm.base_url", llm.base_url.as_deref())
}

fn validate_escrow(escrow: &EscrowConfig) -> Result<(), ConfigError> {
    validate_http_url("escrow.base_url", escrow.base_url.as_deref())?;

    if escrow.timeout_secs == 0 || escrow.timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "escrow.timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    if escrow.offer_validity_hours == 0 {
        return Err(ConfigError::Validation(
            "escrow.offer_validity_hours must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_email(email: &EmailConfig) -> Result<(), ConfigError> {
    validate_http_url("email.base_url", Some(email.base_url.as_str()))?;

    let has_key = email.api_key.as_ref().is_some_and(|key| !key.expose_secret().trim().is_empty());
    let has_domain = email.domain.as_deref().is_some_and(|domain| !domain.trim().is_empty());
    if has_key && !has_domain {
        return Err(ConfigError::Validation(
            "email.domain is required when email.api_key is set (the Mailgun sending domain)"
                .to_string(),
        ));
    }

    if let Some(address) = email.from_address.as_deref() {
        if !address.contains('@') {
            return Err(ConfigError::Validation(format!(
                "email.from_address `{address}` is not an email address"
            )));
        }
    }

    if email.timeout_secs == 0 || email.timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "email.timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    Ok(())
}

fn validate_webhook(webhook: &WebhookConfig) -> Result<(), ConfigError> {
    let has_key =
        webhook.signing_key.as_ref().is_some_and(|key| !key.expose_secret().trim().is_empty());
    if webhook.require_signature && !has_key {
        return Err(ConfigError::Validation(
            "webhook.require_signature is true but webhook.signing_key is not set. Copy the HTTP webhook signing key from the Mailgun dashboard".to_string(),
        ));
    }

    if webhook.max_age_secs == 0 {
        return Err(ConfigError::Validation(
            "webhook.max_age_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_http_url(key: &str, value: Option<&str>) -> Result<(), ConfigError> {
    match value.map(str::trim) {
        Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => Err(
            ConfigError::Validation(format!("{key} must start with http:// or https://")),
        ),
        _ => Ok(()),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    escrow: Option<EscrowPatch>,
    email: Option<EmailPatch>,
    webhook: Option<WebhookPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct EscrowPatch {
    base_url: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
    offer_validity_hours: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct EmailPatch {
    base_url: Option<String>,
    domain: Option<String>,
    api_key: Option<String>,
    from_name: Option<String>,
    from_address: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookPatch {
    signing_key: Option<String>,
    require_signature: Option<bool>,
    max_age_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_validate_without_any_file_or_env() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;
        ensure(config.llm.provider == LlmProvider::Disabled, "llm should default to disabled")?;
        ensure(!config.email.is_configured(), "email transport should default to unconfigured")?;
        ensure(!config.escrow.is_configured(), "escrow should default to unconfigured")?;
        ensure(!config.webhook.require_signature, "signatures should be optional by default")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_PARLEY_MAILGUN_KEY", "key-from-env");
        env::set_var("TEST_PARLEY_SIGNING_KEY", "signing-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("parley.toml");
            fs::write(
                &path,
                r#"
[email]
domain = "mg.seller.test"
api_key = "${TEST_PARLEY_MAILGUN_KEY}"

[webhook]
signing_key = "${TEST_PARLEY_SIGNING_KEY}"
require_signature = true
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.email.api_key.as_ref().map(|key| key.expose_secret() == "key-from-env")
                    == Some(true),
                "mailgun key should be loaded from environment",
            )?;
            ensure(
                config.webhook.signing_key.as_ref().map(|key| key.expose_secret().to_string())
                    == Some("signing-from-env".to_string()),
                "signing key should be loaded from environment",
            )?;
            ensure(config.email.is_configured(), "email transport should be configured")?;
            Ok(())
        })();

        clear_vars(&["TEST_PARLEY_MAILGUN_KEY", "TEST_PARLEY_SIGNING_KEY"]);
        result
    }

    #[test]
    fn missing_interpolation_variable_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("parley.toml");
        fs::write(&path, "[llm]\napi_key = \"${PARLEY_TEST_UNSET_VARIABLE}\"\n")
            .map_err(|err| err.to_string())?;

        let error = match AppConfig::load(LoadOptions {
            config_path: Some(path),
            ..LoadOptions::default()
        }) {
            Ok(_) => return Err("expected interpolation failure".to_string()),
            Err(error) => error,
        };
        ensure(
            matches!(error, ConfigError::MissingEnvInterpolation { ref var } if var == "PARLEY_TEST_UNSET_VARIABLE"),
            "interpolation failure should name the variable",
        )
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("PARLEY_LOG_LEVEL", "warn");
        env::set_var("PARLEY_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["PARLEY_LOG_LEVEL", "PARLEY_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("PARLEY_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("PARLEY_SERVER_PORT", "9090");
        env::set_var("PARLEY_LLM_MODEL", "model-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("parley.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[llm]
model = "model-from-file"

[server]
port = 7070

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.server.port == 9090, "env port should win over file")?;
            ensure(config.llm.model == "model-from-env", "env model should win over file")?;
            Ok(())
        })();

        clear_vars(&["PARLEY_DATABASE_URL", "PARLEY_SERVER_PORT", "PARLEY_LLM_MODEL"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("PARLEY_WEBHOOK_REQUIRE_SIGNATURE", "true");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("webhook.signing_key")
            );
            ensure(has_message, "validation failure should mention webhook.signing_key")
        })();

        clear_vars(&["PARLEY_WEBHOOK_REQUIRE_SIGNATURE"]);
        result
    }

    #[test]
    fn invalid_numeric_env_override_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("PARLEY_SERVER_PORT", "not-a-port");
        let result = match AppConfig::load(LoadOptions::default()) {
            Ok(_) => Err("expected invalid env override".to_string()),
            Err(error) => ensure(
                matches!(error, ConfigError::InvalidEnvOverride { ref key, .. } if key == "PARLEY_SERVER_PORT"),
                "error should name the env key",
            ),
        };

        clear_vars(&["PARLEY_SERVER_PORT"]);
        result
    }

    #[test]
    fn openai_provider_requires_api_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let result = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                llm_provider: Some(LlmProvider::OpenAi),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        });
        ensure(
            matches!(result, Err(ConfigError::Validation(ref message)) if message.contains("llm.api_key")),
            "openai without a key should fail validation",
        )
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("PARLEY_EMAIL_DOMAIN", "mg.seller.test");
        env::set_var("PARLEY_EMAIL_API_KEY", "key-secret-value");
        env::set_var("PARLEY_WEBHOOK_SIGNING_KEY", "signing-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("key-secret-value"), "debug output should not contain api key")?;
            ensure(
                !debug.contains("signing-secret-value"),
                "debug output should not contain signing key",
            )?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["PARLEY_EMAIL_DOMAIN", "PARLEY_EMAIL_API_KEY", "PARLEY_WEBHOOK_SIGNING_KEY"]);
        result
    }
}
