use std::env;
use std::fs;
use std::sync::{Mutex, OnceLock};

use parley_cli::commands::{campaign, classify, config, doctor, migrate};
use rust_decimal::Decimal;
use serde_json::Value;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("PARLEY_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_invalid_port() {
    with_env(&[("PARLEY_DATABASE_URL", "sqlite::memory:"), ("PARLEY_SERVER_PORT", "0")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn doctor_json_warns_for_unconfigured_collaborators() {
    with_env(&[("PARLEY_DATABASE_URL", "sqlite::memory:")], || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 0, "warnings must not fail doctor");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "warn");

        let checks = payload["checks"].as_array().expect("checks array");
        let status_of = |name: &str| {
            checks
                .iter()
                .find(|check| check["name"] == name)
                .map(|check| check["status"].clone())
                .unwrap_or(Value::Null)
        };
        assert_eq!(status_of("config_validation"), "pass");
        assert_eq!(status_of("database_connectivity"), "pass");
        assert_eq!(status_of("text_generation"), "warn");
        assert_eq!(status_of("email_transport"), "warn");
    });
}

#[test]
fn doctor_fails_and_skips_when_config_is_invalid() {
    with_env(&[("PARLEY_LLM_PROVIDER", "ollama")], || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 1);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "fail");
        assert_eq!(payload["checks"][0]["name"], "config_validation");
        assert_eq!(payload["checks"][1]["status"], "skipped");
    });
}

#[test]
fn config_output_redacts_secrets_and_names_sources() {
    with_env(
        &[
            ("PARLEY_EMAIL_DOMAIN", "mg.seller.test"),
            ("PARLEY_EMAIL_API_KEY", "key-supersecretvalue"),
            ("PARLEY_SERVER_PORT", "9191"),
        ],
        || {
            let output = config::run();
            assert!(output.contains("server.port = 9191 (source: env (PARLEY_SERVER_PORT))"));
            assert!(output.contains("email.api_key = key-***"));
            assert!(output.contains("webhook.signing_key = <unset> (source: default)"));
            assert!(!output.contains("supersecretvalue"));
        },
    );
}

#[test]
fn classify_reports_intent_and_decision() {
    let result = classify::run(
        "I can pay $2,500 today",
        Some(Decimal::from(2_500)),
        Some(Decimal::from(1_500)),
    );
    assert_eq!(result.exit_code, 0);

    let payload = parse_payload(&result.output);
    assert_eq!(payload["command"], "classify");
    assert_eq!(payload["data"]["decision"]["escrow_allowed"], true);
}

#[test]
fn campaign_import_persists_every_campaign() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("campaigns.toml");
    fs::write(
        &path,
        r#"
[[campaign]]
id = "cmp-alpha"
domain_name = "alpha.io"
seller_name = "Dana"
seller_email = "dana@seller.test"
sender_address = "alpha@seller.test"
asking_price = 4000
minimum_price = 3000

[[campaign]]
id = "cmp-beta"
domain_name = "beta.io"
seller_name = "Dana"
seller_email = "dana@seller.test"
sender_address = "beta@seller.test"
auto_respond = true
"#,
    )
    .expect("write campaign file");

    with_env(&[("PARLEY_DATABASE_URL", "sqlite::memory:")], || {
        let result = campaign::import(&path);
        assert_eq!(result.exit_code, 0, "unexpected output: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "campaign_import");
        assert_eq!(payload["data"]["campaign_ids"][0], "cmp-alpha");
        assert_eq!(payload["data"]["campaign_ids"][1], "cmp-beta");
    });
}

#[test]
fn campaign_import_rejects_unknown_fields_before_touching_the_database() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("campaigns.toml");
    fs::write(
        &path,
        "[[campaign]]\nid = \"c\"\ndomain_name = \"d.io\"\nseller_name = \"S\"\nseller_email = \"s@x.test\"\nsender_address = \"o@x.test\"\nfloor = 10\n",
    )
    .expect("write campaign file");

    with_env(&[("PARLEY_SERVER_PORT", "0")], || {
        let result = campaign::import(&path);
        assert_eq!(result.exit_code, 2);
        assert_eq!(parse_payload(&result.output)["error_class"], "invalid_input");
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "PARLEY_DATABASE_URL",
        "PARLEY_DATABASE_MAX_CONNECTIONS",
        "PARLEY_DATABASE_TIMEOUT_SECS",
        "PARLEY_LLM_PROVIDER",
        "PARLEY_LLM_API_KEY",
        "PARLEY_LLM_BASE_URL",
        "PARLEY_LLM_MODEL",
        "PARLEY_ESCROW_BASE_URL",
        "PARLEY_ESCROW_API_KEY",
        "PARLEY_EMAIL_DOMAIN",
        "PARLEY_EMAIL_API_KEY",
        "PARLEY_EMAIL_FROM_ADDRESS",
        "PARLEY_WEBHOOK_SIGNING_KEY",
        "PARLEY_WEBHOOK_REQUIRE_SIGNATURE",
        "PARLEY_SERVER_BIND_ADDRESS",
        "PARLEY_SERVER_PORT",
        "PARLEY_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "PARLEY_LOGGING_LEVEL",
        "PARLEY_LOGGING_FORMAT",
        "PARLEY_LOG_LEVEL",
        "PARLEY_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
