use std::env;
use std::sync::{Mutex, OnceLock};

use serde_json::Value;
use sizer_cli::commands::{admin, calc, config, doctor, history, migrate};

const VALID_ENV: &[(&str, &str)] = &[
    ("SIZER_TELEGRAM_BOT_TOKEN", "123456:test-secret"),
    ("SIZER_DATABASE_URL", "sqlite::memory:"),
    ("SIZER_DATABASE_MAX_CONNECTIONS", "1"),
];

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(VALID_ENV, || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_without_bot_token() {
    with_env(&[("SIZER_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn config_redacts_the_bot_secret_and_attributes_sources() {
    with_env(&[VALID_ENV[0], VALID_ENV[1], ("SIZER_LOG_LEVEL", "debug")], || {
        let output = config::run();

        assert!(output.contains("- telegram.bot_token = 123456:*** (source: env (SIZER_TELEGRAM_BOT_TOKEN))"));
        assert!(!output.contains("test-secret"));
        assert!(output.contains("- logging.level = debug (source: env (SIZER_LOG_LEVEL))"));
        assert!(output.contains("- guard.enabled = true (source: default)"));
    });
}

#[test]
fn doctor_reports_skipped_checks_when_config_is_invalid() {
    with_env(&[], || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 1);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "fail");
        let checks = payload["checks"].as_array().expect("checks array");
        assert_eq!(checks[0]["name"], "config_validation");
        assert_eq!(checks[0]["status"], "fail");
        assert!(checks[1..].iter().all(|check| check["status"] == "skipped"));
    });
}

#[test]
fn doctor_passes_with_valid_env() {
    with_env(VALID_ENV, || {
        let result = doctor::run(false);
        assert_eq!(result.exit_code, 0, "doctor output: {}", result.output);
        assert!(result.output.starts_with("doctor: all readiness checks passed"));
        assert!(result.output.contains("- [ok] telegram_token: token 123456:***"));
    });
}

#[test]
fn calc_runs_offline_without_configuration() {
    with_env(&[], || {
        let result = calc::run(calc::CalcRequest {
            flow: "redis".to_string(),
            assignments: vec![
                "dataset_size_gb=10".to_string(),
                "operations_per_sec=50000".to_string(),
                "high_availability=да".to_string(),
                "persistence=no".to_string(),
            ],
            ..calc::CalcRequest::default()
        });

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "calc");
        assert_eq!(result.exit_code, 0, "calc output: {}", result.output);
        assert!(payload["message"].as_str().unwrap_or_default().contains("Redis"));
    });
}

#[test]
fn calc_rejects_an_incomplete_parameter_set() {
    with_env(&[], || {
        let result = calc::run(calc::CalcRequest {
            flow: "kafka".to_string(),
            assignments: vec!["messages_per_sec=1000".to_string()],
            ..calc::CalcRequest::default()
        });
        assert_eq!(result.exit_code, 6);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "invalid_input");
    });
}

#[test]
fn history_and_admin_work_against_a_fresh_database() {
    with_env(VALID_ENV, || {
        let result = history::run(42, 5);
        assert_eq!(result.exit_code, 0, "history output: {}", result.output);
        let payload = parse_payload(&result.output);
        assert!(payload["message"].as_str().unwrap_or_default().contains("нет сохранённых расчётов"));

        let result = admin::run(42, true);
        assert_eq!(result.exit_code, 0, "admin output: {}", result.output);
        let payload = parse_payload(&result.output);
        assert!(payload["message"].as_str().unwrap_or_default().contains("granted to user 42"));
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
        "SIZER_DATABASE_URL",
        "SIZER_DATABASE_MAX_CONNECTIONS",
        "SIZER_DATABASE_TIMEOUT_SECS",
        "SIZER_TELEGRAM_BOT_TOKEN",
        "SIZER_TELEGRAM_API_BASE_URL",
        "SIZER_LLM_PROVIDER",
        "SIZER_LLM_API_KEY",
        "SIZER_LLM_BASE_URL",
        "SIZER_LLM_MODEL",
        "SIZER_LLM_TIMEOUT_SECS",
        "SIZER_LLM_MAX_RETRIES",
        "SIZER_GUARD_ENABLED",
        "SIZER_BILLING_ENABLED",
        "SIZER_BILLING_PROVIDER_TOKEN",
        "SIZER_SERVER_BIND_ADDRESS",
        "SIZER_SERVER_HEALTH_CHECK_PORT",
        "SIZER_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "SIZER_LOGGING_LEVEL",
        "SIZER_LOGGING_FORMAT",
        "SIZER_LOG_LEVEL",
        "SIZER_LOG_FORMAT",
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
