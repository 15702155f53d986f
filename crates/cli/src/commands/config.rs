use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::ExposeSecret;
use sizer_core::config::{AppConfig, LoadOptions};
use toml::Value;

struct Field {
    key: &'static str,
    env_keys: &'static [&'static str],
    value: String,
}

impl Field {
    fn new(key: &'static str, env_keys: &'static [&'static str], value: impl Into<String>) -> Self {
        Self { key, env_keys, value: value.into() }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let prices = &config.billing.prices;
    vec![
        Field::new("database.url", &["SIZER_DATABASE_URL"], &config.database.url),
        Field::new(
            "database.max_connections",
            &["SIZER_DATABASE_MAX_CONNECTIONS"],
            config.database.max_connections.to_string(),
        ),
        Field::new(
            "database.timeout_secs",
            &["SIZER_DATABASE_TIMEOUT_SECS"],
            config.database.timeout_secs.to_string(),
        ),
        Field::new(
            "telegram.bot_token",
            &["SIZER_TELEGRAM_BOT_TOKEN"],
            redact_token(config.telegram.bot_token.expose_secret()),
        ),
        Field::new(
            "telegram.api_base_url",
            &["SIZER_TELEGRAM_API_BASE_URL"],
            &config.telegram.api_base_url,
        ),
        Field::new(
            "telegram.poll_timeout_secs",
            &["SIZER_TELEGRAM_POLL_TIMEOUT_SECS"],
            config.telegram.poll_timeout_secs.to_string(),
        ),
        Field::new("llm.provider", &["SIZER_LLM_PROVIDER"], format!("{:?}", config.llm.provider)),
        Field::new("llm.model", &["SIZER_LLM_MODEL"], &config.llm.model),
        Field::new(
            "llm.base_url",
            &["SIZER_LLM_BASE_URL"],
            config.llm.base_url.as_deref().unwrap_or("<unset>"),
        ),
        Field::new(
            "llm.api_key",
            &["SIZER_LLM_API_KEY"],
            if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" },
        ),
        Field::new(
            "llm.timeout_secs",
            &["SIZER_LLM_TIMEOUT_SECS"],
            config.llm.timeout_secs.to_string(),
        ),
        Field::new(
            "llm.temperature",
            &["SIZER_LLM_TEMPERATURE"],
            config.llm.temperature.to_string(),
        ),
        Field::new("guard.enabled", &["SIZER_GUARD_ENABLED"], config.guard.enabled.to_string()),
        Field::new(
            "guard.max_quote_count",
            &["SIZER_GUARD_MAX_QUOTE_COUNT"],
            config.guard.max_quote_count.to_string(),
        ),
        Field::new(
            "guard.max_length",
            &["SIZER_GUARD_MAX_LENGTH"],
            config.guard.max_length.to_string(),
        ),
        Field::new(
            "guard.max_adjustment_factor",
            &["SIZER_GUARD_MAX_ADJUSTMENT_FACTOR"],
            config.guard.max_adjustment_factor.to_string(),
        ),
        Field::new(
            "sessions.idle_timeout_secs",
            &["SIZER_SESSIONS_IDLE_TIMEOUT_SECS"],
            config.sessions.idle_timeout_secs.to_string(),
        ),
        Field::new(
            "sessions.sweep_interval_secs",
            &["SIZER_SESSIONS_SWEEP_INTERVAL_SECS"],
            config.sessions.sweep_interval_secs.to_string(),
        ),
        Field::new(
            "sessions.min_conditions_length",
            &["SIZER_SESSIONS_MIN_CONDITIONS_LENGTH"],
            config.sessions.min_conditions_length.to_string(),
        ),
        Field::new(
            "billing.enabled",
            &["SIZER_BILLING_ENABLED"],
            config.billing.enabled.to_string(),
        ),
        Field::new(
            "billing.provider_token",
            &["SIZER_BILLING_PROVIDER_TOKEN"],
            if config.billing.provider_token.is_some() { "<redacted>" } else { "<unset>" },
        ),
        Field::new(
            "billing.provider_name",
            &["SIZER_BILLING_PROVIDER_NAME"],
            &config.billing.provider_name,
        ),
        Field::new("billing.currency", &["SIZER_BILLING_CURRENCY"], &config.billing.currency),
        Field::new(
            "billing.prices.kafka_broker",
            &["SIZER_BILLING_PRICE_KAFKA_BROKER"],
            prices.kafka_broker.to_string(),
        ),
        Field::new(
            "billing.prices.kubernetes_worker_node",
            &["SIZER_BILLING_PRICE_KUBERNETES_WORKER_NODE"],
            prices.kubernetes_worker_node.to_string(),
        ),
        Field::new(
            "billing.prices.redis_instance",
            &["SIZER_BILLING_PRICE_REDIS_INSTANCE"],
            prices.redis_instance.to_string(),
        ),
        Field::new(
            "billing.prices.rabbitmq_node",
            &["SIZER_BILLING_PRICE_RABBITMQ_NODE"],
            prices.rabbitmq_node.to_string(),
        ),
        Field::new(
            "server.bind_address",
            &["SIZER_SERVER_BIND_ADDRESS"],
            &config.server.bind_address,
        ),
        Field::new(
            "server.health_check_port",
            &["SIZER_SERVER_HEALTH_CHECK_PORT"],
            config.server.health_check_port.to_string(),
        ),
        Field::new(
            "server.graceful_shutdown_secs",
            &["SIZER_SERVER_GRACEFUL_SHUTDOWN_SECS"],
            config.server.graceful_shutdown_secs.to_string(),
        ),
        Field::new(
            "logging.level",
            &["SIZER_LOGGING_LEVEL", "SIZER_LOG_LEVEL"],
            &config.logging.level,
        ),
        Field::new(
            "logging.format",
            &["SIZER_LOGGING_FORMAT", "SIZER_LOG_FORMAT"],
            format!("{:?}", config.logging.format),
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    ["sizer.toml", "config/sizer.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
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

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps the bot id in front of the colon, hides the secret half.
pub(crate) fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((bot_id, _)) = trimmed.split_once(':') {
        return format!("{bot_id}:***");
    }

    "<redacted>".to_string()
}
