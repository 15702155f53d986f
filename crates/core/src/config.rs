use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::billing::PriceList;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub telegram: TelegramConfig,
    pub llm: LlmConfig,
    pub guard: GuardConfig,
    pub sessions: SessionConfig,
    pub billing: BillingConfig,
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
pub struct TelegramConfig {
    pub bot_token: SecretString,
    pub api_base_url: String,
    pub poll_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub temperature: f64,
    pub max_tokens: u32,
}

#[derive(Clone, Debug)]
pub struct GuardConfig {
    pub enabled: bool,
    pub max_quote_count: usize,
    pub max_length: usize,
    pub max_adjustment_factor: f64,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub min_conditions_length: usize,
}

/// Thirty days.
const MAX_IDLE_TIMEOUT_SECS: u64 = 30 * 24 * 3600;

impl SessionConfig {
    pub fn idle_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.idle_timeout_secs.min(MAX_IDLE_TIMEOUT_SECS) as i64)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Clone, Debug)]
pub struct BillingConfig {
    pub enabled: bool,
    pub provider_token: Option<SecretString>,
    pub provider_name: String,
    pub currency: String,
    pub prices: PriceList,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenRouter,
    OpenAi,
    Ollama,
}

impl LlmProvider {
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenRouter => "https://openrouter.ai/api/v1",
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Ollama => "http://localhost:11434/v1",
        }
    }

    pub fn requires_api_key(self) -> bool {
        matches!(self, Self::OpenRouter | Self::OpenAi)
    }
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
    pub log_format: Option<LogFormat>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub billing_enabled: Option<bool>,
    pub billing_provider_token: Option<String>,
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
                url: "sqlite://sizer.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            telegram: TelegramConfig {
                bot_token: String::new().into(),
                api_base_url: "https://api.telegram.org".to_string(),
                poll_timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some(LlmProvider::Ollama.default_base_url().to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 30,
                max_retries: 1,
                temperature: 0.2,
                max_tokens: 1500,
            },
            guard: GuardConfig {
                enabled: true,
                max_quote_count: 15,
                max_length: 2000,
                max_adjustment_factor: 10.0,
            },
            sessions: SessionConfig {
                idle_timeout_secs: 3600,
                sweep_interval_secs: 60,
                min_conditions_length: 10,
            },
            billing: BillingConfig {
                enabled: false,
                provider_token: None,
                provider_name: "Sizer Cloud".to_string(),
                currency: "RUB".to_string(),
                prices: PriceList::default(),
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
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
            "openrouter" | "open_router" => Ok(Self::OpenRouter),
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openrouter|openai|ollama)"
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

impl LlmConfig {
    pub fn effective_base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| self.provider.default_base_url())
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("sizer.toml"));
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

        if let Some(telegram) = patch.telegram {
            if let Some(bot_token) = telegram.bot_token {
                self.telegram.bot_token = secret_value(bot_token);
            }
            if let Some(api_base_url) = telegram.api_base_url {
                self.telegram.api_base_url = api_base_url;
            }
            if let Some(poll_timeout_secs) = telegram.poll_timeout_secs {
                self.telegram.poll_timeout_secs = poll_timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
                if llm.base_url.is_none() {
                    self.llm.base_url = None;
                }
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
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(max_tokens) = llm.max_tokens {
                self.llm.max_tokens = max_tokens;
            }
        }

        if let Some(guard) = patch.guard {
            if let Some(enabled) = guard.enabled {
                self.guard.enabled = enabled;
            }
            if let Some(max_quote_count) = guard.max_quote_count {
                self.guard.max_quote_count = max_quote_count;
            }
            if let Some(max_length) = guard.max_length {
                self.guard.max_length = max_length;
            }
            if let Some(max_adjustment_factor) = guard.max_adjustment_factor {
                self.guard.max_adjustment_factor = max_adjustment_factor;
            }
        }

        if let Some(sessions) = patch.sessions {
            if let Some(idle_timeout_secs) = sessions.idle_timeout_secs {
                self.sessions.idle_timeout_secs = idle_timeout_secs;
            }
            if let Some(sweep_interval_secs) = sessions.sweep_interval_secs {
                self.sessions.sweep_interval_secs = sweep_interval_secs;
            }
            if let Some(min_conditions_length) = sessions.min_conditions_length {
                self.sessions.min_conditions_length = min_conditions_length;
            }
        }

        if let Some(billing) = patch.billing {
            if let Some(enabled) = billing.enabled {
                self.billing.enabled = enabled;
            }
            if let Some(provider_token) = billing.provider_token {
                self.billing.provider_token = Some(secret_value(provider_token));
            }
            if let Some(provider_name) = billing.provider_name {
                self.billing.provider_name = provider_name;
            }
            if let Some(currency) = billing.currency {
                self.billing.currency = currency;
            }
            if let Some(prices) = billing.prices {
                prices.apply(&mut self.billing.prices);
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
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
        if let Some(value) = read_env("SIZER_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("SIZER_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("SIZER_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("SIZER_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("SIZER_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("SIZER_TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = secret_value(value);
        }
        if let Some(value) = read_env("SIZER_TELEGRAM_API_BASE_URL") {
            self.telegram.api_base_url = value;
        }
        if let Some(value) = read_env("SIZER_TELEGRAM_POLL_TIMEOUT_SECS") {
            self.telegram.poll_timeout_secs =
                parse_u64("SIZER_TELEGRAM_POLL_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("SIZER_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
            if read_env("SIZER_LLM_BASE_URL").is_none() {
                self.llm.base_url = None;
            }
        }
        if let Some(value) = read_env("SIZER_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("SIZER_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("SIZER_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("SIZER_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("SIZER_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("SIZER_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("SIZER_LLM_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("SIZER_LLM_TEMPERATURE") {
            self.llm.temperature = parse_f64("SIZER_LLM_TEMPERATURE", &value)?;
        }
        if let Some(value) = read_env("SIZER_LLM_MAX_TOKENS") {
            self.llm.max_tokens = parse_u32("SIZER_LLM_MAX_TOKENS", &value)?;
        }

        if let Some(value) = read_env("SIZER_GUARD_ENABLED") {
            self.guard.enabled = parse_bool("SIZER_GUARD_ENABLED", &value)?;
        }
        if let Some(value) = read_env("SIZER_GUARD_MAX_QUOTE_COUNT") {
            self.guard.max_quote_count = parse_usize("SIZER_GUARD_MAX_QUOTE_COUNT", &value)?;
        }
        if let Some(value) = read_env("SIZER_GUARD_MAX_LENGTH") {
            self.guard.max_length = parse_usize("SIZER_GUARD_MAX_LENGTH", &value)?;
        }
        if let Some(value) = read_env("SIZER_GUARD_MAX_ADJUSTMENT_FACTOR") {
            self.guard.max_adjustment_factor =
                parse_f64("SIZER_GUARD_MAX_ADJUSTMENT_FACTOR", &value)?;
        }

        if let Some(value) = read_env("SIZER_SESSIONS_IDLE_TIMEOUT_SECS") {
            self.sessions.idle_timeout_secs =
                parse_u64("SIZER_SESSIONS_IDLE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("SIZER_SESSIONS_SWEEP_INTERVAL_SECS") {
            self.sessions.sweep_interval_secs =
                parse_u64("SIZER_SESSIONS_SWEEP_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("SIZER_SESSIONS_MIN_CONDITIONS_LENGTH") {
            self.sessions.min_conditions_length =
                parse_usize("SIZER_SESSIONS_MIN_CONDITIONS_LENGTH", &value)?;
        }

        if let Some(value) = read_env("SIZER_BILLING_ENABLED") {
            self.billing.enabled = parse_bool("SIZER_BILLING_ENABLED", &value)?;
        }
        if let Some(value) = read_env("SIZER_BILLING_PROVIDER_TOKEN") {
            self.billing.provider_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("SIZER_BILLING_PROVIDER_NAME") {
            self.billing.provider_name = value;
        }
        if let Some(value) = read_env("SIZER_BILLING_CURRENCY") {
            self.billing.currency = value;
        }
        let prices = &mut self.billing.prices;
        for (key, slot) in [
            ("SIZER_BILLING_PRICE_KAFKA_BROKER", &mut prices.kafka_broker),
            ("SIZER_BILLING_PRICE_KAFKA_STORAGE_GB", &mut prices.kafka_storage_gb),
            (
                "SIZER_BILLING_PRICE_KUBERNETES_CONTROL_PLANE_NODE",
                &mut prices.kubernetes_control_plane_node,
            ),
            ("SIZER_BILLING_PRICE_KUBERNETES_WORKER_NODE", &mut prices.kubernetes_worker_node),
            ("SIZER_BILLING_PRICE_REDIS_INSTANCE", &mut prices.redis_instance),
            ("SIZER_BILLING_PRICE_REDIS_RAM_GB", &mut prices.redis_ram_gb),
            ("SIZER_BILLING_PRICE_RABBITMQ_NODE", &mut prices.rabbitmq_node),
            ("SIZER_BILLING_PRICE_RABBITMQ_RAM_GB", &mut prices.rabbitmq_ram_gb),
        ] {
            if let Some(value) = read_env(key) {
                *slot = parse_decimal(key, &value)?;
            }
        }

        if let Some(value) = read_env("SIZER_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("SIZER_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port = parse_u16("SIZER_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("SIZER_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("SIZER_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("SIZER_LOGGING_LEVEL").or_else(|| read_env("SIZER_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format = read_env("SIZER_LOGGING_FORMAT").or_else(|| read_env("SIZER_LOG_FORMAT"));
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
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(bot_token) = overrides.telegram_bot_token {
            self.telegram.bot_token = secret_value(bot_token);
        }
        if let Some(enabled) = overrides.billing_enabled {
            self.billing.enabled = enabled;
        }
        if let Some(provider_token) = overrides.billing_provider_token {
            self.billing.provider_token = Some(secret_value(provider_token));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_telegram(&self.telegram)?;
        validate_llm(&self.llm)?;
        validate_guard(&self.guard)?;
        validate_sessions(&self.sessions)?;
        validate_billing(&self.billing)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("sizer.toml"), PathBuf::from("config/sizer.toml")]
        .into_iter()
        .find(|path| path.exists())
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

fn validate_telegram(telegram: &TelegramConfig) -> Result<(), ConfigError> {
    let token = telegram.bot_token.expose_secret();
    if token.is_empty() {
        return Err(ConfigError::Validation(
            "telegram.bot_token is required. Create a bot with @BotFather and copy the HTTP API token"
                .to_string(),
        ));
    }

    let well_formed = token
        .split_once(':')
        .map(|(id, secret)| {
            !id.is_empty() && id.chars().all(|ch| ch.is_ascii_digit()) && !secret.is_empty()
        })
        .unwrap_or(false);
    if !well_formed {
        return Err(ConfigError::Validation(
            "telegram.bot_token must look like `<bot id>:<secret>` as issued by @BotFather"
                .to_string(),
        ));
    }

    if !telegram.api_base_url.starts_with("http://")
        && !telegram.api_base_url.starts_with("https://")
    {
        return Err(ConfigError::Validation(
            "telegram.api_base_url must start with http:// or https://".to_string(),
        ));
    }

    if telegram.poll_timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "telegram.poll_timeout_secs must be in range 0..=120".to_string(),
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

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    if llm.max_tokens == 0 {
        return Err(ConfigError::Validation(
            "llm.max_tokens must be greater than zero".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    if llm.provider.requires_api_key() {
        let missing = llm
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing {
            return Err(ConfigError::Validation(
                "llm.api_key is required for openrouter/openai providers".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_guard(guard: &GuardConfig) -> Result<(), ConfigError> {
    if guard.max_quote_count == 0 {
        return Err(ConfigError::Validation(
            "guard.max_quote_count must be greater than zero".to_string(),
        ));
    }

    if guard.max_length == 0 {
        return Err(ConfigError::Validation(
            "guard.max_length must be greater than zero".to_string(),
        ));
    }

    if !guard.max_adjustment_factor.is_finite() || guard.max_adjustment_factor <= 1.0 {
        return Err(ConfigError::Validation(
            "guard.max_adjustment_factor must be a finite number greater than 1.0".to_string(),
        ));
    }

    Ok(())
}

fn validate_sessions(sessions: &SessionConfig) -> Result<(), ConfigError> {
    if sessions.idle_timeout_secs == 0 || sessions.idle_timeout_secs > MAX_IDLE_TIMEOUT_SECS {
        return Err(ConfigError::Validation(format!(
            "sessions.idle_timeout_secs must be in range 1..={MAX_IDLE_TIMEOUT_SECS}"
        )));
    }

    if sessions.sweep_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "sessions.sweep_interval_secs must be greater than zero".to_string(),
        ));
    }

    if sessions.min_conditions_length > 500 {
        return Err(ConfigError::Validation(
            "sessions.min_conditions_length must be at most 500".to_string(),
        ));
    }

    Ok(())
}

fn validate_billing(billing: &BillingConfig) -> Result<(), ConfigError> {
    let currency = billing.currency.trim();
    if currency.len() != 3 || !currency.chars().all(|ch| ch.is_ascii_uppercase()) {
        return Err(ConfigError::Validation(
            "billing.currency must be a three-letter ISO code such as `RUB`".to_string(),
        ));
    }

    let prices = &billing.prices;
    let negative = [
        prices.kafka_broker,
        prices.kafka_storage_gb,
        prices.kubernetes_control_plane_node,
        prices.kubernetes_worker_node,
        prices.redis_instance,
        prices.redis_ram_gb,
        prices.rabbitmq_node,
        prices.rabbitmq_ram_gb,
    ]
    .iter()
    .any(|price| price.is_sign_negative());
    if negative {
        return Err(ConfigError::Validation(
            "billing.prices must not contain negative values".to_string(),
        ));
    }

    if billing.enabled {
        let missing = billing
            .provider_token
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing {
            return Err(ConfigError::Validation(
                "billing.provider_token is required when billing.enabled is true. Get it from @BotFather > Payments"
                    .to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
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

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| invalid(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| invalid(key, value))
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value.parse::<f64>().map_err(|_| invalid(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| invalid(key, value))
}

fn parse_decimal(key: &str, value: &str) -> Result<Decimal, ConfigError> {
    value.trim().parse::<Decimal>().map_err(|_| invalid(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    telegram: Option<TelegramPatch>,
    llm: Option<LlmPatch>,
    guard: Option<GuardPatch>,
    sessions: Option<SessionsPatch>,
    billing: Option<BillingPatch>,
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
struct TelegramPatch {
    bot_token: Option<String>,
    api_base_url: Option<String>,
    poll_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct GuardPatch {
    enabled: Option<bool>,
    max_quote_count: Option<usize>,
    max_length: Option<usize>,
    max_adjustment_factor: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionsPatch {
    idle_timeout_secs: Option<u64>,
    sweep_interval_secs: Option<u64>,
    min_conditions_length: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct BillingPatch {
    enabled: Option<bool>,
    provider_token: Option<String>,
    provider_name: Option<String>,
    currency: Option<String>,
    prices: Option<PricesPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct PricesPatch {
    kafka_broker: Option<Decimal>,
    kafka_storage_gb: Option<Decimal>,
    kubernetes_control_plane_node: Option<Decimal>,
    kubernetes_worker_node: Option<Decimal>,
    redis_instance: Option<Decimal>,
    redis_ram_gb: Option<Decimal>,
    rabbitmq_node: Option<Decimal>,
    rabbitmq_ram_gb: Option<Decimal>,
}

impl PricesPatch {
    fn apply(self, prices: &mut PriceList) {
        let pairs = [
            (self.kafka_broker, &mut prices.kafka_broker),
            (self.kafka_storage_gb, &mut prices.kafka_storage_gb),
            (self.kubernetes_control_plane_node, &mut prices.kubernetes_control_plane_node),
            (self.kubernetes_worker_node, &mut prices.kubernetes_worker_node),
            (self.redis_instance, &mut prices.redis_instance),
            (self.redis_ram_gb, &mut prices.redis_ram_gb),
            (self.rabbitmq_node, &mut prices.rabbitmq_node),
            (self.rabbitmq_ram_gb, &mut prices.rabbitmq_ram_gb),
        ];
        for (value, slot) in pairs {
            if let Some(value) = value {
                *slot = value;
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
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

    use rust_decimal::Decimal;
    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    const TOKEN: &str = "123456:test-token";

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
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_SIZER_BOT_TOKEN", "987:from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("sizer.toml");
            fs::write(
                &path,
                r#"
[telegram]
bot_token = "${TEST_SIZER_BOT_TOKEN}"

[guard]
max_quote_count = 20

[billing.prices]
kafka_broker = 20000
redis_ram_gb = "512.50"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.telegram.bot_token.expose_secret() == "987:from-env",
                "bot token should be loaded from environment",
            )?;
            ensure(config.guard.max_quote_count == 20, "guard section should be applied")?;
            ensure(
                config.billing.prices.kafka_broker == Decimal::new(20_000, 0),
                "integer prices should parse",
            )?;
            ensure(
                config.billing.prices.redis_ram_gb == Decimal::new(51_250, 2),
                "string prices should parse",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_SIZER_BOT_TOKEN"]);
        result
    }

    #[test]
    fn defaults_match_documented_thresholds() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("SIZER_TELEGRAM_BOT_TOKEN", TOKEN);

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.guard.enabled, "guard is on by default")?;
            ensure(config.guard.max_quote_count == 15, "quote threshold defaults to 15")?;
            ensure(config.guard.max_length == 2000, "length threshold defaults to 2000")?;
            ensure(
                config.guard.max_adjustment_factor == 10.0,
                "adjustment factor defaults to 10",
            )?;
            ensure(config.sessions.idle_timeout_secs == 3600, "sessions idle out after an hour")?;
            ensure(config.sessions.min_conditions_length == 10, "conditions need 10 chars")?;
            ensure(!config.billing.enabled, "billing is opt-in")?;
            ensure(config.billing.currency == "RUB", "billing currency defaults to RUB")?;
            ensure(
                config.llm.effective_base_url() == "http://localhost:11434/v1",
                "ollama base url is the default",
            )?;
            Ok(())
        })();

        clear_vars(&["SIZER_TELEGRAM_BOT_TOKEN"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("SIZER_TELEGRAM_BOT_TOKEN", TOKEN);
        env::set_var("SIZER_LOG_LEVEL", "warn");
        env::set_var("SIZER_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Json),
                "json logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["SIZER_TELEGRAM_BOT_TOKEN", "SIZER_LOG_LEVEL", "SIZER_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("SIZER_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("SIZER_TELEGRAM_BOT_TOKEN", "222:from-env");
        env::set_var("SIZER_GUARD_MAX_ADJUSTMENT_FACTOR", "5");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("sizer.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[telegram]
bot_token = "111:from-file"

[guard]
max_adjustment_factor = 3.0

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
            ensure(
                config.telegram.bot_token.expose_secret() == "222:from-env",
                "env bot token should win over file and defaults",
            )?;
            ensure(
                config.guard.max_adjustment_factor == 5.0,
                "env adjustment factor should win over file",
            )?;
            Ok(())
        })();

        clear_vars(&[
            "SIZER_DATABASE_URL",
            "SIZER_TELEGRAM_BOT_TOKEN",
            "SIZER_GUARD_MAX_ADJUSTMENT_FACTOR",
        ]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("SIZER_TELEGRAM_BOT_TOKEN", "not-a-token");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("telegram.bot_token")
            );
            ensure(has_message, "validation failure should mention telegram.bot_token")
        })();

        clear_vars(&["SIZER_TELEGRAM_BOT_TOKEN"]);
        result
    }

    #[test]
    fn hosted_llm_providers_require_an_api_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("SIZER_TELEGRAM_BOT_TOKEN", TOKEN);

        let result = (|| -> Result<(), String> {
            let error = AppConfig::load(LoadOptions {
                overrides: ConfigOverrides {
                    llm_provider: Some(LlmProvider::OpenRouter),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .err()
            .ok_or_else(|| "openrouter without a key must fail".to_string())?;

            ensure(
                matches!(error, ConfigError::Validation(ref message) if message.contains("llm.api_key")),
                "validation failure should mention llm.api_key",
            )
        })();

        clear_vars(&["SIZER_TELEGRAM_BOT_TOKEN"]);
        result
    }

    #[test]
    fn billing_requires_provider_token_when_enabled() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("SIZER_TELEGRAM_BOT_TOKEN", TOKEN);
        env::set_var("SIZER_BILLING_ENABLED", "true");

        let result = (|| -> Result<(), String> {
            let error = AppConfig::load(LoadOptions::default())
                .err()
                .ok_or_else(|| "billing without token must fail".to_string())?;
            ensure(
                matches!(error, ConfigError::Validation(ref message) if message.contains("billing.provider_token")),
                "validation failure should mention billing.provider_token",
            )?;

            let config = AppConfig::load(LoadOptions {
                overrides: ConfigOverrides {
                    billing_provider_token: Some("381764678:TEST:provider".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;
            ensure(config.billing.enabled, "billing should be enabled from env")
        })();

        clear_vars(&["SIZER_TELEGRAM_BOT_TOKEN", "SIZER_BILLING_ENABLED"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("SIZER_TELEGRAM_BOT_TOKEN", "555:super-secret-value");
        env::set_var("SIZER_LLM_API_KEY", "sk-secret-llm-key");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("super-secret-value"),
                "debug output should not contain bot token",
            )?;
            ensure(!debug.contains("sk-secret-llm-key"), "debug output should not contain api key")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["SIZER_TELEGRAM_BOT_TOKEN", "SIZER_LLM_API_KEY"]);
        result
    }
}
