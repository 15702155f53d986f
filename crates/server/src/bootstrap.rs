use std::sync::Arc;
use std::time::Duration;

use sizer_agent::{
    AdjustmentValidator, AgentRuntime, ChatCompletionsClient, InjectionGuard, LlmAdjustmentModel,
};
use sizer_chat::alerts::AdminAlerts;
use sizer_chat::channel::ChannelError;
use sizer_chat::payments::{BillingSettings, PaymentDesk};
use sizer_chat::telegram::TelegramClient;
use sizer_chat::{
    ConversationService, ConversationServices, ConversationSettings, EventDispatcher,
    PollingRunner, ReconnectPolicy,
};
use sizer_core::audit::AuditSink;
use sizer_core::config::{AppConfig, ConfigError, LoadOptions};
use sizer_core::flows::schema::SchemaError;
use sizer_core::flows::{schema_for, FlowEngine, SessionStore};
use sizer_core::{FlowKind, StandardFormulas};
use sizer_db::repositories::{
    SqlCalculationRepository, SqlPaymentRepository, SqlSessionStore, SqlUserRepository,
};
use sizer_db::{connect_with_settings, migrations, DbPool};
use thiserror::Error;
use tracing::{info, warn};

use crate::audit::TracingAuditSink;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub sessions: Arc<dyn SessionStore>,
    pub conversation: Arc<ConversationService>,
    pub runner: PollingRunner,
    pub adjustment_enabled: bool,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("flow schema is invalid: {0}")]
    Schema(#[from] SchemaError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("bot api client could not be built: {0}")]
    Channel(#[from] ChannelError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    validate_schemas()?;

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
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

    let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
    let calculations = Arc::new(SqlCalculationRepository::new(db_pool.clone()));
    let payments = Arc::new(SqlPaymentRepository::new(db_pool.clone()));
    let users = Arc::new(SqlUserRepository::new(db_pool.clone()));
    let sessions: Arc<dyn SessionStore> = Arc::new(SqlSessionStore::new(db_pool.clone()));

    let mut runtime = AgentRuntime::new(
        Arc::new(StandardFormulas),
        calculations.clone(),
        users.clone(),
        Arc::clone(&audit),
    )
    .with_engine(FlowEngine::new(config.sessions.min_conditions_length))
    .with_guard(InjectionGuard::from_config(&config.guard))
    .with_validator(AdjustmentValidator::new(config.guard.max_adjustment_factor));

    match ChatCompletionsClient::from_config(&config.llm) {
        Ok(client) => {
            info!(
                event_name = "system.bootstrap.llm_ready",
                correlation_id = "bootstrap",
                endpoint = client.endpoint(),
                model = %config.llm.model,
                "adjustment model configured"
            );
            let model = LlmAdjustmentModel::new(
                Arc::new(client),
                Duration::from_secs(config.llm.timeout_secs),
            );
            runtime = runtime.with_model(Arc::new(model));
        }
        Err(error) => warn!(
            event_name = "system.bootstrap.llm_unavailable",
            correlation_id = "bootstrap",
            error = %error,
            "adjustment model disabled; base results only"
        ),
    }
    let adjustment_enabled = runtime.has_model();

    let telegram = Arc::new(TelegramClient::from_config(&config.telegram, &config.billing)?);
    let alerts = AdminAlerts::new(users.clone(), telegram.clone());
    let desk = PaymentDesk::new(
        calculations.clone(),
        payments,
        telegram.clone(),
        telegram.clone(),
        alerts.clone(),
        Arc::clone(&audit),
        BillingSettings::from_config(&config.billing),
    );
    let conversation = Arc::new(ConversationService::new(
        ConversationServices {
            runtime: Arc::new(runtime),
            sessions: Arc::clone(&sessions),
            users,
            calculations,
            messaging: telegram.clone(),
            payments: desk,
            alerts,
            audit,
        },
        ConversationSettings::default(),
    ));

    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(conversation.clone());
    let runner = PollingRunner::new(telegram, Arc::new(dispatcher), ReconnectPolicy::default());

    Ok(Application { config, db_pool, sessions, conversation, runner, adjustment_enabled })
}

/// Every flow must declare parameters with unique names and orders before the bot serves it.
pub fn validate_schemas() -> Result<(), SchemaError> {
    for flow in FlowKind::ALL {
        schema_for(flow).validate()?;
    }
    Ok(())
}
