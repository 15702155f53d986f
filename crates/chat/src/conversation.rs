use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sizer_agent::runtime::{AdjustmentStatus, AgentRuntime, Persisted};
use sizer_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use sizer_core::errors::{ApplicationError, ErrorClass};
use sizer_core::flows::{input, RetreatOutcome, CONDITIONS_STAGE, ScreenRef, SessionState, SessionStore};
use sizer_core::{ChatId, FlowKind, SessionKey};
use sizer_db::repositories::{CalculationRepository, UserRepository};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, warn};

use crate::alerts::AdminAlerts;
use crate::blocks::MessageTemplate;
use crate::callbacks::CallbackAction;
use crate::cards;
use crate::channel::MessagingChannel;
use crate::commands::{parse_command, MenuCommand};
use crate::events::{
    CallbackQuery, ChatEvent, ChatEventType, EventContext, EventHandler, EventHandlerError,
    HandlerResult, IncomingMessage, Sender, Update,
};
use crate::locale::Phrase;
use crate::payments::PaymentDesk;
use crate::screens;

pub const STALE_STEP: &str = "Этот шаг уже пройден.";
pub const SESSION_EXPIRED: &str = "Сессия истекла. Выберите сервис в меню.";
pub const UNKNOWN_ACTION: &str = "Неизвестное действие.";
pub const BLOCKED_TOAST: &str = "⛔ Аккаунт заблокирован.";
pub const NOT_SAVED: &str =
    "⚠️ Расчёт не удалось сохранить, оплата недоступна. Администраторы уведомлены.";

#[derive(Clone, Debug)]
pub struct ConversationSettings {
    pub history_limit: u32,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self { history_limit: 5 }
    }
}

/// Collaborators of the conversation service.
pub struct ConversationServices {
    pub runtime: Arc<AgentRuntime>,
    pub sessions: Arc<dyn SessionStore>,
    pub users: Arc<dyn UserRepository>,
    pub calculations: Arc<dyn CalculationRepository>,
    pub messaging: Arc<dyn MessagingChannel>,
    pub payments: PaymentDesk,
    pub alerts: AdminAlerts,
    pub audit: Arc<dyn AuditSink>,
}

/// One async mutex per session so updates for the same (user, chat) never interleave.
#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<SessionKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionLocks {
    fn with_map<T>(&self, apply: impl FnOnce(&mut HashMap<SessionKey, Arc<tokio::sync::Mutex<()>>>) -> T) -> T {
        match self.locks.lock() {
            Ok(mut map) => apply(&mut map),
            Err(poisoned) => apply(&mut poisoned.into_inner()),
        }
    }

    pub async fn acquire(&self, key: SessionKey) -> OwnedMutexGuard<()> {
        let lock = self.with_map(|map| Arc::clone(map.entry(key).or_default()));
        lock.lock_owned().await
    }

    /// Forgets locks nobody holds or waits for.
    pub fn prune(&self) -> usize {
        self.with_map(|map| {
            let before = map.len();
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            before - map.len()
        })
    }

    pub fn len(&self) -> usize {
        self.with_map(|map| map.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drives the parameter dialog: commands, step answers, inline buttons and the
/// conditions stage that hands over to the sizing runtime.
pub struct ConversationService {
    services: ConversationServices,
    settings: ConversationSettings,
    locks: SessionLocks,
}

impl ConversationService {
    pub fn new(services: ConversationServices, settings: ConversationSettings) -> Self {
        Self { services, settings, locks: SessionLocks::default() }
    }

    pub fn prune_locks(&self) -> usize {
        self.locks.prune()
    }

    fn min_conditions_length(&self) -> usize {
        self.services.runtime.engine().min_conditions_length()
    }

    fn audit_context(&self, ctx: &EventContext, key: SessionKey, flow: Option<FlowKind>) -> AuditContext {
        AuditContext::new(Some(key), flow, &ctx.correlation_id, "conversation")
    }

    async fn send(&self, chat: ChatId, message: &MessageTemplate) -> Result<ScreenRef, EventHandlerError> {
        Ok(self.services.messaging.send(chat, message).await?)
    }

    async fn delete_quietly(&self, ctx: &EventContext, chat: ChatId, target: ScreenRef) {
        if let Err(delete_error) = self.services.messaging.delete(chat, target).await {
            debug!(
                event_name = "chat.delete_failed",
                correlation_id = %ctx.correlation_id,
                message_id = target.0,
                error = %delete_error,
            );
        }
    }

    /// Removes the previous screen and sends `message` as the new one.
    async fn replace_screen(
        &self,
        ctx: &EventContext,
        chat: ChatId,
        session: &mut SessionState,
        message: &MessageTemplate,
    ) -> Result<(), EventHandlerError> {
        if let Some(previous) = session.last_screen.take() {
            self.delete_quietly(ctx, chat, previous).await;
        }
        session.last_screen = Some(self.send(chat, message).await?);
        Ok(())
    }

    /// Rewrites `target` in place, falling back to a fresh message when it can't be edited.
    async fn edit_screen(
        &self,
        ctx: &EventContext,
        chat: ChatId,
        session: &mut SessionState,
        target: ScreenRef,
        message: &MessageTemplate,
    ) -> Result<(), EventHandlerError> {
        if let Some(previous) = session.last_screen {
            if previous != target {
                self.delete_quietly(ctx, chat, previous).await;
            }
        }
        match self.services.messaging.edit(chat, target, message).await {
            Ok(()) => session.last_screen = Some(target),
            Err(edit_error) => {
                debug!(
                    event_name = "chat.edit_failed",
                    correlation_id = %ctx.correlation_id,
                    message_id = target.0,
                    error = %edit_error,
                );
                session.last_screen = Some(self.send(chat, message).await?);
            }
        }
        Ok(())
    }

    async fn is_banned(&self, sender: &Sender) -> Result<bool, EventHandlerError> {
        Ok(self.services.users.is_banned(sender.user_id).await?)
    }

    async fn on_message(
        &self,
        ctx: &EventContext,
        message: &IncomingMessage,
    ) -> Result<HandlerResult, EventHandlerError> {
        let key = SessionKey::new(message.from.user_id, message.chat_id);
        let _guard = self.locks.acquire(key).await;

        if self.is_banned(&message.from).await? {
            self.send(message.chat_id, &screens::blocked()).await?;
            return Ok(HandlerResult::Blocked);
        }

        if let Some(command) = parse_command(&message.text) {
            return self.on_command(ctx, key, &message.from, command).await;
        }

        match self.services.sessions.load(&key).await? {
            Some(session) => self.on_answer(ctx, key, message, session).await,
            None => {
                self.send(message.chat_id, &screens::unknown_command()).await?;
                Ok(HandlerResult::Processed)
            }
        }
    }

    async fn on_command(
        &self,
        ctx: &EventContext,
        key: SessionKey,
        sender: &Sender,
        command: MenuCommand,
    ) -> Result<HandlerResult, EventHandlerError> {
        let chat = key.chat_id;
        match command {
            MenuCommand::Start => {
                if let Err(upsert_error) = self.services.users.upsert_profile(&sender.profile()).await {
                    warn!(
                        event_name = "user.upsert_failed",
                        correlation_id = %ctx.correlation_id,
                        user_id = %sender.user_id,
                        error = %upsert_error,
                    );
                }
                self.discard_session(ctx, key, "start").await?;
                self.send(chat, &screens::greeting(sender.language())).await?;
            }
            MenuCommand::Help => {
                self.send(chat, &screens::help()).await?;
            }
            MenuCommand::Menu => {
                self.send(chat, &screens::menu()).await?;
            }
            MenuCommand::Cancel => {
                self.discard_session(ctx, key, "cancel").await?;
                self.send(chat, &screens::cancelled()).await?;
            }
            MenuCommand::StartFlow(flow) => {
                self.start_flow(ctx, key, sender, flow).await?;
            }
            MenuCommand::CalculationHistory => {
                let records = self
                    .services
                    .calculations
                    .load_history(sender.user_id, self.settings.history_limit)
                    .await?;
                self.send(chat, &cards::calculation_history(&records)).await?;
            }
            MenuCommand::PaymentHistory => {
                let history =
                    self.services.payments.history(sender.user_id, self.settings.history_limit).await?;
                self.send(chat, &history).await?;
            }
        }
        Ok(HandlerResult::Processed)
    }

    /// Drops any session for `key` together with its on-screen keyboard. Idempotent.
    async fn discard_session(
        &self,
        ctx: &EventContext,
        key: SessionKey,
        reason: &str,
    ) -> Result<(), EventHandlerError> {
        let Some(session) = self.services.sessions.load(&key).await? else {
            return Ok(());
        };
        if let Some(screen) = session.last_screen {
            self.delete_quietly(ctx, key.chat_id, screen).await;
        }
        self.services.sessions.remove(&key).await?;
        info!(
            event_name = "flow.discarded",
            correlation_id = %ctx.correlation_id,
            session = %key,
            flow = %session.flow,
            reason,
        );
        self.services.audit.emit(
            AuditEvent::new(
                &self.audit_context(ctx, key, Some(session.flow)),
                "flow.discarded",
                AuditCategory::Flow,
                AuditOutcome::Success,
            )
            .with_metadata("reason", reason),
        );
        Ok(())
    }

    async fn start_flow(
        &self,
        ctx: &EventContext,
        key: SessionKey,
        sender: &Sender,
        flow: FlowKind,
    ) -> Result<(), EventHandlerError> {
        let engine = self.services.runtime.engine();
        let (mut session, screen) = engine.start(flow)?;
        if let Some(previous) = self.services.sessions.load(&key).await? {
            session.last_screen = previous.last_screen;
        }

        let message = screens::render_screen(&screen, self.min_conditions_length(), sender.language());
        self.replace_screen(ctx, key.chat_id, &mut session, &message).await?;
        self.services.sessions.save(&key, session).await?;

        info!(
            event_name = "flow.started",
            correlation_id = %ctx.correlation_id,
            session = %key,
            flow = %flow,
            "parameter dialog started"
        );
        self.services.audit.emit(AuditEvent::new(
            &self.audit_context(ctx, key, Some(flow)),
            "flow.started",
            AuditCategory::Flow,
            AuditOutcome::Success,
        ));
        Ok(())
    }

    async fn on_answer(
        &self,
        ctx: &EventContext,
        key: SessionKey,
        message: &IncomingMessage,
        mut session: SessionState,
    ) -> Result<HandlerResult, EventHandlerError> {
        if session.is_at_conditions() {
            return self.finish(ctx, key, &message.from, session, Some(&message.text)).await;
        }

        let engine = self.services.runtime.engine();
        let parameter = engine.expected_parameter(&session)?;
        match input::parse(parameter, &message.text) {
            Ok(value) => {
                let audit = self.audit_context(ctx, key, Some(session.flow));
                let screen = engine.advance_with_audit(
                    &mut session,
                    parameter.name,
                    value,
                    self.services.audit.as_ref(),
                    &audit,
                )?;
                let rendered = screens::render_screen(
                    &screen,
                    self.min_conditions_length(),
                    message.from.language(),
                );
                self.replace_screen(ctx, key.chat_id, &mut session, &rendered).await?;
                self.services.sessions.save(&key, session).await?;
            }
            Err(validation_error) => {
                debug!(
                    event_name = "flow.validation_failed",
                    correlation_id = %ctx.correlation_id,
                    session = %key,
                    parameter = parameter.name,
                    error = %validation_error,
                );
                self.send(key.chat_id, &screens::validation_error(&validation_error)).await?;
            }
        }
        Ok(HandlerResult::Processed)
    }

    async fn on_callback(
        &self,
        ctx: &EventContext,
        callback: &CallbackQuery,
    ) -> Result<HandlerResult, EventHandlerError> {
        let key = SessionKey::new(callback.from.user_id, callback.chat_id);
        let _guard = self.locks.acquire(key).await;
        let messaging = &self.services.messaging;

        if self.is_banned(&callback.from).await? {
            messaging.answer_callback(&callback.id, Some(BLOCKED_TOAST)).await?;
            return Ok(HandlerResult::Blocked);
        }

        let action = match CallbackAction::parse(&callback.data) {
            Ok(action) => action,
            Err(parse_error) => {
                warn!(
                    event_name = "chat.callback_rejected",
                    correlation_id = %ctx.correlation_id,
                    data = %callback.data,
                    error = %parse_error,
                );
                messaging.answer_callback(&callback.id, Some(UNKNOWN_ACTION)).await?;
                return Ok(HandlerResult::Ignored);
            }
        };

        if let CallbackAction::Pay { calculation_id } = action {
            return self.services.payments.request(ctx, callback, calculation_id).await;
        }

        let Some(mut session) = self.services.sessions.load(&key).await? else {
            if let Err(clear_error) = messaging.clear_keyboard(callback.chat_id, callback.message_id).await {
                debug!(event_name = "chat.clear_failed", error = %clear_error);
            }
            messaging.answer_callback(&callback.id, Some(SESSION_EXPIRED)).await?;
            return Ok(HandlerResult::Processed);
        };

        let expected_stage = match &action {
            CallbackAction::Pick { parameter, .. }
            | CallbackAction::Custom { parameter }
            | CallbackAction::Retry { parameter } => parameter.as_str(),
            CallbackAction::Back { from } => from.as_str(),
            CallbackAction::SkipConditions
            | CallbackAction::CustomConditions
            | CallbackAction::Pay { .. } => CONDITIONS_STAGE,
        };
        if session.cursor.label() != expected_stage {
            debug!(
                event_name = "flow.stale_callback",
                correlation_id = %ctx.correlation_id,
                session = %key,
                expected = session.cursor.label(),
                received = expected_stage,
            );
            messaging.answer_callback(&callback.id, Some(STALE_STEP)).await?;
            let screen = self.services.runtime.engine().current_screen(&session)?;
            let rendered =
                screens::render_screen(&screen, self.min_conditions_length(), callback.from.language());
            self.edit_screen(ctx, callback.chat_id, &mut session, callback.message_id, &rendered)
                .await?;
            self.services.sessions.save(&key, session).await?;
            return Ok(HandlerResult::Processed);
        }

        let engine = self.services.runtime.engine();
        let language = callback.from.language();
        let chat = callback.chat_id;
        let mut toast: Option<String> = None;

        match action {
            CallbackAction::Pick { parameter, raw } => {
                let spec = engine.expected_parameter(&session)?;
                match input::parse(spec, &raw) {
                    Ok(value) => {
                        let audit = self.audit_context(ctx, key, Some(session.flow));
                        let screen = engine.advance_with_audit(
                            &mut session,
                            &parameter,
                            value,
                            self.services.audit.as_ref(),
                            &audit,
                        )?;
                        let rendered =
                            screens::render_screen(&screen, self.min_conditions_length(), language);
                        self.edit_screen(ctx, chat, &mut session, callback.message_id, &rendered)
                            .await?;
                        self.services.sessions.save(&key, session).await?;
                    }
                    Err(validation_error) => toast = Some(validation_error.hint()),
                }
            }
            CallbackAction::Custom { .. } => {
                let spec = engine.expected_parameter(&session)?;
                let prompt = screens::custom_value_prompt(spec);
                self.edit_screen(ctx, chat, &mut session, callback.message_id, &prompt).await?;
                self.services.sessions.save(&key, session).await?;
            }
            CallbackAction::Retry { .. } => {
                let screen = engine.current_screen(&session)?;
                let rendered = screens::render_screen(&screen, self.min_conditions_length(), language);
                self.edit_screen(ctx, chat, &mut session, callback.message_id, &rendered).await?;
                self.services.sessions.save(&key, session).await?;
            }
            CallbackAction::Back { .. } => match engine.retreat(&mut session)? {
                RetreatOutcome::Screen(screen) => {
                    let rendered =
                        screens::render_screen(&screen, self.min_conditions_length(), language);
                    self.edit_screen(ctx, chat, &mut session, callback.message_id, &rendered)
                        .await?;
                    self.services.sessions.save(&key, session).await?;
                }
                RetreatOutcome::FlowExit => {
                    self.services.sessions.remove(&key).await?;
                    self.delete_quietly(ctx, chat, callback.message_id).await;
                    info!(
                        event_name = "flow.exited",
                        correlation_id = %ctx.correlation_id,
                        session = %key,
                        flow = %session.flow,
                    );
                    self.send(chat, &screens::menu()).await?;
                }
            },
            CallbackAction::CustomConditions => {
                engine.enter_conditions(&mut session)?;
                let prompt = screens::custom_conditions_prompt(self.min_conditions_length(), language);
                self.edit_screen(ctx, chat, &mut session, callback.message_id, &prompt).await?;
                self.services.sessions.save(&key, session).await?;
            }
            CallbackAction::SkipConditions => {
                messaging.answer_callback(&callback.id, None).await?;
                session.last_screen = Some(callback.message_id);
                return self.finish(ctx, key, &callback.from, session, None).await;
            }
            CallbackAction::Pay { .. } => {}
        }

        messaging.answer_callback(&callback.id, toast.as_deref()).await?;
        Ok(HandlerResult::Processed)
    }

    /// Closes the conditions stage: guard, formulas, optional adjustment, persistence,
    /// result card and payment offer.
    async fn finish(
        &self,
        ctx: &EventContext,
        key: SessionKey,
        sender: &Sender,
        session: SessionState,
        conditions: Option<&str>,
    ) -> Result<HandlerResult, EventHandlerError> {
        let chat = key.chat_id;
        let language = sender.language();
        let audit = self.audit_context(ctx, key, Some(session.flow));
        let runtime = &self.services.runtime;

        let prepared = match runtime.prepare(&audit, sender.user_id, &session, conditions).await {
            Ok(prepared) => prepared,
            Err(ApplicationError::SecurityViolation { .. }) => {
                if let Some(screen) = session.last_screen {
                    self.delete_quietly(ctx, chat, screen).await;
                }
                self.services.sessions.remove(&key).await?;
                self.send(chat, &screens::injection_detected(language)).await?;
                return Ok(HandlerResult::Blocked);
            }
            Err(rejected) if rejected.class() == ErrorClass::UserInput => {
                self.send(chat, &screens::conditions_too_short(self.min_conditions_length(), language))
                    .await?;
                return Ok(HandlerResult::Processed);
            }
            Err(other) => return Err(other.into()),
        };

        if let Some(screen) = session.last_screen {
            self.delete_quietly(ctx, chat, screen).await;
        }
        if prepared.wants_adjustment() {
            self.send(chat, &screens::notice(language, Phrase::Analysing)).await?;
        }

        let flow = session.flow;
        let outcome = runtime.calculate(&audit, prepared).await;
        self.services.sessions.remove(&key).await?;
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(failure) => {
                error!(
                    event_name = "calculation.failed",
                    correlation_id = %ctx.correlation_id,
                    session = %key,
                    flow = %flow,
                    error = %failure,
                );
                let interface = failure.into_interface(&ctx.correlation_id);
                self.send(chat, &screens::main_menu(interface.user_message())).await?;
                return Ok(HandlerResult::Processed);
            }
        };

        if matches!(outcome.adjustment, AdjustmentStatus::Degraded(_)) {
            self.send(chat, &screens::notice(language, Phrase::AdjustmentFailed)).await?;
        }
        let comment = match &outcome.adjustment {
            AdjustmentStatus::Applied { comment } => Some(comment.as_str()),
            _ => None,
        };
        self.send(chat, &cards::result_card(flow, &outcome.calculation.result, comment)).await?;

        match &outcome.persisted {
            Persisted::Saved(record) => {
                self.services.payments.offer(chat, record).await?;
            }
            Persisted::Failed(reason) => {
                self.services
                    .alerts
                    .notify(
                        ctx,
                        &format!(
                            "Не удалось сохранить расчёт {flow} пользователя {}: {reason}",
                            sender.user_id
                        ),
                    )
                    .await;
                self.send(chat, &MessageTemplate::plain(NOT_SAVED)).await?;
            }
        }
        Ok(HandlerResult::Processed)
    }
}

#[async_trait]
impl EventHandler for ConversationService {
    fn event_types(&self) -> &'static [ChatEventType] {
        &[
            ChatEventType::Message,
            ChatEventType::Callback,
            ChatEventType::PreCheckout,
            ChatEventType::SuccessfulPayment,
        ]
    }

    async fn handle(
        &self,
        update: &Update,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        match &update.event {
            ChatEvent::Message(message) => self.on_message(ctx, message).await,
            ChatEvent::Callback(callback) => self.on_callback(ctx, callback).await,
            ChatEvent::PreCheckout(query) => {
                let banned = self.is_banned(&query.from).await?;
                self.services.payments.pre_checkout(ctx, query, banned).await
            }
            // Money has already moved; settle even for banned senders.
            ChatEvent::SuccessfulPayment(payment) => self.services.payments.settle(ctx, payment).await,
            ChatEvent::Unsupported { .. } => Ok(HandlerResult::Ignored),
        }
    }
}
