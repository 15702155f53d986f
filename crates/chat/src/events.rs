use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use sizer_core::errors::ApplicationError;
use sizer_core::flows::{FlowError, ScreenRef, SessionStoreError};
use sizer_core::{ChatId, SessionKey, UserId, UserProfile};
use sizer_db::repositories::RepositoryError;
use thiserror::Error;

use crate::channel::ChannelError;
use crate::locale::Language;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Update {
    pub update_id: i64,
    pub event: ChatEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatEvent {
    Message(IncomingMessage),
    Callback(CallbackQuery),
    PreCheckout(PreCheckoutQuery),
    SuccessfulPayment(SuccessfulPayment),
    Unsupported { kind: String },
}

impl ChatEvent {
    pub fn event_type(&self) -> ChatEventType {
        match self {
            Self::Message(_) => ChatEventType::Message,
            Self::Callback(_) => ChatEventType::Callback,
            Self::PreCheckout(_) => ChatEventType::PreCheckout,
            Self::SuccessfulPayment(_) => ChatEventType::SuccessfulPayment,
            Self::Unsupported { .. } => ChatEventType::Unsupported,
        }
    }

    pub fn sender(&self) -> Option<&Sender> {
        match self {
            Self::Message(event) => Some(&event.from),
            Self::Callback(event) => Some(&event.from),
            Self::PreCheckout(event) => Some(&event.from),
            Self::SuccessfulPayment(event) => Some(&event.from),
            Self::Unsupported { .. } => None,
        }
    }

    pub fn session_key(&self) -> Option<SessionKey> {
        let chat_id = match self {
            Self::Message(event) => event.chat_id,
            Self::Callback(event) => event.chat_id,
            Self::SuccessfulPayment(event) => event.chat_id,
            Self::PreCheckout(_) | Self::Unsupported { .. } => return None,
        };
        self.sender().map(|sender| SessionKey::new(sender.user_id, chat_id))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChatEventType {
    Message,
    Callback,
    PreCheckout,
    SuccessfulPayment,
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sender {
    pub user_id: UserId,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub language_code: Option<String>,
}

impl Sender {
    pub fn new(user_id: UserId, first_name: impl Into<String>) -> Self {
        Self {
            user_id,
            first_name: first_name.into(),
            last_name: None,
            username: None,
            language_code: None,
        }
    }

    pub fn full_name(&self) -> String {
        match &self.last_name {
            Some(last_name) => format!("{} {last_name}", self.first_name),
            None => self.first_name.clone(),
        }
    }

    pub fn language(&self) -> Language {
        Language::from_code(self.language_code.as_deref())
    }

    pub fn profile(&self) -> UserProfile {
        let mut profile = UserProfile::new(self.user_id, self.full_name());
        profile.username = self.username.clone();
        profile.language_code = self.language_code.clone();
        profile
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncomingMessage {
    pub chat_id: ChatId,
    pub message_id: ScreenRef,
    pub from: Sender,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallbackQuery {
    pub id: String,
    pub chat_id: ChatId,
    /// The message carrying the pressed button.
    pub message_id: ScreenRef,
    pub from: Sender,
    pub data: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreCheckoutQuery {
    pub id: String,
    pub from: Sender,
    pub currency: String,
    pub total_amount: i64,
    pub payload: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SuccessfulPayment {
    pub chat_id: ChatId,
    pub from: Sender,
    pub currency: String,
    pub total_amount: i64,
    pub payload: String,
    pub provider_charge_id: String,
    pub channel_charge_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl EventContext {
    pub fn for_update(update: &Update) -> Self {
        Self { correlation_id: format!("upd-{}", update.update_id) }
    }
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Processed,
    /// The sender is banned; the update was answered with the blocked notice and dropped.
    Blocked,
    Ignored,
}

#[derive(Debug, Error)]
pub enum EventHandlerError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Session(#[from] SessionStoreError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Flow(#[from] FlowError),
    #[error(transparent)]
    Application(#[from] ApplicationError),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_types(&self) -> &'static [ChatEventType];
    async fn handle(
        &self,
        update: &Update,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<ChatEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for every event type it declares; later registrations win.
    pub fn register(&mut self, handler: Arc<dyn EventHandler>) {
        for event_type in handler.event_types() {
            self.handlers.insert(event_type.clone(), Arc::clone(&handler));
        }
    }

    pub async fn dispatch(
        &self,
        update: &Update,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&update.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(update, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use sizer_core::flows::ScreenRef;
    use sizer_core::{ChatId, SessionKey, UserId};

    use super::{
        ChatEvent, ChatEventType, EventContext, EventDispatcher, EventHandler, EventHandlerError,
        HandlerResult, IncomingMessage, Sender, Update,
    };
    use crate::locale::Language;

    struct CountingHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        fn event_types(&self) -> &'static [ChatEventType] {
            &[ChatEventType::Message, ChatEventType::Callback]
        }

        async fn handle(
            &self,
            _update: &Update,
            _ctx: &EventContext,
        ) -> Result<HandlerResult, EventHandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(HandlerResult::Processed)
        }
    }

    fn message_update(update_id: i64) -> Update {
        Update {
            update_id,
            event: ChatEvent::Message(IncomingMessage {
                chat_id: ChatId(10),
                message_id: ScreenRef(1),
                from: Sender::new(UserId(7), "Ann"),
                text: "/start".to_owned(),
            }),
        }
    }

    #[tokio::test]
    async fn dispatcher_routes_declared_types_and_ignores_the_rest() {
        let handler = Arc::new(CountingHandler { calls: AtomicUsize::new(0) });
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register(handler.clone());
        assert_eq!(dispatcher.handler_count(), 2);

        let update = message_update(1);
        let result = dispatcher.dispatch(&update, &EventContext::for_update(&update)).await;
        assert!(matches!(result, Ok(HandlerResult::Processed)));

        let unsupported = Update { update_id: 2, event: ChatEvent::Unsupported { kind: "poll".to_owned() } };
        let result = dispatcher.dispatch(&unsupported, &EventContext::default()).await;
        assert!(matches!(result, Ok(HandlerResult::Ignored)));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sender_profile_and_session_key_come_from_the_update() {
        let mut sender = Sender::new(UserId(7), "Ann");
        sender.last_name = Some("Lee".to_owned());
        sender.language_code = Some("en".to_owned());

        let profile = sender.profile();
        assert_eq!(profile.display_name, "Ann Lee");
        assert!(!profile.is_banned);
        assert_eq!(sender.language(), Language::En);

        let update = message_update(3);
        assert_eq!(update.event.session_key(), Some(SessionKey::new(UserId(7), ChatId(10))));
        assert_eq!(EventContext::for_update(&update).correlation_id, "upd-3");
    }
}
