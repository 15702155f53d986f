use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sizer_core::config::{BillingConfig, TelegramConfig};
use sizer_core::flows::ScreenRef;
use sizer_core::{ChatId, UserId};
use tokio::sync::Mutex;
use tracing::debug;

use crate::blocks::{Keyboard, MessageTemplate};
use crate::channel::{BillingChannel, ChannelError, Invoice, MessagingChannel};
use crate::events::{
    CallbackQuery, ChatEvent, IncomingMessage, PreCheckoutQuery, Sender, SuccessfulPayment, Update,
};
use crate::polling::{TransportError, UpdateTransport};

const ALLOWED_UPDATES: [&str; 3] = ["message", "callback_query", "pre_checkout_query"];

#[derive(Default)]
struct PollState {
    pending: VecDeque<Update>,
    offset: i64,
}

/// Bot API client: long-poll update source plus both outbound channels.
pub struct TelegramClient {
    http: Client,
    api_base_url: String,
    bot_token: SecretString,
    provider_token: Option<SecretString>,
    poll_timeout_secs: u64,
    poll: Mutex<PollState>,
}

impl TelegramClient {
    pub fn from_config(
        telegram: &TelegramConfig,
        billing: &BillingConfig,
    ) -> Result<Self, ChannelError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(telegram.poll_timeout_secs + 10))
            .build()
            .map_err(|error| ChannelError::Request(error.without_url().to_string()))?;
        Ok(Self {
            http,
            api_base_url: telegram.api_base_url.trim_end_matches('/').to_owned(),
            bot_token: telegram.bot_token.clone(),
            provider_token: billing.provider_token.clone(),
            poll_timeout_secs: telegram.poll_timeout_secs,
            poll: Mutex::new(PollState::default()),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: &Value) -> Result<T, ChannelError> {
        let url = format!("{}/bot{}/{method}", self.api_base_url, self.bot_token.expose_secret());
        // `without_url` keeps the token out of error text.
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|error| ChannelError::Request(error.without_url().to_string()))?;
        let envelope: ApiResponse<T> = response
            .json()
            .await
            .map_err(|error| ChannelError::Request(error.without_url().to_string()))?;
        envelope.into_result(method)
    }

    async fn poll_once(&self, offset: i64) -> Result<Vec<Update>, ChannelError> {
        let raw: Vec<RawUpdate> = self
            .call(
                "getUpdates",
                &json!({
                    "offset": offset,
                    "timeout": self.poll_timeout_secs,
                    "allowed_updates": ALLOWED_UPDATES,
                }),
            )
            .await?;
        Ok(raw.into_iter().map(RawUpdate::into_update).collect())
    }
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

impl<T> ApiResponse<T> {
    fn into_result(self, method: &str) -> Result<T, ChannelError> {
        match (self.ok, self.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(ChannelError::Rejected(format!(
                "{method}: {}",
                self.description.unwrap_or_else(|| "no description".to_owned())
            ))),
        }
    }
}

fn reply_markup(keyboard: &Option<Keyboard>) -> Option<Value> {
    keyboard.as_ref().and_then(|keyboard| serde_json::to_value(keyboard).ok())
}

/// Edits accept inline keyboards only.
fn inline_markup(keyboard: &Option<Keyboard>) -> Option<Value> {
    match keyboard {
        Some(Keyboard::Inline { .. }) => reply_markup(keyboard),
        _ => None,
    }
}

#[async_trait]
impl UpdateTransport for TelegramClient {
    async fn connect(&self) -> Result<(), TransportError> {
        let me: RawUser = self
            .call("getMe", &json!({}))
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        debug!(event_name = "ingress.connected", bot_id = me.id, "bot api reachable");
        Ok(())
    }

    async fn next_update(&self) -> Result<Option<Update>, TransportError> {
        let mut poll = self.poll.lock().await;
        while poll.pending.is_empty() {
            let updates = self
                .poll_once(poll.offset)
                .await
                .map_err(|error| TransportError::Receive(error.to_string()))?;
            poll.pending.extend(updates);
        }
        Ok(poll.pending.pop_front())
    }

    async fn acknowledge(&self, update_id: i64) -> Result<(), TransportError> {
        let mut poll = self.poll.lock().await;
        poll.offset = poll.offset.max(update_id + 1);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.poll.lock().await.pending.clear();
        Ok(())
    }
}

#[async_trait]
impl MessagingChannel for TelegramClient {
    async fn send(&self, chat: ChatId, message: &MessageTemplate) -> Result<ScreenRef, ChannelError> {
        let mut body = json!({ "chat_id": chat.0, "text": message.text });
        if let Some(markup) = reply_markup(&message.keyboard) {
            body["reply_markup"] = markup;
        }
        let sent: RawMessage = self.call("sendMessage", &body).await?;
        Ok(ScreenRef(sent.message_id))
    }

    async fn edit(
        &self,
        chat: ChatId,
        target: ScreenRef,
        message: &MessageTemplate,
    ) -> Result<(), ChannelError> {
        let mut body = json!({ "chat_id": chat.0, "message_id": target.0, "text": message.text });
        if let Some(markup) = inline_markup(&message.keyboard) {
            body["reply_markup"] = markup;
        }
        let _: Value = self.call("editMessageText", &body).await?;
        Ok(())
    }

    async fn delete(&self, chat: ChatId, target: ScreenRef) -> Result<(), ChannelError> {
        let _: bool =
            self.call("deleteMessage", &json!({ "chat_id": chat.0, "message_id": target.0 })).await?;
        Ok(())
    }

    async fn clear_keyboard(&self, chat: ChatId, target: ScreenRef) -> Result<(), ChannelError> {
        let body = json!({
            "chat_id": chat.0,
            "message_id": target.0,
            "reply_markup": { "inline_keyboard": [] },
        });
        let _: Value = self.call("editMessageReplyMarkup", &body).await?;
        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        toast: Option<&str>,
    ) -> Result<(), ChannelError> {
        let mut body = json!({ "callback_query_id": callback_id });
        if let Some(text) = toast {
            body["text"] = Value::from(text);
        }
        let _: bool = self.call("answerCallbackQuery", &body).await?;
        Ok(())
    }
}

#[async_trait]
impl BillingChannel for TelegramClient {
    async fn send_invoice(&self, chat: ChatId, invoice: &Invoice) -> Result<(), ChannelError> {
        let Some(provider_token) = &self.provider_token else {
            return Err(ChannelError::Rejected("payment provider token is not configured".to_owned()));
        };
        let body = json!({
            "chat_id": chat.0,
            "title": invoice.title,
            "description": invoice.description,
            "payload": invoice.payload,
            "provider_token": provider_token.expose_secret(),
            "currency": invoice.currency,
            "prices": invoice.prices,
            "start_parameter": invoice.start_parameter,
        });
        let _: RawMessage = self.call("sendInvoice", &body).await?;
        Ok(())
    }

    async fn answer_pre_checkout(
        &self,
        query_id: &str,
        ok: bool,
        error_message: Option<&str>,
    ) -> Result<(), ChannelError> {
        let mut body = json!({ "pre_checkout_query_id": query_id, "ok": ok });
        if let (false, Some(reason)) = (ok, error_message) {
            body["error_message"] = Value::from(reason);
        }
        let _: bool = self.call("answerPreCheckoutQuery", &body).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RawUpdate {
    update_id: i64,
    message: Option<RawMessage>,
    callback_query: Option<RawCallback>,
    pre_checkout_query: Option<RawPreCheckout>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    id: i64,
    #[serde(default)]
    first_name: String,
    last_name: Option<String>,
    username: Option<String>,
    language_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawChat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    message_id: i64,
    chat: Option<RawChat>,
    from: Option<RawUser>,
    text: Option<String>,
    successful_payment: Option<RawSuccessfulPayment>,
}

#[derive(Debug, Deserialize)]
struct RawCallback {
    id: String,
    from: RawUser,
    message: Option<RawMessage>,
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPreCheckout {
    id: String,
    from: RawUser,
    currency: String,
    total_amount: i64,
    invoice_payload: String,
}

#[derive(Debug, Deserialize)]
struct RawSuccessfulPayment {
    currency: String,
    total_amount: i64,
    invoice_payload: String,
    telegram_payment_charge_id: String,
    provider_payment_charge_id: String,
}

impl RawUser {
    fn into_sender(self) -> Sender {
        Sender {
            user_id: UserId(self.id),
            first_name: self.first_name,
            last_name: self.last_name,
            username: self.username,
            language_code: self.language_code,
        }
    }
}

impl RawUpdate {
    fn into_update(self) -> Update {
        let update_id = self.update_id;
        let event = if let Some(message) = self.message {
            message_event(message)
        } else if let Some(callback) = self.callback_query {
            callback_event(callback)
        } else if let Some(query) = self.pre_checkout_query {
            ChatEvent::PreCheckout(PreCheckoutQuery {
                id: query.id,
                from: query.from.into_sender(),
                currency: query.currency,
                total_amount: query.total_amount,
                payload: query.invoice_payload,
            })
        } else {
            let kind = self.rest.keys().next().cloned().unwrap_or_else(|| "empty".to_owned());
            ChatEvent::Unsupported { kind }
        };
        Update { update_id, event }
    }
}

fn message_event(message: RawMessage) -> ChatEvent {
    let (Some(chat), Some(from)) = (message.chat, message.from) else {
        return ChatEvent::Unsupported { kind: "anonymous_message".to_owned() };
    };
    let chat_id = ChatId(chat.id);
    if let Some(payment) = message.successful_payment {
        return ChatEvent::SuccessfulPayment(SuccessfulPayment {
            chat_id,
            from: from.into_sender(),
            currency: payment.currency,
            total_amount: payment.total_amount,
            payload: payment.invoice_payload,
            provider_charge_id: payment.provider_payment_charge_id,
            channel_charge_id: payment.telegram_payment_charge_id,
        });
    }
    match message.text {
        Some(text) => ChatEvent::Message(IncomingMessage {
            chat_id,
            message_id: ScreenRef(message.message_id),
            from: from.into_sender(),
            text,
        }),
        None => ChatEvent::Unsupported { kind: "non_text_message".to_owned() },
    }
}

fn callback_event(callback: RawCallback) -> ChatEvent {
    let Some(message) = callback.message else {
        return ChatEvent::Unsupported { kind: "inline_callback".to_owned() };
    };
    let Some(chat) = message.chat else {
        return ChatEvent::Unsupported { kind: "inline_callback".to_owned() };
    };
    ChatEvent::Callback(CallbackQuery {
        id: callback.id,
        chat_id: ChatId(chat.id),
        message_id: ScreenRef(message.message_id),
        from: callback.from.into_sender(),
        data: callback.data.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use sizer_core::flows::ScreenRef;
    use sizer_core::{ChatId, UserId};

    use super::{inline_markup, ApiResponse, RawUpdate};
    use crate::blocks::MessageBuilder;
    use crate::channel::ChannelError;
    use crate::events::ChatEvent;

    fn parse(value: serde_json::Value) -> crate::events::Update {
        serde_json::from_value::<RawUpdate>(value).expect("raw update").into_update()
    }

    #[test]
    fn text_message_becomes_a_message_event() {
        let update = parse(json!({
            "update_id": 100,
            "message": {
                "message_id": 7,
                "chat": { "id": 42, "type": "private" },
                "from": { "id": 42, "is_bot": false, "first_name": "Ann", "language_code": "en" },
                "text": "/start"
            }
        }));

        assert_eq!(update.update_id, 100);
        let ChatEvent::Message(message) = update.event else {
            panic!("expected message event");
        };
        assert_eq!(message.chat_id, ChatId(42));
        assert_eq!(message.message_id, ScreenRef(7));
        assert_eq!(message.from.user_id, UserId(42));
        assert_eq!(message.from.language_code.as_deref(), Some("en"));
        assert_eq!(message.text, "/start");
    }

    #[test]
    fn callback_query_keeps_the_carrier_message() {
        let update = parse(json!({
            "update_id": 101,
            "callback_query": {
                "id": "cb-1",
                "from": { "id": 42, "first_name": "Ann" },
                "message": { "message_id": 9, "chat": { "id": 42 } },
                "data": "pick:brokers:3"
            }
        }));

        let ChatEvent::Callback(callback) = update.event else {
            panic!("expected callback event");
        };
        assert_eq!(callback.id, "cb-1");
        assert_eq!(callback.message_id, ScreenRef(9));
        assert_eq!(callback.data, "pick:brokers:3");
    }

    #[test]
    fn payments_map_to_billing_events() {
        let pre_checkout = parse(json!({
            "update_id": 102,
            "pre_checkout_query": {
                "id": "pcq-1",
                "from": { "id": 42, "first_name": "Ann" },
                "currency": "RUB",
                "total_amount": 4550000,
                "invoice_payload": "kafka_3_5"
            }
        }));
        assert!(matches!(
            pre_checkout.event,
            ChatEvent::PreCheckout(ref query) if query.payload == "kafka_3_5" && query.total_amount == 4_550_000
        ));

        let settled = parse(json!({
            "update_id": 103,
            "message": {
                "message_id": 11,
                "chat": { "id": 42 },
                "from": { "id": 42, "first_name": "Ann" },
                "successful_payment": {
                    "currency": "RUB",
                    "total_amount": 4550000,
                    "invoice_payload": "kafka_3_5",
                    "telegram_payment_charge_id": "tg-1",
                    "provider_payment_charge_id": "prov-1"
                }
            }
        }));
        let ChatEvent::SuccessfulPayment(payment) = settled.event else {
            panic!("expected successful payment");
        };
        assert_eq!(payment.channel_charge_id, "tg-1");
        assert_eq!(payment.provider_charge_id, "prov-1");
    }

    #[test]
    fn unknown_update_kinds_are_unsupported() {
        let update = parse(json!({ "update_id": 104, "edited_message": { "message_id": 1 } }));
        assert_eq!(update.event, ChatEvent::Unsupported { kind: "edited_message".to_owned() });

        let sticker = parse(json!({
            "update_id": 105,
            "message": { "message_id": 2, "chat": { "id": 1 }, "from": { "id": 1, "first_name": "A" } }
        }));
        assert_eq!(sticker.event, ChatEvent::Unsupported { kind: "non_text_message".to_owned() });
    }

    #[test]
    fn api_errors_carry_the_method_and_description() {
        let response: ApiResponse<bool> = serde_json::from_value(json!({
            "ok": false,
            "error_code": 400,
            "description": "Bad Request: message is not modified"
        }))
        .expect("response");

        assert_eq!(
            response.into_result("editMessageText"),
            Err(ChannelError::Rejected(
                "editMessageText: Bad Request: message is not modified".to_owned()
            ))
        );
    }

    #[test]
    fn reply_keyboards_are_not_sent_with_edits() {
        let reply = MessageBuilder::new("menu").reply_row(|row| {
            row.button("☕ Kafka");
        }).build();
        assert!(inline_markup(&reply.keyboard).is_none());

        let inline = MessageBuilder::new("pick")
            .inline_row(|row| {
                row.link("docs", "https://kafka.apache.org");
            })
            .build();
        let markup = inline_markup(&inline.keyboard).expect("inline markup");
        assert_eq!(markup["inline_keyboard"][0][0]["url"], "https://kafka.apache.org");
    }
}
