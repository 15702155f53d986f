use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use sizer_core::flows::ScreenRef;
use sizer_core::ChatId;
use thiserror::Error;

use crate::blocks::MessageTemplate;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel request failed: {0}")]
    Request(String),
    #[error("channel rejected the call: {0}")]
    Rejected(String),
}

/// Outbound messaging surface.
#[async_trait]
pub trait MessagingChannel: Send + Sync {
    async fn send(&self, chat: ChatId, message: &MessageTemplate) -> Result<ScreenRef, ChannelError>;
    async fn edit(
        &self,
        chat: ChatId,
        target: ScreenRef,
        message: &MessageTemplate,
    ) -> Result<(), ChannelError>;
    async fn delete(&self, chat: ChatId, target: ScreenRef) -> Result<(), ChannelError>;
    /// Drops the inline keyboard of an already sent message.
    async fn clear_keyboard(&self, chat: ChatId, target: ScreenRef) -> Result<(), ChannelError>;
    async fn answer_callback(&self, callback_id: &str, toast: Option<&str>)
        -> Result<(), ChannelError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LabeledPrice {
    pub label: String,
    /// Minor currency units.
    pub amount: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Invoice {
    pub title: String,
    pub description: String,
    pub payload: String,
    pub currency: String,
    pub prices: Vec<LabeledPrice>,
    pub start_parameter: String,
}

#[async_trait]
pub trait BillingChannel: Send + Sync {
    async fn send_invoice(&self, chat: ChatId, invoice: &Invoice) -> Result<(), ChannelError>;
    async fn answer_pre_checkout(
        &self,
        query_id: &str,
        ok: bool,
        error_message: Option<&str>,
    ) -> Result<(), ChannelError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelCall {
    Send { chat: ChatId, screen: ScreenRef, message: MessageTemplate },
    Edit { chat: ChatId, target: ScreenRef, message: MessageTemplate },
    Delete { chat: ChatId, target: ScreenRef },
    ClearKeyboard { chat: ChatId, target: ScreenRef },
    AnswerCallback { callback_id: String, toast: Option<String> },
    SendInvoice { chat: ChatId, invoice: Invoice },
    AnswerPreCheckout { query_id: String, ok: bool },
}

#[derive(Default)]
struct Recording {
    calls: Vec<ChannelCall>,
    next_message_id: i64,
    fail_edits: bool,
}

/// Records every call and hands out increasing message ids.
#[derive(Default)]
pub struct RecordingChannel {
    state: Mutex<Recording>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every `edit` fail, as the Bot API does for messages that are too old.
    pub fn failing_edits(self) -> Self {
        self.refuse_edits();
        self
    }

    pub fn refuse_edits(&self) {
        self.with_state(|state| state.fail_edits = true);
    }

    fn with_state<T>(&self, apply: impl FnOnce(&mut Recording) -> T) -> T {
        match self.state.lock() {
            Ok(mut state) => apply(&mut state),
            Err(poisoned) => apply(&mut poisoned.into_inner()),
        }
    }

    pub fn calls(&self) -> Vec<ChannelCall> {
        self.with_state(|state| state.calls.clone())
    }

    pub fn clear(&self) {
        self.with_state(|state| state.calls.clear());
    }

    /// Texts of sent and edited messages, in order.
    pub fn texts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ChannelCall::Send { message, .. } | ChannelCall::Edit { message, .. } => {
                    Some(message.text)
                }
                _ => None,
            })
            .collect()
    }

    pub fn last_message(&self) -> Option<MessageTemplate> {
        self.calls().into_iter().rev().find_map(|call| match call {
            ChannelCall::Send { message, .. } | ChannelCall::Edit { message, .. } => Some(message),
            _ => None,
        })
    }

    pub fn toasts(&self) -> Vec<Option<String>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ChannelCall::AnswerCallback { toast, .. } => Some(toast),
                _ => None,
            })
            .collect()
    }

    pub fn invoices(&self) -> Vec<Invoice> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ChannelCall::SendInvoice { invoice, .. } => Some(invoice),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: ChannelCall) {
        self.with_state(|state| state.calls.push(call));
    }
}

#[async_trait]
impl MessagingChannel for RecordingChannel {
    async fn send(&self, chat: ChatId, message: &MessageTemplate) -> Result<ScreenRef, ChannelError> {
        Ok(self.with_state(|state| {
            state.next_message_id += 1;
            let screen = ScreenRef(state.next_message_id);
            state.calls.push(ChannelCall::Send { chat, screen, message: message.clone() });
            screen
        }))
    }

    async fn edit(
        &self,
        chat: ChatId,
        target: ScreenRef,
        message: &MessageTemplate,
    ) -> Result<(), ChannelError> {
        if self.with_state(|state| state.fail_edits) {
            return Err(ChannelError::Rejected("message can't be edited".to_owned()));
        }
        self.record(ChannelCall::Edit { chat, target, message: message.clone() });
        Ok(())
    }

    async fn delete(&self, chat: ChatId, target: ScreenRef) -> Result<(), ChannelError> {
        self.record(ChannelCall::Delete { chat, target });
        Ok(())
    }

    async fn clear_keyboard(&self, chat: ChatId, target: ScreenRef) -> Result<(), ChannelError> {
        self.record(ChannelCall::ClearKeyboard { chat, target });
        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        toast: Option<&str>,
    ) -> Result<(), ChannelError> {
        self.record(ChannelCall::AnswerCallback {
            callback_id: callback_id.to_owned(),
            toast: toast.map(str::to_owned),
        });
        Ok(())
    }
}

#[async_trait]
impl BillingChannel for RecordingChannel {
    async fn send_invoice(&self, chat: ChatId, invoice: &Invoice) -> Result<(), ChannelError> {
        self.record(ChannelCall::SendInvoice { chat, invoice: invoice.clone() });
        Ok(())
    }

    async fn answer_pre_checkout(
        &self,
        query_id: &str,
        ok: bool,
        _error_message: Option<&str>,
    ) -> Result<(), ChannelError> {
        self.record(ChannelCall::AnswerPreCheckout { query_id: query_id.to_owned(), ok });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use sizer_core::flows::ScreenRef;
    use sizer_core::ChatId;

    use super::{ChannelCall, MessagingChannel, RecordingChannel};
    use crate::blocks::MessageTemplate;

    #[tokio::test]
    async fn recording_channel_assigns_sequential_message_ids() {
        let channel = RecordingChannel::new();
        let first = channel.send(ChatId(1), &MessageTemplate::plain("a")).await.expect("send");
        let second = channel.send(ChatId(1), &MessageTemplate::plain("b")).await.expect("send");

        assert_eq!(first, ScreenRef(1));
        assert_eq!(second, ScreenRef(2));
        assert_eq!(channel.texts(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn failing_edits_are_not_recorded() {
        let channel = RecordingChannel::new().failing_edits();
        let result = channel.edit(ChatId(1), ScreenRef(9), &MessageTemplate::plain("x")).await;

        assert!(result.is_err());
        assert!(!channel.calls().iter().any(|call| matches!(call, ChannelCall::Edit { .. })));
    }
}
