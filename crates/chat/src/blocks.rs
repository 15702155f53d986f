use serde::Serialize;

use crate::callbacks::CallbackAction;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InlineButton {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl InlineButton {
    pub fn callback(label: impl Into<String>, action: &CallbackAction) -> Self {
        Self { text: label.into(), callback_data: Some(action.encode()), url: None }
    }

    pub fn link(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self { text: label.into(), callback_data: None, url: Some(url.into()) }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReplyButton {
    pub text: String,
}

/// Serializes to the Bot API `reply_markup` shapes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Keyboard {
    Inline { inline_keyboard: Vec<Vec<InlineButton>> },
    Reply { keyboard: Vec<Vec<ReplyButton>>, resize_keyboard: bool },
    Remove { remove_keyboard: bool },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessageTemplate {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyboard: Option<Keyboard>,
}

impl MessageTemplate {
    pub fn plain(text: impl Into<String>) -> Self {
        Self { text: text.into(), keyboard: None }
    }

    pub fn inline_rows(&self) -> &[Vec<InlineButton>] {
        match &self.keyboard {
            Some(Keyboard::Inline { inline_keyboard }) => inline_keyboard,
            _ => &[],
        }
    }

    /// Callback payloads of every inline button, row by row.
    pub fn callbacks(&self) -> Vec<&str> {
        self.inline_rows()
            .iter()
            .flatten()
            .filter_map(|button| button.callback_data.as_deref())
            .collect()
    }

    pub fn reply_labels(&self) -> Vec<&str> {
        match &self.keyboard {
            Some(Keyboard::Reply { keyboard, .. }) => {
                keyboard.iter().flatten().map(|button| button.text.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}

/// Inline rows win over reply rows when both are given.
pub struct MessageBuilder {
    lines: Vec<String>,
    inline: Vec<Vec<InlineButton>>,
    reply: Vec<Vec<ReplyButton>>,
    remove_keyboard: bool,
}

impl MessageBuilder {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            lines: vec![text.into()],
            inline: Vec::new(),
            reply: Vec::new(),
            remove_keyboard: false,
        }
    }

    pub fn line(mut self, text: impl Into<String>) -> Self {
        self.lines.push(text.into());
        self
    }

    pub fn lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lines.extend(lines.into_iter().map(Into::into));
        self
    }

    pub fn blank(self) -> Self {
        self.line("")
    }

    pub fn inline_row<F>(mut self, build: F) -> Self
    where
        F: FnOnce(&mut InlineRowBuilder),
    {
        let mut builder = InlineRowBuilder::default();
        build(&mut builder);
        if !builder.buttons.is_empty() {
            self.inline.push(builder.buttons);
        }
        self
    }

    pub fn reply_row<F>(mut self, build: F) -> Self
    where
        F: FnOnce(&mut ReplyRowBuilder),
    {
        let mut builder = ReplyRowBuilder::default();
        build(&mut builder);
        if !builder.buttons.is_empty() {
            self.reply.push(builder.buttons);
        }
        self
    }

    pub fn remove_keyboard(mut self) -> Self {
        self.remove_keyboard = true;
        self
    }

    pub fn build(self) -> MessageTemplate {
        let keyboard = if !self.inline.is_empty() {
            Some(Keyboard::Inline { inline_keyboard: self.inline })
        } else if !self.reply.is_empty() {
            Some(Keyboard::Reply { keyboard: self.reply, resize_keyboard: true })
        } else if self.remove_keyboard {
            Some(Keyboard::Remove { remove_keyboard: true })
        } else {
            None
        };
        MessageTemplate { text: self.lines.join("\n"), keyboard }
    }
}

#[derive(Default)]
pub struct InlineRowBuilder {
    buttons: Vec<InlineButton>,
}

impl InlineRowBuilder {
    pub fn action(&mut self, label: impl Into<String>, action: &CallbackAction) -> &mut Self {
        self.buttons.push(InlineButton::callback(label, action));
        self
    }

    pub fn link(&mut self, label: impl Into<String>, url: impl Into<String>) -> &mut Self {
        self.buttons.push(InlineButton::link(label, url));
        self
    }
}

#[derive(Default)]
pub struct ReplyRowBuilder {
    buttons: Vec<ReplyButton>,
}

impl ReplyRowBuilder {
    pub fn button(&mut self, label: impl Into<String>) -> &mut Self {
        self.buttons.push(ReplyButton { text: label.into() });
        self
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{Keyboard, MessageBuilder};
    use crate::callbacks::CallbackAction;

    #[test]
    fn message_builder_joins_lines_and_collects_inline_rows() {
        let message = MessageBuilder::new("header")
            .line("body")
            .inline_row(|row| {
                row.action("Skip", &CallbackAction::SkipConditions)
                    .link("Docs", "https://kafka.apache.org/documentation/");
            })
            .inline_row(|_| {})
            .build();

        assert_eq!(message.text, "header\nbody");
        assert_eq!(message.inline_rows().len(), 1, "empty rows are dropped");
        assert_eq!(message.callbacks(), vec!["conditions:skip"]);
    }

    #[test]
    fn inline_keyboard_takes_precedence_over_reply_rows() {
        let message = MessageBuilder::new("x")
            .reply_row(|row| {
                row.button("Menu");
            })
            .inline_row(|row| {
                row.action("Skip", &CallbackAction::SkipConditions);
            })
            .build();

        assert!(matches!(message.keyboard, Some(Keyboard::Inline { .. })));
        assert!(message.reply_labels().is_empty());
    }

    #[test]
    fn keyboards_serialize_to_bot_api_reply_markup() {
        let inline = MessageBuilder::new("x")
            .inline_row(|row| {
                row.action("Pay", &CallbackAction::SkipConditions);
            })
            .build();
        assert_eq!(
            serde_json::to_value(inline.keyboard).expect("serialize"),
            json!({"inline_keyboard": [[{"text": "Pay", "callback_data": "conditions:skip"}]]})
        );

        let reply = MessageBuilder::new("x")
            .reply_row(|row| {
                row.button("A").button("B");
            })
            .build();
        assert_eq!(
            serde_json::to_value(reply.keyboard).expect("serialize"),
            json!({"keyboard": [[{"text": "A"}, {"text": "B"}]], "resize_keyboard": true})
        );

        let removed = MessageBuilder::new("x").remove_keyboard().build();
        assert_eq!(
            serde_json::to_value(removed.keyboard).expect("serialize"),
            json!({"remove_keyboard": true})
        );
    }
}
