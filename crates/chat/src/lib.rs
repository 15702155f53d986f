//! Chat integration - Telegram-style bot interface
//!
//! This crate turns chat updates into flow transitions and renders the results:
//! - **Polling** (`polling`) - update loop with reconnection/backoff
//! - **Telegram** (`telegram`) - Bot API transport and channel implementation
//! - **Events** (`events`) - update envelope, dispatcher and handler contract
//! - **Conversation** (`conversation`) - the per-session dialog service
//! - **Payments** (`payments`) - invoice offer, pre-checkout and settlement
//! - **Blocks** (`blocks`) - message templates with inline/reply keyboards
//!
//! # Architecture
//!
//! ```text
//! Bot API → PollingRunner → EventDispatcher → ConversationService → AgentRuntime
//!                                                    ↓
//!                               MessagingChannel / BillingChannel ← screens, cards
//! ```
//!
//! # Key Types
//!
//! - `PollingRunner` - update loop with reconnection logic
//! - `EventDispatcher` - routes updates to their handler
//! - `ConversationService` - drives the parameter dialog for every flow
//! - `MessageBuilder` - constructs messages with keyboards

pub mod alerts;
pub mod blocks;
pub mod callbacks;
pub mod cards;
pub mod channel;
pub mod commands;
pub mod conversation;
pub mod events;
pub mod locale;
pub mod payments;
pub mod polling;
pub mod screens;
pub mod telegram;

pub use callbacks::CallbackAction;
pub use channel::{BillingChannel, Invoice, MessagingChannel, RecordingChannel};
pub use conversation::{ConversationService, ConversationServices, ConversationSettings};
pub use events::{ChatEvent, EventContext, EventDispatcher, Update};
pub use polling::{PollingRunner, ReconnectPolicy, UpdateTransport};
