pub mod engine;
pub mod input;
pub mod schema;
pub mod session;
pub mod states;

pub use engine::{FlowEngine, FlowError, DEFAULT_MIN_CONDITIONS_LENGTH, SKIP_TOKENS};
pub use input::ValidationError;
pub use schema::{schema_for, Bounds, Choice, CustomParser, FlowSchema, ParameterSpec, ValueKind};
pub use session::{InMemorySessionStore, SessionStore, SessionStoreError};
pub use states::{
    CompletedFlow, Cursor, RetreatOutcome, Screen, ScreenRef, SessionState, CONDITIONS_STAGE,
};
