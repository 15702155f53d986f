use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::calculation::ParameterSet;
use crate::domain::service::FlowKind;
use crate::flows::schema::ParameterSpec;

/// Where the conversation currently waits for input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "parameter", rename_all = "snake_case")]
pub enum Cursor {
    Parameter(String),
    Conditions,
}

impl Cursor {
    pub fn label(&self) -> &str {
        match self {
            Self::Parameter(name) => name,
            Self::Conditions => CONDITIONS_STAGE,
        }
    }
}

pub const CONDITIONS_STAGE: &str = "additional_conditions";

/// Opaque handle to the last message rendered for a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenRef(pub i64);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub flow: FlowKind,
    pub collected: ParameterSet,
    pub cursor: Cursor,
    pub last_screen: Option<ScreenRef>,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    pub fn is_at_conditions(&self) -> bool {
        self.cursor == Cursor::Conditions
    }

    pub fn is_idle_since(&self, cutoff: DateTime<Utc>) -> bool {
        self.updated_at < cutoff
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// What the channel layer should render next.
#[derive(Clone, Debug, PartialEq)]
pub enum Screen {
    Parameter { flow: FlowKind, parameter: &'static ParameterSpec, summary: Vec<String> },
    Conditions { flow: FlowKind, summary: Vec<String> },
}

impl Screen {
    pub fn flow(&self) -> FlowKind {
        match self {
            Self::Parameter { flow, .. } | Self::Conditions { flow, .. } => *flow,
        }
    }

    pub fn summary(&self) -> &[String] {
        match self {
            Self::Parameter { summary, .. } | Self::Conditions { summary, .. } => summary,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RetreatOutcome {
    Screen(Screen),
    /// Backed out of the first parameter; the caller discards the session.
    FlowExit,
}

/// All parameters plus the optional free-text conditions, ready for sizing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletedFlow {
    pub flow: FlowKind,
    pub parameters: ParameterSet,
    pub conditions: Option<String>,
}
