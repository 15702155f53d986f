use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::calculation::{ParamValue, ParameterSet};
use crate::domain::service::FlowKind;
use crate::flows::schema::{schema_for, FlowSchema, ParameterSpec};
use crate::flows::states::{
    CompletedFlow, Cursor, RetreatOutcome, Screen, SessionState, CONDITIONS_STAGE,
};

pub const DEFAULT_MIN_CONDITIONS_LENGTH: usize = 10;

/// Answers to the conditions stage that mean "no additional conditions".
pub const SKIP_TOKENS: [&str; 4] = ["нет", "no", "skip", "-"];

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowError {
    #[error("received `{received}` while waiting for `{expected}`")]
    OutOfSequence { expected: String, received: String },
    #[error("flow {flow} has no parameter `{name}`")]
    UnknownParameter { flow: FlowKind, name: String },
    #[error("flow {0} declares no parameters")]
    EmptySchema(FlowKind),
    #[error("no active session")]
    NoActiveSession,
    #[error("parameters not collected yet: {missing:?}")]
    Incomplete { missing: Vec<String> },
    #[error("additional conditions must be at least {min_length} characters")]
    ConditionsTooShort { min_length: usize },
}

/// Drives the shared parameter-collection dialog for every flow.
#[derive(Clone, Debug)]
pub struct FlowEngine {
    min_conditions_length: usize,
}

impl Default for FlowEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_CONDITIONS_LENGTH)
    }
}

impl FlowEngine {
    pub fn new(min_conditions_length: usize) -> Self {
        Self { min_conditions_length }
    }

    pub fn min_conditions_length(&self) -> usize {
        self.min_conditions_length
    }

    pub fn schema(&self, flow: FlowKind) -> &'static FlowSchema {
        schema_for(flow)
    }

    /// Fresh session positioned on the first parameter.
    pub fn start(&self, flow: FlowKind) -> Result<(SessionState, Screen), FlowError> {
        let schema = schema_for(flow);
        let first = schema.first().ok_or(FlowError::EmptySchema(flow))?;
        let session = SessionState {
            flow,
            collected: ParameterSet::new(),
            cursor: Cursor::Parameter(first.name.to_owned()),
            last_screen: None,
            updated_at: chrono::Utc::now(),
        };
        let screen = Screen::Parameter { flow, parameter: first, summary: Vec::new() };
        Ok((session, screen))
    }

    /// The parameter the cursor points at.
    pub fn expected_parameter(
        &self,
        session: &SessionState,
    ) -> Result<&'static ParameterSpec, FlowError> {
        match &session.cursor {
            Cursor::Parameter(name) => lookup(session.flow, name),
            Cursor::Conditions => Err(FlowError::OutOfSequence {
                expected: CONDITIONS_STAGE.to_owned(),
                received: "parameter".to_owned(),
            }),
        }
    }

    pub fn advance(
        &self,
        session: &mut SessionState,
        param_name: &str,
        value: ParamValue,
    ) -> Result<Screen, FlowError> {
        let expected = match &session.cursor {
            Cursor::Parameter(name) if name == param_name => name.clone(),
            other => {
                return Err(FlowError::OutOfSequence {
                    expected: other.label().to_owned(),
                    received: param_name.to_owned(),
                })
            }
        };

        let schema = schema_for(session.flow);
        let current = lookup(session.flow, &expected)?;
        session.collected.insert(current.name.to_owned(), value);
        session.cursor = match schema.next_after(current.name) {
            Some(next) => Cursor::Parameter(next.name.to_owned()),
            None => Cursor::Conditions,
        };
        session.touch();

        self.current_screen(session)
    }

    pub fn advance_with_audit<S>(
        &self,
        session: &mut SessionState,
        param_name: &str,
        value: ParamValue,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<Screen, FlowError>
    where
        S: AuditSink + ?Sized,
    {
        let rendered = value.to_string();
        let result = self.advance(session, param_name, value);
        match &result {
            Ok(_) => sink.emit(
                AuditEvent::new(
                    audit,
                    "flow.parameter_accepted",
                    AuditCategory::Flow,
                    AuditOutcome::Success,
                )
                .with_metadata("parameter", param_name)
                .with_metadata("value", rendered)
                .with_metadata("cursor", session.cursor.label()),
            ),
            Err(error) => sink.emit(
                AuditEvent::new(
                    audit,
                    "flow.transition_rejected",
                    AuditCategory::Flow,
                    AuditOutcome::Rejected,
                )
                .with_metadata("parameter", param_name)
                .with_metadata("error", error.to_string()),
            ),
        }
        result
    }

    /// Steps back one parameter. Collected values are kept so re-entering them is a no-op.
    pub fn retreat(&self, session: &mut SessionState) -> Result<RetreatOutcome, FlowError> {
        let schema = schema_for(session.flow);
        let target = match &session.cursor {
            Cursor::Conditions => {
                Some(schema.last().ok_or(FlowError::EmptySchema(session.flow))?)
            }
            Cursor::Parameter(name) => {
                lookup(session.flow, name)?;
                schema.previous_before(name)
            }
        };

        match target {
            Some(parameter) => {
                session.cursor = Cursor::Parameter(parameter.name.to_owned());
                session.touch();
                Ok(RetreatOutcome::Screen(self.current_screen(session)?))
            }
            None => Ok(RetreatOutcome::FlowExit),
        }
    }

    /// Collected values up to and including `up_to`, in parameter order.
    pub fn summary(&self, session: &SessionState, up_to: &str) -> Result<Vec<String>, FlowError> {
        let limit = lookup(session.flow, up_to)?.order;
        Ok(schema_for(session.flow)
            .ordered()
            .into_iter()
            .filter(|parameter| parameter.order <= limit)
            .filter_map(|parameter| {
                session.collected.get(parameter.name).map(|value| parameter.render(value))
            })
            .collect())
    }

    /// Re-renders the screen the cursor points at.
    pub fn current_screen(&self, session: &SessionState) -> Result<Screen, FlowError> {
        let schema = schema_for(session.flow);
        match &session.cursor {
            Cursor::Parameter(name) => {
                let parameter = lookup(session.flow, name)?;
                let summary = match schema.previous_before(name) {
                    Some(previous) => self.summary(session, previous.name)?,
                    None => Vec::new(),
                };
                Ok(Screen::Parameter { flow: session.flow, parameter, summary })
            }
            Cursor::Conditions => {
                let last = schema.last().ok_or(FlowError::EmptySchema(session.flow))?;
                Ok(Screen::Conditions {
                    flow: session.flow,
                    summary: self.summary(session, last.name)?,
                })
            }
        }
    }

    /// Moves to the conditions stage. Repeating the request leaves the session unchanged.
    pub fn enter_conditions(&self, session: &mut SessionState) -> Result<Screen, FlowError> {
        if !session.is_at_conditions() {
            let missing = missing_parameters(session);
            if !missing.is_empty() {
                return Err(FlowError::Incomplete { missing });
            }
            session.cursor = Cursor::Conditions;
            session.touch();
        }
        self.current_screen(session)
    }

    /// Consumes the conditions stage. Skip tokens and blank input mean no conditions.
    pub fn complete(
        &self,
        session: &SessionState,
        conditions: Option<&str>,
    ) -> Result<CompletedFlow, FlowError> {
        if !session.is_at_conditions() {
            return Err(FlowError::OutOfSequence {
                expected: session.cursor.label().to_owned(),
                received: CONDITIONS_STAGE.to_owned(),
            });
        }
        let missing = missing_parameters(session);
        if !missing.is_empty() {
            return Err(FlowError::Incomplete { missing });
        }

        let conditions = match conditions.map(str::trim) {
            None => None,
            Some(text) if is_skip(text) => None,
            Some(text) if text.chars().count() < self.min_conditions_length => {
                return Err(FlowError::ConditionsTooShort {
                    min_length: self.min_conditions_length,
                })
            }
            Some(text) => Some(text.to_owned()),
        };

        Ok(CompletedFlow { flow: session.flow, parameters: session.collected.clone(), conditions })
    }
}

pub fn is_skip(text: &str) -> bool {
    let text = text.trim();
    text.is_empty() || SKIP_TOKENS.iter().any(|token| text.to_lowercase() == *token)
}

fn lookup(flow: FlowKind, name: &str) -> Result<&'static ParameterSpec, FlowError> {
    schema_for(flow)
        .parameter(name)
        .ok_or_else(|| FlowError::UnknownParameter { flow, name: name.to_owned() })
}

fn missing_parameters(session: &SessionState) -> Vec<String> {
    schema_for(session.flow)
        .ordered()
        .into_iter()
        .filter(|parameter| !session.collected.contains_key(parameter.name))
        .map(|parameter| parameter.name.to_owned())
        .collect()
}
