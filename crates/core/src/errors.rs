use thiserror::Error;

use crate::billing::BillingError;
use crate::flows::{FlowError, ValidationError};
use crate::sizing::SizingError;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum DomainError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Flow(#[from] FlowError),
    #[error(transparent)]
    Sizing(#[from] SizingError),
    #[error(transparent)]
    Billing(#[from] BillingError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("security violation: {reason}")]
    SecurityViolation { reason: String },
    #[error("adjustment failure: {0}")]
    AdjustmentFailure(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

/// Coarse error classes used for logging and for choosing the user-facing response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    UserInput,
    Sequence,
    SecurityViolation,
    AdjustmentFailure,
    PersistenceFailure,
    Integration,
    Configuration,
    Invariant,
}

impl ApplicationError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Domain(DomainError::Validation(_))
            | Self::Domain(DomainError::Flow(FlowError::ConditionsTooShort { .. })) => {
                ErrorClass::UserInput
            }
            Self::Domain(DomainError::Flow(_)) => ErrorClass::Sequence,
            Self::Domain(DomainError::Billing(_))
            | Self::Domain(DomainError::Sizing(_))
            | Self::Domain(DomainError::InvariantViolation(_)) => ErrorClass::Invariant,
            Self::SecurityViolation { .. } => ErrorClass::SecurityViolation,
            Self::AdjustmentFailure(_) => ErrorClass::AdjustmentFailure,
            Self::Persistence(_) => ErrorClass::PersistenceFailure,
            Self::Integration(_) => ErrorClass::Integration,
            Self::Configuration(_) => ErrorClass::Configuration,
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => "Не удалось обработать запрос. Проверьте ввод и попробуйте снова.",
            Self::Forbidden { .. } => "Доступ к боту ограничен.",
            Self::ServiceUnavailable { .. } => {
                "Сервис временно недоступен. Попробуйте немного позже."
            }
            Self::Internal { .. } => "Произошла внутренняя ошибка.",
        }
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let unassigned = "unassigned".to_owned();
        let message = value.to_string();
        match value.class() {
            ErrorClass::UserInput | ErrorClass::Sequence | ErrorClass::Invariant => {
                Self::BadRequest { message, correlation_id: unassigned }
            }
            ErrorClass::SecurityViolation => Self::Forbidden { message, correlation_id: unassigned },
            ErrorClass::AdjustmentFailure
            | ErrorClass::PersistenceFailure
            | ErrorClass::Integration => {
                Self::ServiceUnavailable { message, correlation_id: unassigned }
            }
            ErrorClass::Configuration => Self::Internal { message, correlation_id: unassigned },
        }
    }
}
