pub mod audit;
pub mod billing;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod sizing;

pub use domain::calculation::{
    CalculationId, CalculationRecord, MetricKind, MetricValue, NewCalculation, ParamValue,
    ParameterSet, SizingResult,
};
pub use domain::payment::{
    ChargeReceipt, NewPayment, PaymentHistoryEntry, PaymentId, PaymentRecord, PaymentStatus,
};
pub use domain::service::FlowKind;
pub use domain::user::{ChatId, SessionKey, UserId, UserProfile};
pub use errors::{ApplicationError, DomainError, ErrorClass, InterfaceError};
pub use sizing::{FormulaService, SizingError, StandardFormulas};
