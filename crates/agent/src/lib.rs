//! Sizing runtime: guards free-text conditions, runs the formulas, asks the adjustment
//! model for refinements and only trusts its output after validation.
//!
//! The model never decides a result on its own. Its proposal must keep the base result's
//! key set and value kinds and stay within a bounded factor of each base value, otherwise
//! the base result is used.

pub mod adjustment;
pub mod guardrails;
pub mod llm;
pub mod runtime;

pub use adjustment::{AdjustmentRejection, AdjustmentValidator};
pub use guardrails::{FlagReason, GuardVerdict, InjectionGuard};
pub use llm::{
    AdjustmentError, AdjustmentModel, AdjustmentProposal, AdjustmentRequest, ChatCompletionsClient,
    LlmAdjustmentModel, LlmClient,
};
pub use runtime::{AdjustmentStatus, AgentRuntime, CalculationOutcome, Persisted, PreparedCalculation};
