use std::sync::Arc;

use tracing::{error, info, warn};

use sizer_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use sizer_core::domain::calculation::{CalculationRecord, NewCalculation, SizingResult};
use sizer_core::domain::user::UserId;
use sizer_core::errors::{ApplicationError, DomainError};
use sizer_core::flows::{CompletedFlow, FlowEngine, SessionState};
use sizer_core::sizing::FormulaService;
use sizer_db::repositories::{CalculationRepository, UserRepository};

use crate::adjustment::AdjustmentValidator;
use crate::guardrails::{GuardVerdict, InjectionGuard};
use crate::llm::{AdjustmentError, AdjustmentModel, AdjustmentRequest};

/// A finished dialog whose conditions passed the guard.
#[derive(Clone, Debug, PartialEq)]
pub struct PreparedCalculation {
    pub user_id: UserId,
    pub completed: CompletedFlow,
}

impl PreparedCalculation {
    pub fn wants_adjustment(&self) -> bool {
        self.completed.conditions.is_some()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum AdjustmentStatus {
    NotRequested,
    Applied { comment: String },
    /// The base result was kept; the user gets a soft notice.
    Degraded(AdjustmentError),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Persisted {
    Saved(CalculationRecord),
    Failed(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct CalculationOutcome {
    pub calculation: NewCalculation,
    pub adjustment: AdjustmentStatus,
    pub persisted: Persisted,
}

impl CalculationOutcome {
    pub fn record(&self) -> Option<&CalculationRecord> {
        match &self.persisted {
            Persisted::Saved(record) => Some(record),
            Persisted::Failed(_) => None,
        }
    }
}

/// Turns a completed dialog into a stored calculation: guard, formula, optional model
/// adjustment, validation, persistence.
pub struct AgentRuntime {
    engine: FlowEngine,
    guard: InjectionGuard,
    validator: AdjustmentValidator,
    formulas: Arc<dyn FormulaService>,
    model: Option<Arc<dyn AdjustmentModel>>,
    calculations: Arc<dyn CalculationRepository>,
    users: Arc<dyn UserRepository>,
    audit: Arc<dyn AuditSink>,
}

impl AgentRuntime {
    pub fn new(
        formulas: Arc<dyn FormulaService>,
        calculations: Arc<dyn CalculationRepository>,
        users: Arc<dyn UserRepository>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            engine: FlowEngine::default(),
            guard: InjectionGuard::default(),
            validator: AdjustmentValidator::default(),
            formulas,
            model: None,
            calculations,
            users,
            audit,
        }
    }

    pub fn with_engine(mut self, engine: FlowEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_guard(mut self, guard: InjectionGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_validator(mut self, validator: AdjustmentValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_model(mut self, model: Arc<dyn AdjustmentModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn engine(&self) -> &FlowEngine {
        &self.engine
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    /// Closes the conditions stage and screens the free text.
    /// A flagged text bans the user and yields `SecurityViolation`.
    pub async fn prepare(
        &self,
        context: &AuditContext,
        user_id: UserId,
        session: &SessionState,
        conditions: Option<&str>,
    ) -> Result<PreparedCalculation, ApplicationError> {
        let completed = self
            .engine
            .complete(session, conditions)
            .map_err(|error| ApplicationError::from(DomainError::from(error)))?;

        if let Some(text) = completed.conditions.as_deref() {
            if let GuardVerdict::Flagged(reason) = self.guard.screen(text) {
                warn!(
                    event_name = "guard.injection_flagged",
                    correlation_id = %context.correlation_id,
                    user_id = %user_id,
                    flow = %completed.flow,
                    reason = %reason,
                    "free-text conditions flagged, banning user"
                );
                self.audit.emit(
                    AuditEvent::new(
                        context,
                        "guard.injection_flagged",
                        AuditCategory::Guard,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("reason", reason.to_string())
                    .with_metadata("code", reason.code()),
                );
                if let Err(ban_error) = self.users.ban(user_id, &reason.to_string()).await {
                    error!(
                        event_name = "guard.ban_failed",
                        correlation_id = %context.correlation_id,
                        user_id = %user_id,
                        error = %ban_error,
                    );
                }
                return Err(ApplicationError::SecurityViolation { reason: reason.to_string() });
            }
        }

        Ok(PreparedCalculation { user_id, completed })
    }

    pub async fn calculate(
        &self,
        context: &AuditContext,
        prepared: PreparedCalculation,
    ) -> Result<CalculationOutcome, ApplicationError> {
        let PreparedCalculation { user_id, completed } = prepared;
        let base = self
            .formulas
            .compute(completed.flow, &completed.parameters)
            .map_err(|error| ApplicationError::from(DomainError::from(error)))?;

        let (result, adjustment) = match completed.conditions.as_deref() {
            None => (base, AdjustmentStatus::NotRequested),
            Some(conditions) => self.adjust(context, &completed, base, conditions).await,
        };

        let ai_adjustments = match &adjustment {
            AdjustmentStatus::Applied { comment } => Some(comment.clone()),
            _ => None,
        };
        let calculation = NewCalculation {
            user_id,
            flow: completed.flow,
            input_params: completed.parameters,
            result,
            ai_adjustments,
            additional_conditions: completed.conditions,
        };

        let persisted = match self.calculations.save(calculation.clone()).await {
            Ok(record) => {
                info!(
                    event_name = "calculation.saved",
                    correlation_id = %context.correlation_id,
                    user_id = %user_id,
                    flow = %record.flow,
                    calculation_id = %record.id,
                    adjusted = record.ai_adjustments.is_some(),
                );
                Persisted::Saved(record)
            }
            Err(save_error) => {
                error!(
                    event_name = "persistence.save_failed",
                    correlation_id = %context.correlation_id,
                    user_id = %user_id,
                    error = %save_error,
                );
                self.audit.emit(
                    AuditEvent::new(
                        context,
                        "persistence.save_failed",
                        AuditCategory::Persistence,
                        AuditOutcome::Failed,
                    )
                    .with_metadata("error", save_error.to_string()),
                );
                Persisted::Failed(save_error.to_string())
            }
        };

        Ok(CalculationOutcome { calculation, adjustment, persisted })
    }

    /// `prepare` followed by `calculate`.
    pub async fn run(
        &self,
        context: &AuditContext,
        user_id: UserId,
        session: &SessionState,
        conditions: Option<&str>,
    ) -> Result<CalculationOutcome, ApplicationError> {
        let prepared = self.prepare(context, user_id, session, conditions).await?;
        self.calculate(context, prepared).await
    }

    async fn adjust(
        &self,
        context: &AuditContext,
        completed: &CompletedFlow,
        base: SizingResult,
        conditions: &str,
    ) -> (SizingResult, AdjustmentStatus) {
        let outcome = match &self.model {
            None => Err(AdjustmentError::NotConfigured),
            Some(model) => {
                let request = AdjustmentRequest {
                    flow: completed.flow,
                    parameters: completed.parameters.clone(),
                    base: base.clone(),
                    conditions: conditions.to_owned(),
                };
                match model.propose(&request).await {
                    Ok(proposal) => self
                        .validator
                        .validate(&base, &proposal.adjusted_result)
                        .map(|adjusted| (adjusted, proposal.comment))
                        .map_err(AdjustmentError::from),
                    Err(error) => Err(error),
                }
            }
        };

        match outcome {
            Ok((adjusted, comment)) => {
                info!(
                    event_name = "adjustment.applied",
                    correlation_id = %context.correlation_id,
                    flow = %completed.flow,
                );
                self.audit.emit(AuditEvent::new(
                    context,
                    "adjustment.applied",
                    AuditCategory::Adjustment,
                    AuditOutcome::Success,
                ));
                (adjusted, AdjustmentStatus::Applied { comment })
            }
            Err(failure) => {
                warn!(
                    event_name = "adjustment.rejected",
                    correlation_id = %context.correlation_id,
                    flow = %completed.flow,
                    code = failure.code(),
                    error = %failure,
                    "falling back to the base result"
                );
                self.audit.emit(
                    AuditEvent::new(
                        context,
                        "adjustment.rejected",
                        AuditCategory::Adjustment,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("code", failure.code())
                    .with_metadata("error", failure.to_string()),
                );
                (base, AdjustmentStatus::Degraded(failure))
            }
        }
    }
}
