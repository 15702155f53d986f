use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use thiserror::Error;

use sizer_core::domain::calculation::{CalculationId, CalculationRecord, NewCalculation};
use sizer_core::domain::payment::{
    ChargeReceipt, NewPayment, PaymentHistoryEntry, PaymentId, PaymentRecord,
};
use sizer_core::domain::service::FlowKind;
use sizer_core::domain::user::{UserId, UserProfile};

pub mod calculation;
pub mod memory;
pub mod payment;
pub mod session;
pub mod user;

pub use calculation::SqlCalculationRepository;
pub use memory::{InMemoryCalculationRepository, InMemoryPaymentRepository, InMemoryUserRepository};
pub use payment::SqlPaymentRepository;
pub use session::SqlSessionStore;
pub use user::SqlUserRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

#[async_trait]
pub trait CalculationRepository: Send + Sync {
    /// Appends a calculation and returns it with its assigned id.
    async fn save(&self, calculation: NewCalculation)
        -> Result<CalculationRecord, RepositoryError>;

    async fn find_for_user(
        &self,
        user_id: UserId,
        id: CalculationId,
    ) -> Result<Option<CalculationRecord>, RepositoryError>;

    /// Most recent first.
    async fn load_history(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<CalculationRecord>, RepositoryError>;
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Inserts a pending payment and stamps it with its invoice payload.
    async fn create_pending(
        &self,
        payment: NewPayment,
        flow: FlowKind,
    ) -> Result<PaymentRecord, RepositoryError>;

    async fn find_by_id(&self, id: PaymentId) -> Result<Option<PaymentRecord>, RepositoryError>;

    async fn find_by_calculation(
        &self,
        user_id: UserId,
        calculation_id: CalculationId,
    ) -> Result<Option<PaymentRecord>, RepositoryError>;

    /// Returns `false` when no payment has that id.
    async fn mark_successful(
        &self,
        id: PaymentId,
        receipt: &ChargeReceipt,
    ) -> Result<bool, RepositoryError>;

    async fn mark_failed(&self, id: PaymentId) -> Result<bool, RepositoryError>;

    /// Most recent first, joined with the paid calculation's flow.
    async fn list_for_user(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<PaymentHistoryEntry>, RepositoryError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Creates or refreshes a profile. Ban and admin flags are never touched here.
    async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), RepositoryError>;
    async fn find(&self, user_id: UserId) -> Result<Option<UserProfile>, RepositoryError>;
    async fn is_banned(&self, user_id: UserId) -> Result<bool, RepositoryError>;
    async fn ban(&self, user_id: UserId, reason: &str) -> Result<(), RepositoryError>;
    async fn set_admin(&self, user_id: UserId, is_admin: bool) -> Result<(), RepositoryError>;
    /// Admins that are not banned.
    async fn list_admins(&self) -> Result<Vec<UserId>, RepositoryError>;
}

pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("invalid timestamp `{raw}`: {error}")))
}

pub(crate) fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name).map_err(|error| RepositoryError::Decode(error.to_string()))
}

pub(crate) fn parse_flow(raw: &str) -> Result<FlowKind, RepositoryError> {
    raw.parse::<FlowKind>().map_err(|error| RepositoryError::Decode(error.to_string()))
}
