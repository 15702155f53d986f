use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::calculation::CalculationId;
use crate::domain::service::FlowKind;
use crate::domain::user::UserId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PaymentId(pub i64);

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Successful,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Successful => "successful",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "successful" => Ok(Self::Successful),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown payment status `{other}`")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewPayment {
    pub user_id: UserId,
    pub calculation_id: CalculationId,
    pub amount: Decimal,
    pub currency: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: PaymentId,
    pub user_id: UserId,
    pub calculation_id: CalculationId,
    pub amount: Decimal,
    pub currency: String,
    pub payload: String,
    pub status: PaymentStatus,
    pub provider_charge_id: Option<String>,
    pub channel_charge_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PaymentRecord {
    pub fn is_settled(&self) -> bool {
        self.status == PaymentStatus::Successful
    }
}

/// Charge identifiers reported by the billing channel on a successful payment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeReceipt {
    pub provider_charge_id: String,
    pub channel_charge_id: String,
}

/// A payment joined with the flow of the calculation it pays for.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentHistoryEntry {
    pub payment: PaymentRecord,
    pub flow: FlowKind,
}
