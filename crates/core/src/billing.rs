use std::fmt;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::calculation::{format_number, CalculationId, SizingResult};
use crate::domain::payment::PaymentId;
use crate::domain::service::FlowKind;

/// Monthly unit prices, in the billing currency.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceList {
    pub kafka_broker: Decimal,
    pub kafka_storage_gb: Decimal,
    pub kubernetes_control_plane_node: Decimal,
    pub kubernetes_worker_node: Decimal,
    pub redis_instance: Decimal,
    pub redis_ram_gb: Decimal,
    pub rabbitmq_node: Decimal,
    pub rabbitmq_ram_gb: Decimal,
}

impl Default for PriceList {
    fn default() -> Self {
        Self {
            kafka_broker: Decimal::new(15_000, 0),
            kafka_storage_gb: Decimal::new(12, 0),
            kubernetes_control_plane_node: Decimal::new(9_000, 0),
            kubernetes_worker_node: Decimal::new(14_000, 0),
            redis_instance: Decimal::new(6_000, 0),
            redis_ram_gb: Decimal::new(450, 0),
            rabbitmq_node: Decimal::new(8_000, 0),
            rabbitmq_ram_gb: Decimal::new(350, 0),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CostLine {
    pub label: String,
    pub amount: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub flow: FlowKind,
    pub lines: Vec<CostLine>,
    pub total: Decimal,
    pub currency: String,
}

impl CostEstimate {
    /// Amounts sent to the payment provider are integers in the currency's minor unit.
    pub fn minor_units(amount: Decimal) -> i64 {
        (amount * Decimal::ONE_HUNDRED).round().to_i64().unwrap_or(0)
    }
}

/// Prices a sizing result: one line per billed component.
pub fn estimate_monthly_cost(
    flow: FlowKind,
    result: &SizingResult,
    prices: &PriceList,
    currency: &str,
) -> CostEstimate {
    let (count_metric, count_label, count_price, volume_metric, volume_label, volume_price) =
        match flow {
            FlowKind::Kafka => (
                "brokers_count",
                "Брокеры",
                prices.kafka_broker,
                "storage_needed_gb",
                "Хранилище",
                prices.kafka_storage_gb,
            ),
            FlowKind::Kubernetes => (
                "control_plane_nodes",
                "Control Plane",
                prices.kubernetes_control_plane_node,
                "worker_nodes_count",
                "Worker ноды",
                prices.kubernetes_worker_node,
            ),
            FlowKind::Redis => (
                "total_instances",
                "Инстансы",
                prices.redis_instance,
                "total_memory_gb",
                "RAM",
                prices.redis_ram_gb,
            ),
            FlowKind::RabbitMq => (
                "nodes_count",
                "Ноды",
                prices.rabbitmq_node,
                "total_memory_gb",
                "RAM",
                prices.rabbitmq_ram_gb,
            ),
        };

    let count = result.number(count_metric).unwrap_or(0.0);
    let volume = result.number(volume_metric).unwrap_or(0.0);

    let volume_suffix = if flow == FlowKind::Kubernetes {
        format!("{} нод", format_number(volume))
    } else {
        format!("{volume:.2} GB")
    };
    let count_suffix = if flow == FlowKind::Kubernetes {
        format!("{} нод", format_number(count))
    } else {
        format!("{} шт", format_number(count))
    };

    let lines = vec![
        CostLine {
            label: format!("{count_label} ({count_suffix})"),
            amount: priced(count, count_price),
        },
        CostLine {
            label: format!("{volume_label} ({volume_suffix})"),
            amount: priced(volume, volume_price),
        },
    ];
    let total = lines.iter().map(|line| line.amount).sum::<Decimal>().round_dp(2);

    CostEstimate { flow, lines, total, currency: currency.to_owned() }
}

fn priced(quantity: f64, unit_price: Decimal) -> Decimal {
    let quantity = Decimal::try_from(quantity).unwrap_or(Decimal::ZERO).round_dp(2);
    (quantity * unit_price).round_dp(2)
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BillingError {
    #[error("malformed invoice payload `{0}`")]
    MalformedPayload(String),
}

/// Correlates a provider callback with the calculation and payment it settles.
/// Rendered as `{flow}_{calculation_id}_{payment_id}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InvoicePayload {
    pub flow: FlowKind,
    pub calculation_id: CalculationId,
    pub payment_id: PaymentId,
}

impl InvoicePayload {
    pub fn new(flow: FlowKind, calculation_id: CalculationId, payment_id: PaymentId) -> Self {
        Self { flow, calculation_id, payment_id }
    }

    pub fn render(&self) -> String {
        self.to_string()
    }

    pub fn parse(raw: &str) -> Result<Self, BillingError> {
        let malformed = || BillingError::MalformedPayload(raw.to_owned());
        let mut parts = raw.trim().splitn(3, '_');
        let flow = parts.next().and_then(|part| part.parse::<FlowKind>().ok()).ok_or_else(malformed)?;
        let calculation_id =
            parts.next().and_then(|part| part.parse::<i64>().ok()).ok_or_else(malformed)?;
        let payment_id =
            parts.next().and_then(|part| part.parse::<i64>().ok()).ok_or_else(malformed)?;

        Ok(Self {
            flow,
            calculation_id: CalculationId(calculation_id),
            payment_id: PaymentId(payment_id),
        })
    }
}

impl fmt::Display for InvoicePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.flow, self.calculation_id, self.payment_id)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{estimate_monthly_cost, BillingError, CostEstimate, InvoicePayload, PriceList};
    use crate::domain::calculation::{CalculationId, MetricValue, SizingResult};
    use crate::domain::payment::PaymentId;
    use crate::domain::service::FlowKind;

    #[test]
    fn kafka_cost_prices_brokers_and_storage() {
        let result = SizingResult::new()
            .with("brokers_count", MetricValue::Integer(3))
            .with("storage_needed_gb", MetricValue::Float(100.5));
        let prices = PriceList {
            kafka_broker: Decimal::new(1_000, 0),
            kafka_storage_gb: Decimal::new(2, 0),
            ..PriceList::default()
        };

        let estimate = estimate_monthly_cost(FlowKind::Kafka, &result, &prices, "RUB");

        assert_eq!(estimate.lines.len(), 2);
        assert_eq!(estimate.lines[0].label, "Брокеры (3 шт)");
        assert_eq!(estimate.lines[0].amount, Decimal::new(3_000, 0));
        assert_eq!(estimate.lines[1].label, "Хранилище (100.50 GB)");
        assert_eq!(estimate.lines[1].amount, Decimal::new(201, 0));
        assert_eq!(estimate.total, Decimal::new(3_201, 0));
        assert_eq!(estimate.currency, "RUB");
    }

    #[test]
    fn missing_metrics_price_as_zero() {
        let estimate =
            estimate_monthly_cost(FlowKind::Redis, &SizingResult::new(), &PriceList::default(), "RUB");
        assert_eq!(estimate.total, Decimal::ZERO);
    }

    #[test]
    fn minor_units_scale_by_one_hundred() {
        assert_eq!(CostEstimate::minor_units(Decimal::new(12_345, 2)), 12_345);
        assert_eq!(CostEstimate::minor_units(Decimal::new(45_000, 0)), 4_500_000);
    }

    #[test]
    fn invoice_payload_renders_and_parses() {
        let payload = InvoicePayload::new(FlowKind::RabbitMq, CalculationId(42), PaymentId(7));
        assert_eq!(payload.render(), "rabbitmq_42_7");
        assert_eq!(InvoicePayload::parse("rabbitmq_42_7"), Ok(payload));
    }

    #[test]
    fn malformed_invoice_payload_is_rejected() {
        for raw in ["kafka_42", "kafka_x_7", "mongo_1_2", "kafka_1_two", ""] {
            assert!(matches!(InvoicePayload::parse(raw), Err(BillingError::MalformedPayload(_))));
        }
    }
}
