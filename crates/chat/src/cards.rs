use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sizer_core::billing::CostEstimate;
use sizer_core::domain::calculation::{CalculationId, CalculationRecord, ParameterSet, SizingResult};
use sizer_core::flows::schema_for;
use sizer_core::{FlowKind, PaymentHistoryEntry, PaymentRecord, PaymentStatus};

use crate::blocks::{MessageBuilder, MessageTemplate};
use crate::callbacks::CallbackAction;

const SEPARATOR: &str = "━━━━━━━━━━━━━━━━━━━━";

/// (metric, label, unit suffix) in display order.
fn metric_rows(flow: FlowKind) -> &'static [(&'static str, &'static str, &'static str)] {
    match flow {
        FlowKind::Kafka => &[
            ("throughput_mb_sec", "Пропускная способность", " МБ/сек"),
            ("storage_needed_gb", "Необходимое хранилище", " ГБ"),
            ("brokers_count", "Количество брокеров", ""),
            ("ram_per_broker_gb", "RAM на брокер", " ГБ"),
            ("cpu_per_broker", "CPU на брокер", " ядер"),
            ("storage_per_broker_gb", "Хранилище на брокер", " ГБ"),
        ],
        FlowKind::Kubernetes => &[
            ("total_cpu_required", "Требуется CPU", " ядер"),
            ("total_ram_gb_required", "Требуется RAM", " ГБ"),
            ("worker_nodes_count", "Worker-ноды", ""),
            ("control_plane_nodes", "Control Plane ноды", ""),
            ("recommended_node_size", "Рекомендуемый размер ноды", ""),
            ("total_nodes", "Всего нод", ""),
        ],
        FlowKind::Redis => &[
            ("total_memory_gb", "Общая память", " ГБ"),
            ("master_instances", "Master инстансов", ""),
            ("replica_instances", "Replica инстансов", ""),
            ("total_instances", "Всего инстансов", ""),
            ("ram_per_instance_gb", "RAM на инстанс", " ГБ"),
            ("cpu_per_instance", "CPU на инстанс", " ядер"),
            ("disk_per_instance_gb", "Диск на инстанс", " ГБ"),
        ],
        FlowKind::RabbitMq => &[
            ("nodes_count", "Количество нод", ""),
            ("ram_per_node_gb", "RAM на ноду", " ГБ"),
            ("cpu_per_node", "CPU на ноду", " ядер"),
            ("disk_per_node_gb", "Диск на ноду", " ГБ"),
            ("throughput_mb_sec", "Пропускная способность", " МБ/сек"),
            ("queue_memory_gb", "Память для очередей", " ГБ"),
            ("total_memory_gb", "Общая память", " ГБ"),
        ],
    }
}

pub fn result_card(flow: FlowKind, result: &SizingResult, ai_comment: Option<&str>) -> MessageTemplate {
    let rows = metric_rows(flow).iter().filter_map(|(metric, label, unit)| {
        result.get(metric).map(|value| format!("🔸 {label}: {value}{unit}"))
    });
    let mut builder =
        MessageBuilder::new(format!("📊 Результаты расчёта для {}:", flow.display_name()))
            .blank()
            .lines(rows);
    if let Some(comment) = ai_comment {
        builder = builder.blank().line("🤖 Корректировки ИИ:").line(comment);
    }
    builder.build()
}

pub fn money(amount: Decimal) -> String {
    format!("{:.2}", amount)
}

/// Itemised monthly cost with the pay button.
pub fn invoice_offer(
    provider_name: &str,
    estimate: &CostEstimate,
    calculation_id: CalculationId,
) -> MessageTemplate {
    let components = estimate
        .lines
        .iter()
        .map(|line| format!("  • {}: {}", line.label, money(line.amount)));
    MessageBuilder::new(format!("💰 Счёт от {provider_name}"))
        .blank()
        .line(format!("📦 Сервис: {}", estimate.flow.display_name()))
        .blank()
        .line("📋 Компоненты:")
        .lines(components)
        .line(SEPARATOR)
        .line(format!("Итого в месяц: {} {}", money(estimate.total), estimate.currency))
        .blank()
        .line("Хотите оплатить этот расчёт?")
        .inline_row(|row| {
            row.action(
                format!("💳 Оплатить {} {}", money(estimate.total), estimate.currency),
                &CallbackAction::Pay { calculation_id },
            );
        })
        .build()
}

pub fn payment_confirmed(flow: FlowKind, payment: &PaymentRecord) -> MessageTemplate {
    MessageBuilder::new("✅ Платёж успешно завершён!")
        .line(format!("Сервис: {}", flow.display_name()))
        .line(format!("Сумма: {} {}", money(payment.amount), payment.currency))
        .line(format!("ID платежа: {}", payment.id))
        .blank()
        .line("Ваш расчёт оплачен на один месяц использования указанных ресурсов.")
        .line("Спасибо за доверие! 🚀")
        .build()
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.format("%d.%m.%Y %H:%M").to_string()
}

/// One-line digest of the inputs that matter most for each flow.
pub fn input_digest(flow: FlowKind, params: &ParameterSet) -> String {
    let value = |name: &str| params.get(name).map(ToString::to_string).unwrap_or_else(|| "0".to_owned());
    match flow {
        FlowKind::Kafka => {
            format!("{} msg/sec, {} KB/msg", value("messages_per_sec"), value("message_size_kb"))
        }
        FlowKind::Kubernetes => {
            format!("{} подов, HA: {}", value("pods_count"), value("high_availability"))
        }
        FlowKind::Redis => format!(
            "{} GB данных, {} ops/sec",
            value("dataset_size_gb"),
            value("operations_per_sec")
        ),
        FlowKind::RabbitMq => {
            format!("{} msg/sec, {} в очереди", value("messages_per_sec"), value("queue_depth"))
        }
    }
}

pub fn calculation_history(records: &[CalculationRecord]) -> MessageTemplate {
    if records.is_empty() {
        return MessageTemplate::plain("📋 У вас пока нет сохранённых расчётов.");
    }
    let mut builder = MessageBuilder::new("📋 Ваши последние расчёты:");
    for record in records {
        builder = builder
            .blank()
            .line(format!("📅 {}", timestamp(record.created_at)))
            .line(schema_for(record.flow).title)
            .line(format!("📊 Параметры: {}", input_digest(record.flow, &record.input_params)))
            .line(format!(
                "🤖 Корректировки: {}",
                record.ai_adjustments.as_deref().unwrap_or("нет")
            ));
    }
    builder.blank().line("Для получения полных результатов выполните новый расчёт.").build()
}

fn status_line(status: PaymentStatus) -> (&'static str, &'static str) {
    match status {
        PaymentStatus::Successful => ("✅", "оплачен"),
        PaymentStatus::Pending => ("⏳", "ожидает оплаты"),
        PaymentStatus::Failed => ("❌", "ошибка"),
    }
}

pub fn payment_history(entries: &[PaymentHistoryEntry]) -> MessageTemplate {
    if entries.is_empty() {
        return MessageTemplate::plain("📋 У вас пока нет платежей.");
    }
    let mut builder = MessageBuilder::new("💰 Ваша история платежей:");
    for entry in entries {
        let (emoji, status) = status_line(entry.payment.status);
        builder = builder
            .blank()
            .line(format!("{emoji} {}", timestamp(entry.payment.created_at)))
            .line(format!("Сервис: {}", entry.flow.display_name()))
            .line(format!("Сумма: {} {}", money(entry.payment.amount), entry.payment.currency))
            .line(format!("Статус: {status}"))
            .line(SEPARATOR);
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use sizer_core::billing::{estimate_monthly_cost, PriceList};
    use sizer_core::domain::calculation::{
        CalculationId, CalculationRecord, MetricValue, ParamValue, ParameterSet, SizingResult,
    };
    use sizer_core::{
        FlowKind, PaymentHistoryEntry, PaymentId, PaymentRecord, PaymentStatus, UserId,
    };

    use super::{calculation_history, invoice_offer, payment_history, result_card};

    fn kafka_result() -> SizingResult {
        SizingResult::new()
            .with("throughput_mb_sec", MetricValue::Float(4.88))
            .with("storage_needed_gb", MetricValue::Float(1235.96))
            .with("brokers_count", MetricValue::Integer(3))
            .with("ram_per_broker_gb", MetricValue::Integer(32))
            .with("cpu_per_broker", MetricValue::Integer(4))
            .with("storage_per_broker_gb", MetricValue::Float(494.38))
    }

    #[test]
    fn result_card_lists_metrics_with_units_and_optional_commentary() {
        let card = result_card(FlowKind::Kafka, &kafka_result(), None);
        assert!(card.text.starts_with("📊 Результаты расчёта для Kafka:"));
        assert!(card.text.contains("🔸 Количество брокеров: 3"));
        assert!(card.text.contains("🔸 CPU на брокер: 4 ядер"));
        assert!(!card.text.contains("Корректировки ИИ"));

        let adjusted = result_card(FlowKind::Kafka, &kafka_result(), Some("Добавлен брокер"));
        assert!(adjusted.text.ends_with("🤖 Корректировки ИИ:\nДобавлен брокер"));
    }

    #[test]
    fn invoice_offer_itemises_the_estimate_and_offers_payment() {
        let estimate =
            estimate_monthly_cost(FlowKind::Kafka, &kafka_result(), &PriceList::default(), "RUB");
        let offer = invoice_offer("Test Provider", &estimate, CalculationId(7));

        assert!(offer.text.starts_with("💰 Счёт от Test Provider"));
        assert!(offer.text.contains("📦 Сервис: Kafka"));
        assert!(offer.text.contains("  • Брокеры (3 шт): 45000.00"));
        assert!(offer.text.contains(&format!("Итого в месяц: {:.2} RUB", estimate.total)));
        assert_eq!(offer.callbacks(), vec!["pay:7"]);
    }

    #[test]
    fn empty_histories_have_their_own_message() {
        assert_eq!(calculation_history(&[]).text, "📋 У вас пока нет сохранённых расчётов.");
        assert_eq!(payment_history(&[]).text, "📋 У вас пока нет платежей.");
    }

    #[test]
    fn histories_render_one_block_per_entry() {
        let created_at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 0).single().expect("date");
        let mut params = ParameterSet::new();
        params.insert("pods_count".to_owned(), ParamValue::Integer(100));
        params.insert("high_availability".to_owned(), ParamValue::Boolean(true));
        let record = CalculationRecord {
            id: CalculationId(1),
            user_id: UserId(5),
            flow: FlowKind::Kubernetes,
            input_params: params,
            result: SizingResult::new(),
            ai_adjustments: None,
            additional_conditions: None,
            created_at,
        };
        let history = calculation_history(&[record]);
        assert!(history.text.contains("📅 01.03.2026 12:30"));
        assert!(history.text.contains("📊 Параметры: 100 подов, HA: да"));
        assert!(history.text.contains("🤖 Корректировки: нет"));

        let entry = PaymentHistoryEntry {
            payment: PaymentRecord {
                id: PaymentId(3),
                user_id: UserId(5),
                calculation_id: CalculationId(1),
                amount: Decimal::new(12_345, 1),
                currency: "RUB".to_owned(),
                payload: "kubernetes_1_3".to_owned(),
                status: PaymentStatus::Pending,
                provider_charge_id: None,
                channel_charge_id: None,
                created_at,
            },
            flow: FlowKind::Kubernetes,
        };
        let payments = payment_history(&[entry]);
        assert!(payments.text.contains("⏳ 01.03.2026 12:30"));
        assert!(payments.text.contains("Сумма: 1234.50 RUB"));
        assert!(payments.text.contains("Статус: ожидает оплаты"));
    }
}
