use std::sync::Arc;

use sizer_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use sizer_core::billing::{estimate_monthly_cost, CostEstimate, InvoicePayload, PriceList};
use sizer_core::config::BillingConfig;
use sizer_core::domain::calculation::{CalculationId, CalculationRecord};
use sizer_core::flows::ScreenRef;
use sizer_core::{ChargeReceipt, ChatId, NewPayment, PaymentRecord, UserId};
use sizer_db::repositories::{CalculationRepository, PaymentRepository};
use tracing::{info, warn};

use crate::alerts::AdminAlerts;
use crate::blocks::MessageTemplate;
use crate::cards;
use crate::channel::{BillingChannel, Invoice, LabeledPrice, MessagingChannel};
use crate::events::{
    CallbackQuery, EventContext, EventHandlerError, HandlerResult, PreCheckoutQuery,
    SuccessfulPayment,
};

/// Bot API limit for a price label.
const PRICE_LABEL_LIMIT: usize = 30;

pub const ALREADY_PAID: &str = "Этот расчёт уже оплачен!";
pub const CALCULATION_NOT_FOUND: &str = "Расчёт не найден";
pub const PRESS_PAY: &str = "Нажмите кнопку \"Заплатить\"";
pub const BILLING_DISABLED: &str = "Оплата сейчас недоступна.";
pub const PAYLOAD_ERROR: &str = "Ошибка обработки платежа. Обратитесь в поддержку.";
pub const STATUS_UPDATE_FAILED: &str = "Платёж прошёл успешно, но возникла ошибка при обновлении статуса в базе. Обратитесь в поддержку.";
const PRE_CHECKOUT_REFUSED: &str = "Оплата недоступна для этого аккаунта.";

#[derive(Clone, Debug, PartialEq)]
pub struct BillingSettings {
    pub enabled: bool,
    pub provider_name: String,
    pub currency: String,
    pub prices: PriceList,
}

impl Default for BillingSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            provider_name: "Sizer".to_owned(),
            currency: "RUB".to_owned(),
            prices: PriceList::default(),
        }
    }
}

impl BillingSettings {
    pub fn from_config(config: &BillingConfig) -> Self {
        Self {
            enabled: config.enabled,
            provider_name: config.provider_name.clone(),
            currency: config.currency.clone(),
            prices: config.prices.clone(),
        }
    }
}

/// Cost offer, invoice issue and settlement for saved calculations.
pub struct PaymentDesk {
    calculations: Arc<dyn CalculationRepository>,
    payments: Arc<dyn PaymentRepository>,
    messaging: Arc<dyn MessagingChannel>,
    billing: Arc<dyn BillingChannel>,
    alerts: AdminAlerts,
    audit: Arc<dyn AuditSink>,
    settings: BillingSettings,
}

impl PaymentDesk {
    pub fn new(
        calculations: Arc<dyn CalculationRepository>,
        payments: Arc<dyn PaymentRepository>,
        messaging: Arc<dyn MessagingChannel>,
        billing: Arc<dyn BillingChannel>,
        alerts: AdminAlerts,
        audit: Arc<dyn AuditSink>,
        settings: BillingSettings,
    ) -> Self {
        Self { calculations, payments, messaging, billing, alerts, audit, settings }
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    pub fn estimate(&self, record: &CalculationRecord) -> CostEstimate {
        estimate_monthly_cost(record.flow, &record.result, &self.settings.prices, &self.settings.currency)
    }

    /// Sends the itemised cost with a pay button. `None` when billing is off.
    pub async fn offer(
        &self,
        chat: ChatId,
        record: &CalculationRecord,
    ) -> Result<Option<ScreenRef>, EventHandlerError> {
        if !self.settings.enabled {
            return Ok(None);
        }
        let estimate = self.estimate(record);
        let message = cards::invoice_offer(&self.settings.provider_name, &estimate, record.id);
        Ok(Some(self.messaging.send(chat, &message).await?))
    }

    pub async fn history(&self, user_id: UserId, limit: u32) -> Result<MessageTemplate, EventHandlerError> {
        let entries = self.payments.list_for_user(user_id, limit).await?;
        Ok(cards::payment_history(&entries))
    }

    /// Pay button: issues an invoice for the calculation, reusing an unsettled payment.
    pub async fn request(
        &self,
        ctx: &EventContext,
        callback: &CallbackQuery,
        calculation_id: CalculationId,
    ) -> Result<HandlerResult, EventHandlerError> {
        let user_id = callback.from.user_id;
        if !self.settings.enabled {
            self.messaging.answer_callback(&callback.id, Some(BILLING_DISABLED)).await?;
            return Ok(HandlerResult::Processed);
        }

        let Some(record) = self.calculations.find_for_user(user_id, calculation_id).await? else {
            self.messaging.answer_callback(&callback.id, Some(CALCULATION_NOT_FOUND)).await?;
            return Ok(HandlerResult::Processed);
        };
        let estimate = self.estimate(&record);

        let payment = match self.payments.find_by_calculation(user_id, calculation_id).await? {
            Some(existing) if existing.is_settled() => {
                self.messaging.answer_callback(&callback.id, Some(ALREADY_PAID)).await?;
                return Ok(HandlerResult::Processed);
            }
            Some(existing) => existing,
            None => {
                self.payments
                    .create_pending(
                        NewPayment {
                            user_id,
                            calculation_id,
                            amount: estimate.total,
                            currency: estimate.currency.clone(),
                        },
                        record.flow,
                    )
                    .await?
            }
        };

        let invoice = build_invoice(&estimate, &payment);
        self.billing.send_invoice(callback.chat_id, &invoice).await?;
        if let Err(clear_error) =
            self.messaging.clear_keyboard(callback.chat_id, callback.message_id).await
        {
            warn!(
                event_name = "billing.offer_cleanup_failed",
                correlation_id = %ctx.correlation_id,
                error = %clear_error,
            );
        }
        self.messaging.answer_callback(&callback.id, Some(PRESS_PAY)).await?;

        info!(
            event_name = "billing.invoice_sent",
            correlation_id = %ctx.correlation_id,
            user_id = %user_id,
            calculation_id = %calculation_id,
            payment_id = %payment.id,
            amount = %payment.amount,
            "invoice sent"
        );
        self.audit.emit(
            AuditEvent::new(
                &AuditContext::new(None, Some(record.flow), &ctx.correlation_id, "billing"),
                "billing.invoice_sent",
                AuditCategory::Billing,
                AuditOutcome::Success,
            )
            .with_metadata("payment_id", payment.id.to_string())
            .with_metadata("calculation_id", calculation_id.to_string()),
        );
        Ok(HandlerResult::Processed)
    }

    /// Approves every checkout except for banned senders.
    pub async fn pre_checkout(
        &self,
        ctx: &EventContext,
        query: &PreCheckoutQuery,
        sender_banned: bool,
    ) -> Result<HandlerResult, EventHandlerError> {
        let refusal = sender_banned.then_some(PRE_CHECKOUT_REFUSED);
        self.billing.answer_pre_checkout(&query.id, !sender_banned, refusal).await?;
        info!(
            event_name = "billing.pre_checkout_answered",
            correlation_id = %ctx.correlation_id,
            user_id = %query.from.user_id,
            approved = !sender_banned,
        );
        Ok(if sender_banned { HandlerResult::Blocked } else { HandlerResult::Processed })
    }

    /// Settles the payment named by the invoice payload and confirms to the payer.
    pub async fn settle(
        &self,
        ctx: &EventContext,
        event: &SuccessfulPayment,
    ) -> Result<HandlerResult, EventHandlerError> {
        let payload = match InvoicePayload::parse(&event.payload) {
            Ok(payload) => payload,
            Err(parse_error) => {
                self.alerts
                    .notify(ctx, &format!("Платёж с некорректным payload: {parse_error}"))
                    .await;
                self.messaging.send(event.chat_id, &MessageTemplate::plain(PAYLOAD_ERROR)).await?;
                return Ok(HandlerResult::Processed);
            }
        };

        let receipt = ChargeReceipt {
            provider_charge_id: event.provider_charge_id.clone(),
            channel_charge_id: event.channel_charge_id.clone(),
        };
        let settled = match self.payments.mark_successful(payload.payment_id, &receipt).await {
            Ok(true) => self.payments.find_by_id(payload.payment_id).await.ok().flatten(),
            Ok(false) => None,
            Err(update_error) => {
                warn!(
                    event_name = "billing.settle_failed",
                    correlation_id = %ctx.correlation_id,
                    payment_id = %payload.payment_id,
                    error = %update_error,
                );
                None
            }
        };

        let Some(payment) = settled else {
            self.alerts
                .notify(
                    ctx,
                    &format!(
                        "Платёж #{} (расчёт #{}) прошёл, но статус не обновлён",
                        payload.payment_id, payload.calculation_id
                    ),
                )
                .await;
            self.messaging
                .send(event.chat_id, &MessageTemplate::plain(STATUS_UPDATE_FAILED))
                .await?;
            return Ok(HandlerResult::Processed);
        };

        if CostEstimate::minor_units(payment.amount) != event.total_amount {
            warn!(
                event_name = "billing.amount_mismatch",
                correlation_id = %ctx.correlation_id,
                payment_id = %payment.id,
                expected = CostEstimate::minor_units(payment.amount),
                received = event.total_amount,
            );
        }

        info!(
            event_name = "billing.payment_settled",
            correlation_id = %ctx.correlation_id,
            user_id = %event.from.user_id,
            payment_id = %payment.id,
            "payment settled"
        );
        self.audit.emit(
            AuditEvent::new(
                &AuditContext::new(None, Some(payload.flow), &ctx.correlation_id, "billing"),
                "billing.payment_settled",
                AuditCategory::Billing,
                AuditOutcome::Success,
            )
            .with_metadata("payment_id", payment.id.to_string()),
        );
        self.messaging.send(event.chat_id, &cards::payment_confirmed(payload.flow, &payment)).await?;
        Ok(HandlerResult::Processed)
    }
}

pub fn build_invoice(estimate: &CostEstimate, payment: &PaymentRecord) -> Invoice {
    let service = estimate.flow.display_name();
    Invoice {
        title: format!("Оплата расчёта {service}"),
        description: format!("Месячная стоимость инфраструктуры для {service}"),
        payload: payment.payload.clone(),
        currency: estimate.currency.clone(),
        prices: estimate
            .lines
            .iter()
            .map(|line| LabeledPrice {
                label: line.label.chars().take(PRICE_LABEL_LIMIT).collect(),
                amount: CostEstimate::minor_units(line.amount),
            })
            .collect(),
        start_parameter: format!("payment_{}", payment.id),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sizer_core::audit::InMemoryAuditSink;
    use sizer_core::domain::calculation::{
        CalculationRecord, MetricValue, NewCalculation, ParameterSet, SizingResult,
    };
    use sizer_core::flows::ScreenRef;
    use sizer_core::{ChatId, FlowKind, PaymentStatus, UserId};
    use sizer_db::repositories::{
        CalculationRepository, InMemoryCalculationRepository, InMemoryPaymentRepository,
        InMemoryUserRepository, PaymentRepository,
    };

    use super::{BillingSettings, PaymentDesk, ALREADY_PAID, PAYLOAD_ERROR, PRESS_PAY};
    use crate::alerts::AdminAlerts;
    use crate::channel::{ChannelCall, RecordingChannel};
    use crate::events::{CallbackQuery, EventContext, Sender, SuccessfulPayment};

    struct Harness {
        desk: PaymentDesk,
        channel: Arc<RecordingChannel>,
        payments: Arc<InMemoryPaymentRepository>,
        record: CalculationRecord,
    }

    async fn harness() -> Harness {
        let calculations = Arc::new(InMemoryCalculationRepository::default());
        let payments = Arc::new(InMemoryPaymentRepository::default());
        let channel = Arc::new(RecordingChannel::new());
        let users = Arc::new(InMemoryUserRepository::default());
        let record = calculations
            .save(NewCalculation {
                user_id: UserId(5),
                flow: FlowKind::Redis,
                input_params: ParameterSet::new(),
                result: SizingResult::new()
                    .with("total_instances", MetricValue::Integer(2))
                    .with("total_memory_gb", MetricValue::Float(12.5)),
                ai_adjustments: None,
                additional_conditions: None,
            })
            .await
            .expect("save");

        let desk = PaymentDesk::new(
            calculations,
            payments.clone(),
            channel.clone(),
            channel.clone(),
            AdminAlerts::new(users, channel.clone()),
            Arc::new(InMemoryAuditSink::default()),
            BillingSettings { enabled: true, ..BillingSettings::default() },
        );
        Harness { desk, channel, payments, record }
    }

    fn pay_click(calculation: &CalculationRecord) -> CallbackQuery {
        CallbackQuery {
            id: "cb-1".to_owned(),
            chat_id: ChatId(50),
            message_id: ScreenRef(3),
            from: Sender::new(calculation.user_id, "Ann"),
            data: format!("pay:{}", calculation.id),
        }
    }

    #[tokio::test]
    async fn pay_button_creates_a_pending_payment_and_sends_an_itemised_invoice() {
        let h = harness().await;
        let ctx = EventContext::default();

        h.desk.request(&ctx, &pay_click(&h.record), h.record.id).await.expect("request");

        let invoices = h.channel.invoices();
        assert_eq!(invoices.len(), 1);
        let invoice = &invoices[0];
        assert_eq!(invoice.title, "Оплата расчёта Redis");
        assert_eq!(invoice.prices.len(), 2);
        assert_eq!(invoice.prices[0].amount, 1_200_000, "two instances at 6000.00");
        assert!(invoice.prices.iter().all(|price| price.label.chars().count() <= 30));

        let payment = h
            .payments
            .find_by_calculation(UserId(5), h.record.id)
            .await
            .expect("lookup")
            .expect("payment created");
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(invoice.payload, format!("redis_{}_{}", h.record.id, payment.id));
        assert_eq!(h.channel.toasts(), vec![Some(PRESS_PAY.to_owned())]);
        assert!(h
            .channel
            .calls()
            .contains(&ChannelCall::ClearKeyboard { chat: ChatId(50), target: ScreenRef(3) }));
    }

    #[tokio::test]
    async fn pressing_pay_twice_reuses_the_pending_payment() {
        let h = harness().await;
        let ctx = EventContext::default();

        h.desk.request(&ctx, &pay_click(&h.record), h.record.id).await.expect("first");
        h.desk.request(&ctx, &pay_click(&h.record), h.record.id).await.expect("second");

        let invoices = h.channel.invoices();
        assert_eq!(invoices.len(), 2);
        assert_eq!(invoices[0].payload, invoices[1].payload);
        assert_eq!(h.payments.list_for_user(UserId(5), 10).await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn settled_payment_confirms_and_blocks_a_second_invoice() {
        let h = harness().await;
        let ctx = EventContext::default();
        h.desk.request(&ctx, &pay_click(&h.record), h.record.id).await.expect("request");
        let invoice = h.channel.invoices().remove(0);
        let total = invoice.prices.iter().map(|price| price.amount).sum();

        h.desk
            .settle(
                &ctx,
                &SuccessfulPayment {
                    chat_id: ChatId(50),
                    from: Sender::new(UserId(5), "Ann"),
                    currency: "RUB".to_owned(),
                    total_amount: total,
                    payload: invoice.payload.clone(),
                    provider_charge_id: "prov-1".to_owned(),
                    channel_charge_id: "tg-1".to_owned(),
                },
            )
            .await
            .expect("settle");

        let payment = h
            .payments
            .find_by_calculation(UserId(5), h.record.id)
            .await
            .expect("lookup")
            .expect("payment");
        assert!(payment.is_settled());
        assert_eq!(payment.provider_charge_id.as_deref(), Some("prov-1"));
        assert_eq!(payment.channel_charge_id.as_deref(), Some("tg-1"));
        assert!(h.channel.texts().iter().any(|text| text.starts_with("✅ Платёж успешно завершён!")));

        h.channel.clear();
        h.desk.request(&ctx, &pay_click(&h.record), h.record.id).await.expect("again");
        assert!(h.channel.invoices().is_empty());
        assert_eq!(h.channel.toasts(), vec![Some(ALREADY_PAID.to_owned())]);
    }

    #[tokio::test]
    async fn malformed_payload_is_reported_to_the_payer() {
        let h = harness().await;
        h.desk
            .settle(
                &EventContext::default(),
                &SuccessfulPayment {
                    chat_id: ChatId(50),
                    from: Sender::new(UserId(5), "Ann"),
                    currency: "RUB".to_owned(),
                    total_amount: 100,
                    payload: "redis_calculation_1".to_owned(),
                    provider_charge_id: "p".to_owned(),
                    channel_charge_id: "t".to_owned(),
                },
            )
            .await
            .expect("settle");

        assert_eq!(h.channel.texts(), vec![PAYLOAD_ERROR.to_owned()]);
    }

    #[tokio::test]
    async fn unknown_calculation_and_disabled_billing_only_toast() {
        let h = harness().await;
        let mut click = pay_click(&h.record);
        click.from = Sender::new(UserId(6), "Bob");
        h.desk.request(&EventContext::default(), &click, h.record.id).await.expect("request");
        assert_eq!(h.channel.toasts(), vec![Some(super::CALCULATION_NOT_FOUND.to_owned())]);

        let offer = h.desk.offer(ChatId(50), &h.record).await.expect("offer");
        assert!(offer.is_some());
        let disabled = PaymentDesk {
            settings: BillingSettings::default(),
            ..h.desk
        };
        assert_eq!(disabled.offer(ChatId(50), &h.record).await.expect("offer"), None);
    }
}
