use std::str::FromStr;

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;

use sizer_core::billing::InvoicePayload;
use sizer_core::domain::calculation::CalculationId;
use sizer_core::domain::payment::{
    ChargeReceipt, NewPayment, PaymentHistoryEntry, PaymentId, PaymentRecord, PaymentStatus,
};
use sizer_core::domain::service::FlowKind;
use sizer_core::domain::user::UserId;

use super::{column, format_timestamp, parse_flow, parse_timestamp, PaymentRepository, RepositoryError};
use crate::DbPool;

const SELECT_COLUMNS: &str = "SELECT p.id, p.user_id, p.calculation_id, p.amount, p.currency,
        p.payload, p.payment_status, p.provider_payment_charge_id,
        p.channel_payment_charge_id, p.created_at, c.service_type
 FROM payments p
 JOIN calculations c ON c.id = p.calculation_id";

pub struct SqlPaymentRepository {
    pool: DbPool,
}

impl SqlPaymentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(
        &self,
        clause: &str,
        binds: &[i64],
    ) -> Result<Option<PaymentRecord>, RepositoryError> {
        let sql = format!("{SELECT_COLUMNS} WHERE {clause}");
        let mut query = sqlx::query(&sql);
        for value in binds {
            query = query.bind(*value);
        }
        let row = query.fetch_optional(&self.pool).await?;
        row.as_ref().map(|row| row_to_entry(row).map(|entry| entry.payment)).transpose()
    }
}

fn row_to_entry(row: &SqliteRow) -> Result<PaymentHistoryEntry, RepositoryError> {
    let id: i64 = column(row, "id")?;
    let user_id: i64 = column(row, "user_id")?;
    let calculation_id: i64 = column(row, "calculation_id")?;
    let amount: String = column(row, "amount")?;
    let currency: String = column(row, "currency")?;
    let payload: String = column(row, "payload")?;
    let status: String = column(row, "payment_status")?;
    let provider_charge_id: Option<String> = column(row, "provider_payment_charge_id")?;
    let channel_charge_id: Option<String> = column(row, "channel_payment_charge_id")?;
    let created_at: String = column(row, "created_at")?;
    let service_type: String = column(row, "service_type")?;

    let amount = Decimal::from_str(&amount)
        .map_err(|error| RepositoryError::Decode(format!("amount of payment #{id}: {error}")))?;
    let status = PaymentStatus::from_str(&status).map_err(RepositoryError::Decode)?;

    Ok(PaymentHistoryEntry {
        payment: PaymentRecord {
            id: PaymentId(id),
            user_id: UserId(user_id),
            calculation_id: CalculationId(calculation_id),
            amount,
            currency,
            payload,
            status,
            provider_charge_id,
            channel_charge_id,
            created_at: parse_timestamp(&created_at)?,
        },
        flow: parse_flow(&service_type)?,
    })
}

#[async_trait::async_trait]
impl PaymentRepository for SqlPaymentRepository {
    async fn create_pending(
        &self,
        payment: NewPayment,
        flow: FlowKind,
    ) -> Result<PaymentRecord, RepositoryError> {
        let now = format_timestamp(Utc::now());
        let mut tx = self.pool.begin().await?;

        let outcome = sqlx::query(
            "INSERT INTO payments (user_id, calculation_id, amount, currency, payment_status,
                                   created_at, updated_at)
             VALUES (?, ?, ?, ?, 'pending', ?, ?)",
        )
        .bind(payment.user_id.0)
        .bind(payment.calculation_id.0)
        .bind(payment.amount.to_string())
        .bind(&payment.currency)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let id = PaymentId(outcome.last_insert_rowid());
        let payload = InvoicePayload::new(flow, payment.calculation_id, id).render();
        sqlx::query("UPDATE payments SET payload = ? WHERE id = ?")
            .bind(&payload)
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(PaymentRecord {
            id,
            user_id: payment.user_id,
            calculation_id: payment.calculation_id,
            amount: payment.amount,
            currency: payment.currency,
            payload,
            status: PaymentStatus::Pending,
            provider_charge_id: None,
            channel_charge_id: None,
            created_at: parse_timestamp(&now)?,
        })
    }

    async fn find_by_id(&self, id: PaymentId) -> Result<Option<PaymentRecord>, RepositoryError> {
        self.fetch_one_where("p.id = ?", &[id.0]).await
    }

    async fn find_by_calculation(
        &self,
        user_id: UserId,
        calculation_id: CalculationId,
    ) -> Result<Option<PaymentRecord>, RepositoryError> {
        self.fetch_one_where("p.calculation_id = ? AND p.user_id = ?", &[calculation_id.0, user_id.0])
            .await
    }

    async fn mark_successful(
        &self,
        id: PaymentId,
        receipt: &ChargeReceipt,
    ) -> Result<bool, RepositoryError> {
        let outcome = sqlx::query(
            "UPDATE payments
             SET payment_status = 'successful',
                 provider_payment_charge_id = ?,
                 channel_payment_charge_id = ?,
                 updated_at = ?
             WHERE id = ?",
        )
        .bind(&receipt.provider_charge_id)
        .bind(&receipt.channel_charge_id)
        .bind(format_timestamp(Utc::now()))
        .bind(id.0)
        .execute(&self.pool)
        .await?;

        Ok(outcome.rows_affected() > 0)
    }

    async fn mark_failed(&self, id: PaymentId) -> Result<bool, RepositoryError> {
        let outcome = sqlx::query(
            "UPDATE payments SET payment_status = 'failed', updated_at = ?
             WHERE id = ? AND payment_status = 'pending'",
        )
        .bind(format_timestamp(Utc::now()))
        .bind(id.0)
        .execute(&self.pool)
        .await?;

        Ok(outcome.rows_affected() > 0)
    }

    async fn list_for_user(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<PaymentHistoryEntry>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE p.user_id = ? ORDER BY p.created_at DESC, p.id DESC LIMIT ?"
        ))
        .bind(user_id.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use sizer_core::billing::InvoicePayload;
    use sizer_core::domain::calculation::{CalculationId, NewCalculation, ParameterSet, SizingResult};
    use sizer_core::domain::payment::{ChargeReceipt, NewPayment, PaymentId, PaymentStatus};
    use sizer_core::domain::service::FlowKind;
    use sizer_core::domain::user::UserId;

    use super::SqlPaymentRepository;
    use crate::repositories::{CalculationRepository, PaymentRepository, SqlCalculationRepository};
    use crate::{connect_with_settings, migrations, DbPool};

    async fn pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        pool
    }

    async fn seed_calculation(pool: &DbPool, user: i64, flow: FlowKind) -> CalculationId {
        SqlCalculationRepository::new(pool.clone())
            .save(NewCalculation {
                user_id: UserId(user),
                flow,
                input_params: ParameterSet::new(),
                result: SizingResult::new(),
                ai_adjustments: None,
                additional_conditions: None,
            })
            .await
            .expect("seed calculation")
            .id
    }

    fn new_payment(user: i64, calculation_id: CalculationId) -> NewPayment {
        NewPayment {
            user_id: UserId(user),
            calculation_id,
            amount: Decimal::new(5_940_000, 2),
            currency: "RUB".into(),
        }
    }

    #[tokio::test]
    async fn create_pending_stamps_a_parsable_payload() {
        let pool = pool().await;
        let calculation_id = seed_calculation(&pool, 11, FlowKind::Redis).await;
        let repo = SqlPaymentRepository::new(pool);

        let payment =
            repo.create_pending(new_payment(11, calculation_id), FlowKind::Redis).await.expect("create");
        assert_eq!(payment.status, PaymentStatus::Pending);

        let payload = InvoicePayload::parse(&payment.payload).expect("payload parses");
        assert_eq!(payload.flow, FlowKind::Redis);
        assert_eq!(payload.calculation_id, calculation_id);
        assert_eq!(payload.payment_id, payment.id);

        let stored = repo.find_by_id(payment.id).await.expect("find").expect("exists");
        assert_eq!(stored, payment);
        assert_eq!(stored.amount, Decimal::new(5_940_000, 2));
    }

    #[tokio::test]
    async fn one_payment_per_calculation() {
        let pool = pool().await;
        let calculation_id = seed_calculation(&pool, 1, FlowKind::Kafka).await;
        let repo = SqlPaymentRepository::new(pool);

        repo.create_pending(new_payment(1, calculation_id), FlowKind::Kafka).await.expect("first");
        let duplicate = repo.create_pending(new_payment(1, calculation_id), FlowKind::Kafka).await;
        assert!(duplicate.is_err());
    }

    #[tokio::test]
    async fn settlement_records_charge_ids() {
        let pool = pool().await;
        let calculation_id = seed_calculation(&pool, 2, FlowKind::Kubernetes).await;
        let repo = SqlPaymentRepository::new(pool);
        let payment =
            repo.create_pending(new_payment(2, calculation_id), FlowKind::Kubernetes).await.expect("create");

        let receipt = ChargeReceipt {
            provider_charge_id: "prov-1".into(),
            channel_charge_id: "tg-1".into(),
        };
        assert!(repo.mark_successful(payment.id, &receipt).await.expect("settle"));
        assert!(!repo.mark_successful(PaymentId(404), &receipt).await.expect("missing"));
        // Settled payments never fall back to failed.
        assert!(!repo.mark_failed(payment.id).await.expect("fail after settle"));

        let stored = repo
            .find_by_calculation(UserId(2), calculation_id)
            .await
            .expect("find")
            .expect("exists");
        assert!(stored.is_settled());
        assert_eq!(stored.provider_charge_id.as_deref(), Some("prov-1"));
        assert_eq!(stored.channel_charge_id.as_deref(), Some("tg-1"));

        assert!(repo.find_by_calculation(UserId(3), calculation_id).await.expect("find").is_none());
    }

    #[tokio::test]
    async fn history_joins_the_flow_newest_first() {
        let pool = pool().await;
        let kafka = seed_calculation(&pool, 4, FlowKind::Kafka).await;
        let rabbit = seed_calculation(&pool, 4, FlowKind::RabbitMq).await;
        let repo = SqlPaymentRepository::new(pool);
        repo.create_pending(new_payment(4, kafka), FlowKind::Kafka).await.expect("kafka");
        repo.create_pending(new_payment(4, rabbit), FlowKind::RabbitMq).await.expect("rabbit");

        let history = repo.list_for_user(UserId(4), 10).await.expect("history");
        let flows: Vec<FlowKind> = history.iter().map(|entry| entry.flow).collect();
        assert_eq!(flows, vec![FlowKind::RabbitMq, FlowKind::Kafka]);
        assert!(repo.list_for_user(UserId(5), 10).await.expect("empty").is_empty());
    }
}
