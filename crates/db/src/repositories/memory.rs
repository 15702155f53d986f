use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use tokio::sync::RwLock;

use sizer_core::billing::InvoicePayload;
use sizer_core::domain::calculation::{CalculationId, CalculationRecord, NewCalculation};
use sizer_core::domain::payment::{
    ChargeReceipt, NewPayment, PaymentHistoryEntry, PaymentId, PaymentRecord, PaymentStatus,
};
use sizer_core::domain::service::FlowKind;
use sizer_core::domain::user::{UserId, UserProfile};

use super::{CalculationRepository, PaymentRepository, RepositoryError, UserRepository};

#[derive(Default)]
pub struct InMemoryCalculationRepository {
    calculations: RwLock<BTreeMap<i64, CalculationRecord>>,
}

impl InMemoryCalculationRepository {
    pub async fn len(&self) -> usize {
        self.calculations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.calculations.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl CalculationRepository for InMemoryCalculationRepository {
    async fn save(
        &self,
        calculation: NewCalculation,
    ) -> Result<CalculationRecord, RepositoryError> {
        let mut calculations = self.calculations.write().await;
        let id = calculations.keys().next_back().map_or(1, |last| last + 1);
        let record = CalculationRecord::from_new(CalculationId(id), calculation, Utc::now());
        calculations.insert(id, record.clone());
        Ok(record)
    }

    async fn find_for_user(
        &self,
        user_id: UserId,
        id: CalculationId,
    ) -> Result<Option<CalculationRecord>, RepositoryError> {
        let calculations = self.calculations.read().await;
        Ok(calculations.get(&id.0).filter(|record| record.user_id == user_id).cloned())
    }

    async fn load_history(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<CalculationRecord>, RepositoryError> {
        let calculations = self.calculations.read().await;
        Ok(calculations
            .values()
            .rev()
            .filter(|record| record.user_id == user_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryPaymentRepository {
    payments: RwLock<BTreeMap<i64, PaymentHistoryEntry>>,
}

#[async_trait::async_trait]
impl PaymentRepository for InMemoryPaymentRepository {
    async fn create_pending(
        &self,
        payment: NewPayment,
        flow: FlowKind,
    ) -> Result<PaymentRecord, RepositoryError> {
        let mut payments = self.payments.write().await;
        if payments.values().any(|entry| entry.payment.calculation_id == payment.calculation_id) {
            return Err(RepositoryError::Conflict(format!(
                "calculation #{} already has a payment",
                payment.calculation_id
            )));
        }

        let id = PaymentId(payments.keys().next_back().map_or(1, |last| last + 1));
        let record = PaymentRecord {
            id,
            user_id: payment.user_id,
            calculation_id: payment.calculation_id,
            payload: InvoicePayload::new(flow, payment.calculation_id, id).render(),
            amount: payment.amount,
            currency: payment.currency,
            status: PaymentStatus::Pending,
            provider_charge_id: None,
            channel_charge_id: None,
            created_at: Utc::now(),
        };
        payments.insert(id.0, PaymentHistoryEntry { payment: record.clone(), flow });
        Ok(record)
    }

    async fn find_by_id(&self, id: PaymentId) -> Result<Option<PaymentRecord>, RepositoryError> {
        let payments = self.payments.read().await;
        Ok(payments.get(&id.0).map(|entry| entry.payment.clone()))
    }

    async fn find_by_calculation(
        &self,
        user_id: UserId,
        calculation_id: CalculationId,
    ) -> Result<Option<PaymentRecord>, RepositoryError> {
        let payments = self.payments.read().await;
        Ok(payments
            .values()
            .map(|entry| &entry.payment)
            .find(|payment| payment.calculation_id == calculation_id && payment.user_id == user_id)
            .cloned())
    }

    async fn mark_successful(
        &self,
        id: PaymentId,
        receipt: &ChargeReceipt,
    ) -> Result<bool, RepositoryError> {
        let mut payments = self.payments.write().await;
        let Some(entry) = payments.get_mut(&id.0) else {
            return Ok(false);
        };
        entry.payment.status = PaymentStatus::Successful;
        entry.payment.provider_charge_id = Some(receipt.provider_charge_id.clone());
        entry.payment.channel_charge_id = Some(receipt.channel_charge_id.clone());
        Ok(true)
    }

    async fn mark_failed(&self, id: PaymentId) -> Result<bool, RepositoryError> {
        let mut payments = self.payments.write().await;
        match payments.get_mut(&id.0) {
            Some(entry) if entry.payment.status == PaymentStatus::Pending => {
                entry.payment.status = PaymentStatus::Failed;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_for_user(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<PaymentHistoryEntry>, RepositoryError> {
        let payments = self.payments.read().await;
        Ok(payments
            .values()
            .rev()
            .filter(|entry| entry.payment.user_id == user_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryUserRepository {
    users: RwLock<HashMap<UserId, UserProfile>>,
}

#[async_trait::async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), RepositoryError> {
        let mut users = self.users.write().await;
        let entry = users.entry(profile.user_id).or_insert_with(|| profile.clone());
        entry.display_name = profile.display_name.clone();
        entry.username = profile.username.clone();
        entry.language_code = profile.language_code.clone();
        Ok(())
    }

    async fn find(&self, user_id: UserId) -> Result<Option<UserProfile>, RepositoryError> {
        Ok(self.users.read().await.get(&user_id).cloned())
    }

    async fn is_banned(&self, user_id: UserId) -> Result<bool, RepositoryError> {
        Ok(self.users.read().await.get(&user_id).is_some_and(|user| user.is_banned))
    }

    async fn ban(&self, user_id: UserId, _reason: &str) -> Result<(), RepositoryError> {
        let mut users = self.users.write().await;
        users.entry(user_id).or_insert_with(|| UserProfile::new(user_id, "")).is_banned = true;
        Ok(())
    }

    async fn set_admin(&self, user_id: UserId, is_admin: bool) -> Result<(), RepositoryError> {
        let mut users = self.users.write().await;
        users.entry(user_id).or_insert_with(|| UserProfile::new(user_id, "")).is_admin = is_admin;
        Ok(())
    }

    async fn list_admins(&self) -> Result<Vec<UserId>, RepositoryError> {
        let users = self.users.read().await;
        let mut admins: Vec<UserId> = users
            .values()
            .filter(|user| user.is_admin && !user.is_banned)
            .map(|user| user.user_id)
            .collect();
        admins.sort();
        Ok(admins)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use sizer_core::domain::calculation::{NewCalculation, ParameterSet, SizingResult};
    use sizer_core::domain::payment::{NewPayment, PaymentStatus};
    use sizer_core::domain::service::FlowKind;
    use sizer_core::domain::user::{UserId, UserProfile};

    use super::{InMemoryCalculationRepository, InMemoryPaymentRepository, InMemoryUserRepository};
    use crate::repositories::{
        CalculationRepository, PaymentRepository, RepositoryError, UserRepository,
    };

    fn calculation(user: i64) -> NewCalculation {
        NewCalculation {
            user_id: UserId(user),
            flow: FlowKind::Redis,
            input_params: ParameterSet::new(),
            result: SizingResult::new(),
            ai_adjustments: None,
            additional_conditions: None,
        }
    }

    #[tokio::test]
    async fn in_memory_calculation_history_is_newest_first() {
        let repo = InMemoryCalculationRepository::default();
        let first = repo.save(calculation(1)).await.expect("save");
        let second = repo.save(calculation(1)).await.expect("save");
        repo.save(calculation(2)).await.expect("save");

        let history = repo.load_history(UserId(1), 10).await.expect("history");
        let ids: Vec<_> = history.iter().map(|record| record.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
        assert!(repo.find_for_user(UserId(2), first.id).await.expect("find").is_none());
    }

    #[tokio::test]
    async fn in_memory_payments_enforce_one_per_calculation() {
        let calculations = InMemoryCalculationRepository::default();
        let record = calculations.save(calculation(1)).await.expect("save");
        let repo = InMemoryPaymentRepository::default();
        let payment = NewPayment {
            user_id: UserId(1),
            calculation_id: record.id,
            amount: Decimal::new(1000, 0),
            currency: "RUB".into(),
        };

        let created = repo.create_pending(payment.clone(), FlowKind::Redis).await.expect("create");
        assert_eq!(created.payload, format!("redis_{}_{}", record.id, created.id));
        assert!(matches!(
            repo.create_pending(payment, FlowKind::Redis).await,
            Err(RepositoryError::Conflict(_))
        ));

        assert!(repo.mark_failed(created.id).await.expect("fail"));
        let stored = repo.find_by_id(created.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn in_memory_users_keep_flags_across_upserts() {
        let repo = InMemoryUserRepository::default();
        repo.set_admin(UserId(9), true).await.expect("promote");
        repo.upsert_profile(&UserProfile::new(UserId(9), "Admin")).await.expect("upsert");

        let stored = repo.find(UserId(9)).await.expect("find").expect("exists");
        assert!(stored.is_admin);
        assert_eq!(stored.display_name, "Admin");
        assert_eq!(repo.list_admins().await.expect("admins"), vec![UserId(9)]);

        repo.ban(UserId(9), "test").await.expect("ban");
        assert!(repo.is_banned(UserId(9)).await.expect("banned"));
        assert!(repo.list_admins().await.expect("admins").is_empty());
    }
}
