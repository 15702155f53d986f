use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sizer_chat::ConversationService;
use sizer_core::flows::SessionStore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Evicts idle dialogs and forgets their locks.
pub async fn sweep_once(
    sessions: &dyn SessionStore,
    conversation: &ConversationService,
    idle_timeout: chrono::Duration,
) -> usize {
    let evicted = match sessions.sweep_expired(idle_timeout, Utc::now()).await {
        Ok(evicted) => evicted,
        Err(error) => {
            warn!(
                event_name = "system.sweeper.failed",
                correlation_id = "sweeper",
                error = %error,
                "session sweep failed"
            );
            0
        }
    };
    let pruned = conversation.prune_locks();

    if evicted > 0 {
        info!(
            event_name = "system.sweeper.evicted",
            correlation_id = "sweeper",
            evicted,
            pruned_locks = pruned,
            "idle sessions evicted"
        );
    } else {
        debug!(event_name = "system.sweeper.idle", pruned_locks = pruned);
    }
    evicted
}

pub fn spawn(
    sessions: Arc<dyn SessionStore>,
    conversation: Arc<ConversationService>,
    idle_timeout: chrono::Duration,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sweep_once(sessions.as_ref(), &conversation, idle_timeout).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use sizer_agent::AgentRuntime;
    use sizer_chat::alerts::AdminAlerts;
    use sizer_chat::payments::{BillingSettings, PaymentDesk};
    use sizer_chat::{
        ConversationService, ConversationServices, ConversationSettings, RecordingChannel,
    };
    use sizer_core::audit::InMemoryAuditSink;
    use sizer_core::flows::{FlowEngine, InMemorySessionStore, SessionStore};
    use sizer_core::{ChatId, FlowKind, SessionKey, StandardFormulas, UserId};
    use sizer_db::repositories::{
        InMemoryCalculationRepository, InMemoryPaymentRepository, InMemoryUserRepository,
    };

    use super::sweep_once;

    fn conversation(sessions: Arc<InMemorySessionStore>) -> ConversationService {
        let channel = Arc::new(RecordingChannel::new());
        let users = Arc::new(InMemoryUserRepository::default());
        let calculations = Arc::new(InMemoryCalculationRepository::default());
        let audit = Arc::new(InMemoryAuditSink::default());
        let alerts = AdminAlerts::new(users.clone(), channel.clone());
        let payments = PaymentDesk::new(
            calculations.clone(),
            Arc::new(InMemoryPaymentRepository::default()),
            channel.clone(),
            channel.clone(),
            alerts.clone(),
            audit.clone(),
            BillingSettings::default(),
        );
        ConversationService::new(
            ConversationServices {
                runtime: Arc::new(AgentRuntime::new(
                    Arc::new(StandardFormulas),
                    calculations.clone(),
                    users.clone(),
                    audit.clone(),
                )),
                sessions,
                users,
                calculations,
                messaging: channel,
                payments,
                alerts,
                audit,
            },
            ConversationSettings::default(),
        )
    }

    #[tokio::test]
    async fn sweep_evicts_idle_sessions_only() {
        let sessions = Arc::new(InMemorySessionStore::default());
        let engine = FlowEngine::default();

        let (mut stale, _) = engine.start(FlowKind::Redis).expect("start");
        stale.updated_at = Utc::now() - Duration::hours(2);
        let (fresh, _) = engine.start(FlowKind::Kafka).expect("start");
        sessions.save(&SessionKey::new(UserId(1), ChatId(1)), stale).await.expect("save");
        sessions.save(&SessionKey::new(UserId(2), ChatId(2)), fresh).await.expect("save");

        let service = conversation(sessions.clone());
        assert_eq!(sweep_once(sessions.as_ref(), &service, Duration::hours(1)).await, 1);
        assert!(sessions
            .load(&SessionKey::new(UserId(2), ChatId(2)))
            .await
            .expect("load")
            .is_some());
    }
}
