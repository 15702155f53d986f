use std::sync::Arc;

use sizer_core::ChatId;
use sizer_db::repositories::UserRepository;
use tracing::{error, warn};

use crate::blocks::MessageTemplate;
use crate::channel::MessagingChannel;
use crate::events::EventContext;

/// Operator notifications. Admins are users flagged `is_admin` and not banned; their
/// private chat id equals their user id.
#[derive(Clone)]
pub struct AdminAlerts {
    users: Arc<dyn UserRepository>,
    messaging: Arc<dyn MessagingChannel>,
}

impl AdminAlerts {
    pub fn new(users: Arc<dyn UserRepository>, messaging: Arc<dyn MessagingChannel>) -> Self {
        Self { users, messaging }
    }

    /// Returns how many admins were reached. Never fails the caller.
    pub async fn notify(&self, ctx: &EventContext, summary: &str) -> usize {
        error!(
            event_name = "ops.alert",
            correlation_id = %ctx.correlation_id,
            summary,
            "operator alert raised"
        );

        let admins = match self.users.list_admins().await {
            Ok(admins) => admins,
            Err(lookup_error) => {
                warn!(
                    event_name = "ops.alert_lookup_failed",
                    correlation_id = %ctx.correlation_id,
                    error = %lookup_error,
                    "could not load admin list"
                );
                return 0;
            }
        };

        let message =
            MessageTemplate::plain(format!("⚠️ {summary}\nCorrelation ID: {}", ctx.correlation_id));
        let mut delivered = 0;
        for admin in admins {
            match self.messaging.send(ChatId(admin.0), &message).await {
                Ok(_) => delivered += 1,
                Err(send_error) => warn!(
                    event_name = "ops.alert_delivery_failed",
                    correlation_id = %ctx.correlation_id,
                    admin_id = %admin,
                    error = %send_error,
                    "could not deliver operator alert"
                ),
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sizer_core::{ChatId, UserId, UserProfile};
    use sizer_db::repositories::{InMemoryUserRepository, UserRepository};

    use super::AdminAlerts;
    use crate::channel::{ChannelCall, RecordingChannel};
    use crate::events::EventContext;

    #[tokio::test]
    async fn alerts_reach_admins_that_are_not_banned() {
        let users = Arc::new(InMemoryUserRepository::default());
        for id in [1, 2, 3] {
            users.upsert_profile(&UserProfile::new(UserId(id), "ops")).await.expect("upsert");
        }
        users.set_admin(UserId(1), true).await.expect("admin");
        users.set_admin(UserId(2), true).await.expect("admin");
        users.ban(UserId(2), "test").await.expect("ban");

        let channel = Arc::new(RecordingChannel::new());
        let alerts = AdminAlerts::new(users, channel.clone());
        let ctx = EventContext { correlation_id: "upd-9".to_owned() };

        assert_eq!(alerts.notify(&ctx, "save failed").await, 1);
        let calls = channel.calls();
        assert!(matches!(
            &calls[..],
            [ChannelCall::Send { chat: ChatId(1), message, .. }]
                if message.text.contains("save failed") && message.text.contains("upd-9")
        ));
    }
}
