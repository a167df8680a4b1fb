use std::sync::Arc;

use ripple_core::auth::UserSummary;
use ripple_core::errors::RelayError;
use ripple_core::ids::{PostId, UserId};
use ripple_core::wire::{notifications_group, NotificationKind, NotificationPush, RelayEvent};
use ripple_store::notifications::{NotificationRecord, NotificationRepo};

/// Entry point for domain events ("comment created", "new follower").
/// Persists the notification record, then fans the push out to the
/// recipient's notification group.
pub struct Notifier {
    repo: NotificationRepo,
    router: Arc<dyn crate::router::EventRouter>,
}

impl Notifier {
    pub fn new(repo: NotificationRepo, router: Arc<dyn crate::router::EventRouter>) -> Self {
        Self { repo, router }
    }

    pub async fn notify_user(
        &self,
        recipient: UserId,
        sender: &UserSummary,
        kind: NotificationKind,
        post: Option<PostId>,
    ) -> Result<NotificationRecord, RelayError> {
        let record = self
            .repo
            .create(recipient, sender.id, kind, post)
            .map_err(|e| RelayError::Store(e.to_string()))?;

        let push = NotificationPush {
            id: record.id,
            notification_type: kind,
            sender: sender.sender_ref(),
            post,
            created_at: record.created_at.clone(),
        };
        let delivered = self
            .router
            .publish(&notifications_group(recipient), &RelayEvent::Notification(push))
            .await;

        tracing::info!(
            recipient = %recipient,
            sender = %sender.id,
            kind = %kind,
            delivered,
            "notification fanned out"
        );
        Ok(record)
    }
}
