use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use ulid::Ulid;

use crate::model::{Notification, NotificationKind};

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct NotifyError(pub String);

/// Outbound email/SMS gateway. Delivery may fail independently of the
/// appointment change that triggered it.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Soft failure reported next to a committed change. The notification has
/// been queued for retry under `outbox_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationFailure {
    pub outbox_id: Ulid,
    pub kind: NotificationKind,
    pub reason: String,
}

/// Default gateway: records the dispatch in the log and always succeeds.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, n: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            kind = ?n.kind,
            channel = ?n.channel,
            appointment = %n.appointment_id,
            client = %n.client_id,
            "notification dispatched"
        );
        Ok(())
    }
}
