use std::time::Duration;

use chrono::{NaiveDate, TimeDelta};
use serde::Serialize;
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotificationFailure;
use crate::observability;

use super::Engine;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetryReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReminderReport {
    pub sent: usize,
    pub warnings: Vec<NotificationFailure>,
}

impl Engine {
    /// Deliver a notification for an already-committed change. A failure is
    /// queued in the outbox and returned as a warning, never as an error.
    pub(super) async fn dispatch(&self, notification: Notification) -> Option<NotificationFailure> {
        let err = match self.notifier.deliver(&notification).await {
            Ok(()) => return None,
            Err(e) => e,
        };

        let failed = FailedNotification {
            id: Ulid::new(),
            notification,
            retry_count: 0,
            max_retries: self.max_notification_retries,
            last_error: err.to_string(),
            queued_at: self.clock.now(),
        };
        let warning = NotificationFailure {
            outbox_id: failed.id,
            kind: failed.notification.kind,
            reason: failed.last_error.clone(),
        };
        metrics::counter!(observability::NOTIFICATION_FAILURES_TOTAL).increment(1);
        tracing::warn!(
            outbox = %failed.id,
            kind = ?failed.notification.kind,
            appointment = %failed.notification.appointment_id,
            error = %err,
            "notification failed, queued for retry"
        );

        if let Err(e) = self.record_outbox(Event::NotificationQueued { failed: failed.clone() }).await {
            // Keep the entry in memory so this process still retries it.
            tracing::error!(outbox = %failed.id, error = %e, "failed to journal outbox entry");
            self.outbox.insert(failed.id, failed);
        }
        Some(warning)
    }

    /// One pass over the outbox: retry every entry that still has attempts left.
    pub async fn retry_failed_notifications(&self) -> RetryReport {
        let due: Vec<FailedNotification> = self
            .outbox
            .iter()
            .filter(|entry| entry.retryable())
            .map(|entry| entry.value().clone())
            .collect();

        let mut report = RetryReport { attempted: due.len(), ..RetryReport::default() };
        for entry in due {
            let event = match self.notifier.deliver(&entry.notification).await {
                Ok(()) => {
                    report.delivered += 1;
                    tracing::info!(outbox = %entry.id, kind = ?entry.notification.kind, "queued notification delivered");
                    Event::NotificationDelivered { id: entry.id }
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        outbox = %entry.id,
                        attempt = entry.retry_count + 1,
                        max = entry.max_retries,
                        error = %e,
                        "notification retry failed"
                    );
                    Event::NotificationRetryFailed { id: entry.id, error: e.to_string() }
                }
            };
            if let Err(e) = self.record_outbox(event).await {
                tracing::error!(outbox = %entry.id, error = %e, "failed to journal retry outcome");
            }
        }
        report
    }

    /// Drop exhausted entries queued at least `retention` ago. Returns how many
    /// were discarded.
    pub async fn discard_exhausted_notifications(&self, retention: Duration) -> usize {
        let Some(cutoff) = TimeDelta::from_std(retention)
            .ok()
            .and_then(|age| self.clock.now().checked_sub_signed(age))
        else {
            return 0;
        };
        let expired: Vec<Ulid> = self
            .outbox
            .iter()
            .filter(|entry| !entry.retryable() && entry.queued_at <= cutoff)
            .map(|entry| entry.id)
            .collect();

        let mut discarded = 0;
        for id in expired {
            match self.record_outbox(Event::NotificationDiscarded { id }).await {
                Ok(()) => discarded += 1,
                Err(e) => tracing::error!(outbox = %id, error = %e, "failed to journal discard"),
            }
        }
        if discarded > 0 {
            metrics::counter!(observability::NOTIFICATIONS_DISCARDED_TOTAL).increment(discarded as u64);
            tracing::info!(discarded, "exhausted notifications discarded");
        }
        discarded
    }

    /// Send one reminder per active, not-yet-reminded appointment on `date`.
    pub async fn dispatch_reminders(&self, date: NaiveDate) -> ReminderReport {
        let due: Vec<Ulid> = {
            let store = self.store.read().await;
            store
                .appointments()
                .filter(|a| a.date == date && a.is_active() && !a.reminded)
                .map(|a| a.id)
                .collect()
        };

        let mut report = ReminderReport::default();
        for id in due {
            let appt = {
                let mut store = self.store.write().await;
                // Re-check under the write guard; it may have changed since the scan.
                let appt = match store.appointment(&id) {
                    Some(a) if a.is_active() && !a.reminded && a.date == date => a.clone(),
                    _ => continue,
                };
                if let Err(e) = self.commit(&mut store, Event::ReminderSent { id }).await {
                    tracing::error!(appointment = %id, error = %e, "failed to record reminder");
                    continue;
                }
                appt
            };
            report.sent += 1;
            if let Some(w) = self
                .dispatch(Notification::for_appointment(NotificationKind::Reminder, Channel::Email, &appt))
                .await
            {
                report.warnings.push(w);
            }
        }
        if report.sent > 0 {
            tracing::info!(%date, sent = report.sent, failed = report.warnings.len(), "reminders dispatched");
        }
        report
    }
}
