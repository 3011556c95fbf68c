use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

const COMPACTION_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that re-delivers queued notifications and drops exhausted
/// ones once `retention` has passed.
pub async fn run_retry_sweep(engine: Arc<Engine>, every: Duration, retention: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        engine.discard_exhausted_notifications(retention).await;
        let report = engine.retry_failed_notifications().await;
        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                delivered = report.delivered,
                failed = report.failed,
                "outbox retry sweep"
            );
        }
    }
}

/// Background task that sends day-of reminders for today's appointments.
pub async fn run_reminder_sweep(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let today = engine.clock().now().date();
        engine.dispatch_reminders(today).await;
    }
}

/// Background task that compacts the journal once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACTION_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}

pub(crate) async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.journal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_journal().await {
        Ok(()) => {
            info!(appends, "journal compacted");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "journal compaction failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{BookRequest, Clock, EngineOptions};
    use crate::model::*;
    use crate::notify::testing::RecordingNotifier;
    use chrono::{NaiveDate, NaiveTime};
    use std::path::PathBuf;

    fn test_journal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("appointd_test_sweeper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    async fn engine_with_booking(name: &str) -> (Arc<Engine>, Arc<RecordingNotifier>) {
        let date = NaiveDate::from_ymd_opt(2026, 10, 14).unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let options = EngineOptions {
            clock: Clock::fixed(date.and_time(t(8, 0))),
            max_notification_retries: 3,
        };
        let engine = Arc::new(Engine::open(test_journal_path(name), notifier.clone(), options).unwrap());

        let business = engine
            .register_business("Spa", "pw", OperatingHours::weekdays(t(9, 0), t(17, 0)))
            .await
            .unwrap();
        let service = engine.add_service(business.id, "Massage", None, 6_000, 1.0).await.unwrap();
        let client = engine.register_client("Neema", "neema@example.com", "").await.unwrap();
        notifier.set_failing(true);
        engine
            .book(BookRequest {
                client_id: client.id,
                service_id: service.id,
                staff_id: None,
                date,
                time: t(10, 0),
                comment: None,
            })
            .await
            .unwrap();
        notifier.set_failing(false);
        (engine, notifier)
    }

    #[tokio::test]
    async fn retry_sweep_drains_outbox() {
        let (engine, notifier) = engine_with_booking("retry_sweep.journal").await;
        assert_eq!(engine.failed_notifications().len(), 1);

        let task = tokio::spawn(run_retry_sweep(
            engine.clone(),
            Duration::from_millis(10),
            Duration::from_secs(3600),
        ));
        for _ in 0..100 {
            if engine.failed_notifications().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        task.abort();

        assert!(engine.failed_notifications().is_empty());
        assert_eq!(notifier.kinds(), vec![NotificationKind::Confirmation]);
    }

    #[tokio::test]
    async fn reminder_sweep_uses_engine_clock() {
        let (engine, notifier) = engine_with_booking("reminder_sweep.journal").await;

        let task = tokio::spawn(run_reminder_sweep(engine.clone(), Duration::from_millis(10)));
        for _ in 0..100 {
            if notifier.kinds().contains(&NotificationKind::Reminder) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        task.abort();

        let reminders = notifier
            .kinds()
            .into_iter()
            .filter(|k| *k == NotificationKind::Reminder)
            .count();
        assert_eq!(reminders, 1);
    }

    #[tokio::test]
    async fn compaction_waits_for_threshold() {
        let (engine, _) = engine_with_booking("compactor.journal").await;
        let appends = engine.journal_appends_since_compact().await;
        assert!(appends > 0);

        assert!(!compact_if_due(&engine, appends + 1).await);
        assert!(compact_if_due(&engine, appends).await);
        assert_eq!(engine.journal_appends_since_compact().await, 0);
    }
}
