mod catalog;
mod clock;
mod conflict;
mod duration;
mod error;
mod hours;
mod lifecycle;
mod outbox;
mod queries;
mod store;
#[cfg(test)]
mod tests;

pub use clock::Clock;
pub use conflict::{check_staff_available, conflicting_booking, has_conflicting_booking, overlaps};
pub use duration::{add_duration, occupancy_window, resolve_duration};
pub use error::{BookingError, Entity};
pub use hours::{is_open, validate_hours};
pub use lifecycle::{BookRequest, Outcome, RescheduleRequest};
pub use outbox::{ReminderReport, RetryReport};
pub use queries::ScheduleEntry;
pub use store::{Store, StoreError};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::journal::Journal;
use crate::model::*;
use crate::notify::Notifier;

// ── Group-commit journal channel ─────────────────────────

enum JournalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the journal file. Each wake-up drains every append already queued and
/// commits them with a single fsync.
async fn journal_writer_loop(mut journal: Journal, mut rx: mpsc::Receiver<JournalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let JournalCommand::Append { event, response } = cmd else {
            handle_control(&mut journal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(JournalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut journal, &mut batch);
        if let Some(cmd) = deferred {
            handle_control(&mut journal, cmd);
        }
    }
}

fn commit_batch(journal: &mut Journal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::JOURNAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = batch
        .iter()
        .try_for_each(|(event, _)| journal.append_buffered(event));
    // Flush even after a failed append so half-written bytes do not leak
    // into the next batch.
    let flushed = journal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(crate::observability::JOURNAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_control(journal: &mut Journal, cmd: JournalCommand) {
    match cmd {
        JournalCommand::Compact { events, response } => {
            let result = Journal::write_snapshot(journal.path(), &events)
                .and_then(|()| journal.install_snapshot());
            let _ = response.send(result);
        }
        JournalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(journal.appends_since_compact());
        }
        JournalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub clock: Clock,
    pub max_notification_retries: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            clock: Clock::system(),
            max_notification_retries: 3,
        }
    }
}

/// The scheduling core: catalog, appointments and the notification outbox.
///
/// All scheduling state sits behind one `RwLock`. Mutations hold the write
/// guard across check, journal append and apply, which makes each of them a
/// serializable transaction.
pub struct Engine {
    store: RwLock<Store>,
    journal_tx: mpsc::Sender<JournalCommand>,
    notifier: Arc<dyn Notifier>,
    /// Failed notifications awaiting retry. Written after the appointment
    /// transaction commits, never under the store write lock.
    outbox: DashMap<Ulid, FailedNotification>,
    clock: Clock,
    max_notification_retries: u32,
}

fn apply_to_outbox(outbox: &DashMap<Ulid, FailedNotification>, event: &Event) {
    match event {
        Event::NotificationQueued { failed } => {
            outbox.insert(failed.id, failed.clone());
        }
        Event::NotificationRetryFailed { id, error } => {
            if let Some(mut entry) = outbox.get_mut(id) {
                entry.retry_count += 1;
                entry.last_error = error.clone();
            }
        }
        Event::NotificationDelivered { id } | Event::NotificationDiscarded { id } => {
            outbox.remove(id);
        }
        _ => {}
    }
}

impl Engine {
    /// Must be called from within a tokio runtime: the journal writer is spawned here.
    pub fn new(journal_path: PathBuf, notifier: Arc<dyn Notifier>) -> io::Result<Self> {
        Self::open(journal_path, notifier, EngineOptions::default())
    }

    pub fn open(
        journal_path: PathBuf,
        notifier: Arc<dyn Notifier>,
        options: EngineOptions,
    ) -> io::Result<Self> {
        let events = Journal::replay(&journal_path)?;
        let journal = Journal::open(&journal_path)?;
        let (journal_tx, journal_rx) = mpsc::channel(4096);
        tokio::spawn(journal_writer_loop(journal, journal_rx));

        let mut store = Store::new();
        let outbox = DashMap::new();
        for event in &events {
            store.apply(event);
            apply_to_outbox(&outbox, event);
        }
        tracing::info!(
            events = events.len(),
            path = %journal_path.display(),
            "journal replayed"
        );
        let engine = Self {
            store: RwLock::new(store),
            journal_tx,
            notifier,
            outbox,
            clock: options.clock,
            max_notification_retries: options.max_notification_retries,
        };
        engine.record_outbox_gauges();
        Ok(engine)
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    async fn journal_append(&self, event: &Event) -> Result<(), BookingError> {
        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| BookingError::Journal("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| BookingError::Journal("journal writer dropped response".into()))?
            .map_err(|e| BookingError::Journal(e.to_string()))
    }

    /// Constraint check + journal append + apply. The caller holds the write guard.
    async fn commit(&self, store: &mut Store, event: Event) -> Result<(), BookingError> {
        store.check_constraints(&event)?;
        self.journal_append(&event).await?;
        store.apply(&event);
        Ok(())
    }

    /// Journal an outbox change and apply it. Holding the store read guard keeps
    /// it out of the way of compaction, which takes the write guard.
    async fn record_outbox(&self, event: Event) -> Result<(), BookingError> {
        let _guard = self.store.read().await;
        self.journal_append(&event).await?;
        apply_to_outbox(&self.outbox, &event);
        self.record_outbox_gauges();
        Ok(())
    }

    fn record_outbox_gauges(&self) {
        let exhausted = self.outbox.iter().filter(|entry| !entry.retryable()).count();
        metrics::gauge!(crate::observability::OUTBOX_SIZE).set(self.outbox.len() as f64);
        metrics::gauge!(crate::observability::OUTBOX_EXHAUSTED).set(exhausted as f64);
    }

    /// Rewrite the journal as a snapshot of the current state.
    pub async fn compact_journal(&self) -> Result<(), BookingError> {
        let store = self.store.write().await;
        let mut events = store.snapshot();
        events.extend(
            self.outbox
                .iter()
                .map(|entry| Event::NotificationQueued { failed: entry.value().clone() }),
        );

        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| BookingError::Journal("journal writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| BookingError::Journal("journal writer dropped response".into()))?
            .map_err(|e| BookingError::Journal(e.to_string()));
        drop(store);
        result
    }

    pub async fn journal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .journal_tx
            .send(JournalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
