use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;
use ulid::Ulid;

use crate::model::*;

use super::conflict::appointment_window;
use super::hours::is_open;
use super::{BookingError, Engine, Entity};

/// One entry of a staff member's day: what is booked and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleEntry {
    pub appointment_id: Ulid,
    pub window: Span,
    pub state: AppointmentState,
}

fn sorted(mut appts: Vec<Appointment>) -> Vec<Appointment> {
    appts.sort_by_key(|a| (a.starts_at(), a.id));
    appts
}

impl Engine {
    pub async fn appointment(&self, id: &Ulid) -> Option<Appointment> {
        self.store.read().await.appointment(id).cloned()
    }

    pub async fn business(&self, id: &Ulid) -> Option<Business> {
        self.store.read().await.business(id).cloned()
    }

    pub async fn service(&self, id: &Ulid) -> Option<Service> {
        self.store.read().await.service(id).cloned()
    }

    pub async fn staff(&self, id: &Ulid) -> Option<Staff> {
        self.store.read().await.staff(id).cloned()
    }

    pub async fn client(&self, id: &Ulid) -> Option<Client> {
        self.store.read().await.client(id).cloned()
    }

    /// Every appointment of the client, cancelled ones included, by start.
    pub async fn client_appointments(&self, client_id: &Ulid) -> Vec<Appointment> {
        let store = self.store.read().await;
        sorted(store.client_appointments(client_id).cloned().collect())
    }

    pub async fn business_appointments(&self, business_id: &Ulid) -> Vec<Appointment> {
        let store = self.store.read().await;
        sorted(store.business_appointments(business_id).cloned().collect())
    }

    /// Non-cancelled occupancy windows of the staff member that touch `date`,
    /// including a previous-day booking that runs past midnight.
    pub async fn staff_schedule(&self, staff_id: Ulid, date: NaiveDate) -> Result<Vec<ScheduleEntry>, BookingError> {
        let store = self.store.read().await;
        store
            .staff(&staff_id)
            .ok_or(BookingError::NotFound(Entity::Staff, staff_id))?;

        let mut entries = Vec::new();
        for appt in store.staff_appointments(&staff_id) {
            if appt.is_cancelled() {
                continue;
            }
            let window = appointment_window(&store, appt)?;
            if window.touches_date(date) {
                entries.push(ScheduleEntry {
                    appointment_id: appt.id,
                    window,
                    state: appt.state,
                });
            }
        }
        entries.sort_by_key(|e| e.window.start);
        Ok(entries)
    }

    pub async fn is_business_open(
        &self,
        business_id: Ulid,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<bool, BookingError> {
        let store = self.store.read().await;
        let business = store
            .business(&business_id)
            .ok_or(BookingError::NotFound(Entity::Business, business_id))?;
        Ok(is_open(time, date, &business.hours))
    }

    /// Outbox contents, oldest first.
    pub fn failed_notifications(&self) -> Vec<FailedNotification> {
        let mut entries: Vec<_> = self.outbox.iter().map(|e| e.value().clone()).collect();
        entries.sort_by_key(|e| (e.queued_at, e.id));
        entries
    }
}
