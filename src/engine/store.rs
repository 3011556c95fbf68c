use std::collections::HashMap;

use chrono::NaiveDateTime;
use thiserror::Error;
use ulid::Ulid;

use crate::model::*;

/// Uniqueness constraint violations detected before an event is applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("client slot already held by appointment {existing}")]
    ClientSlotTaken { existing: Ulid },
    #[error("staff {staff_id} slot already held by appointment {existing}")]
    StaffSlotTaken { staff_id: Ulid, existing: Ulid },
}

/// In-memory scheduling state plus the secondary indices the checkers read.
///
/// `client_slots` and `staff_slots` hold every non-cancelled appointment keyed
/// by its exact start. They double as the uniqueness constraints on
/// `(client_id, date, time)` and `(staff_id, date, time)`.
#[derive(Debug, Default)]
pub struct Store {
    businesses: HashMap<Ulid, Business>,
    services: HashMap<Ulid, Service>,
    staff: HashMap<Ulid, Staff>,
    exceptions: HashMap<Ulid, StaffAvailability>,
    clients: HashMap<Ulid, Client>,
    appointments: HashMap<Ulid, Appointment>,

    services_by_business: HashMap<Ulid, Vec<Ulid>>,
    staff_by_business: HashMap<Ulid, Vec<Ulid>>,
    exceptions_by_staff: HashMap<Ulid, Vec<Ulid>>,
    by_client: HashMap<Ulid, Vec<Ulid>>,
    by_staff: HashMap<Ulid, Vec<Ulid>>,
    by_business: HashMap<Ulid, Vec<Ulid>>,

    client_slots: HashMap<(Ulid, NaiveDateTime), Ulid>,
    staff_slots: HashMap<(Ulid, NaiveDateTime), Ulid>,
}

fn push_index(index: &mut HashMap<Ulid, Vec<Ulid>>, key: Ulid, id: Ulid) {
    let ids = index.entry(key).or_default();
    if !ids.contains(&id) {
        ids.push(id);
    }
}

fn drop_index(index: &mut HashMap<Ulid, Vec<Ulid>>, key: &Ulid, id: &Ulid) {
    if let Some(ids) = index.get_mut(key) {
        ids.retain(|x| x != id);
    }
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Lookups ──────────────────────────────────────────────

    pub fn business(&self, id: &Ulid) -> Option<&Business> {
        self.businesses.get(id)
    }

    pub fn business_count(&self) -> usize {
        self.businesses.len()
    }

    pub fn service(&self, id: &Ulid) -> Option<&Service> {
        self.services.get(id)
    }

    pub fn staff(&self, id: &Ulid) -> Option<&Staff> {
        self.staff.get(id)
    }

    pub fn exception(&self, id: &Ulid) -> Option<&StaffAvailability> {
        self.exceptions.get(id)
    }

    pub fn client(&self, id: &Ulid) -> Option<&Client> {
        self.clients.get(id)
    }

    pub fn appointment(&self, id: &Ulid) -> Option<&Appointment> {
        self.appointments.get(id)
    }

    pub fn service_count(&self, business_id: &Ulid) -> usize {
        self.services_by_business.get(business_id).map_or(0, Vec::len)
    }

    pub fn staff_count(&self, business_id: &Ulid) -> usize {
        self.staff_by_business.get(business_id).map_or(0, Vec::len)
    }

    pub fn staff_exceptions(&self, staff_id: &Ulid) -> impl Iterator<Item = &StaffAvailability> {
        self.exceptions_by_staff
            .get(staff_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.exceptions.get(id))
    }

    pub fn client_appointments(&self, client_id: &Ulid) -> impl Iterator<Item = &Appointment> {
        self.resolve(self.by_client.get(client_id))
    }

    pub fn staff_appointments(&self, staff_id: &Ulid) -> impl Iterator<Item = &Appointment> {
        self.resolve(self.by_staff.get(staff_id))
    }

    pub fn business_appointments(&self, business_id: &Ulid) -> impl Iterator<Item = &Appointment> {
        self.resolve(self.by_business.get(business_id))
    }

    pub fn appointments(&self) -> impl Iterator<Item = &Appointment> {
        self.appointments.values()
    }

    fn resolve<'a>(&'a self, ids: Option<&'a Vec<Ulid>>) -> impl Iterator<Item = &'a Appointment> {
        ids.into_iter()
            .flatten()
            .filter_map(|id| self.appointments.get(id))
    }

    /// Non-cancelled appointment holding the client's exact start, if any.
    pub fn client_slot(&self, client_id: Ulid, start: NaiveDateTime) -> Option<Ulid> {
        self.client_slots.get(&(client_id, start)).copied()
    }

    // ── Constraints ──────────────────────────────────────────

    fn slot_free(
        slots: &HashMap<(Ulid, NaiveDateTime), Ulid>,
        owner: Ulid,
        start: NaiveDateTime,
        appointment_id: Ulid,
    ) -> Result<(), Ulid> {
        match slots.get(&(owner, start)) {
            Some(existing) if *existing != appointment_id => Err(*existing),
            _ => Ok(()),
        }
    }

    fn check_slots(
        &self,
        appointment_id: Ulid,
        client_id: Ulid,
        staff_id: Option<Ulid>,
        start: NaiveDateTime,
    ) -> Result<(), StoreError> {
        Self::slot_free(&self.client_slots, client_id, start, appointment_id)
            .map_err(|existing| StoreError::ClientSlotTaken { existing })?;
        if let Some(staff_id) = staff_id {
            Self::slot_free(&self.staff_slots, staff_id, start, appointment_id)
                .map_err(|existing| StoreError::StaffSlotTaken { staff_id, existing })?;
        }
        Ok(())
    }

    /// Verify an event would not break slot uniqueness. Call before journaling.
    pub fn check_constraints(&self, event: &Event) -> Result<(), StoreError> {
        match event {
            Event::AppointmentBooked { appointment: a } if !a.is_cancelled() => {
                self.check_slots(a.id, a.client_id, a.staff_id, a.starts_at())
            }
            Event::AppointmentRescheduled { id, date, time, staff_id, .. } => {
                match self.appointments.get(id) {
                    Some(a) => self.check_slots(*id, a.client_id, *staff_id, date.and_time(*time)),
                    None => Ok(()),
                }
            }
            Event::StaffAssigned { id, staff_id } => match self.appointments.get(id) {
                Some(a) => Self::slot_free(&self.staff_slots, *staff_id, a.starts_at(), *id)
                    .map_err(|existing| StoreError::StaffSlotTaken { staff_id: *staff_id, existing }),
                None => Ok(()),
            },
            _ => Ok(()),
        }
    }

    // ── Slot + staff index maintenance ───────────────────────

    fn index_slots(&mut self, id: Ulid) {
        let Some(a) = self.appointments.get(&id) else { return };
        if a.is_cancelled() {
            return;
        }
        let start = a.starts_at();
        self.client_slots.insert((a.client_id, start), id);
        if let Some(staff_id) = a.staff_id {
            self.staff_slots.insert((staff_id, start), id);
        }
    }

    fn unindex_slots(&mut self, id: Ulid) {
        let Some(a) = self.appointments.get(&id) else { return };
        let start = a.starts_at();
        if self.client_slots.get(&(a.client_id, start)) == Some(&id) {
            self.client_slots.remove(&(a.client_id, start));
        }
        if let Some(staff_id) = a.staff_id
            && self.staff_slots.get(&(staff_id, start)) == Some(&id)
        {
            self.staff_slots.remove(&(staff_id, start));
        }
    }

    fn set_staff(&mut self, id: Ulid, staff_id: Option<Ulid>) {
        let Some(a) = self.appointments.get_mut(&id) else { return };
        if let Some(old) = a.staff_id {
            drop_index(&mut self.by_staff, &old, &id);
        }
        a.staff_id = staff_id;
        if let Some(new) = staff_id {
            push_index(&mut self.by_staff, new, id);
        }
    }

    // ── Event application ────────────────────────────────────

    /// Apply a journaled event. Constraints must already have been checked.
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::BusinessRegistered { business } => {
                self.businesses.insert(business.id, business.clone());
            }
            Event::BusinessVerified { id } => {
                if let Some(b) = self.businesses.get_mut(id) {
                    b.verified = true;
                }
            }
            Event::OperatingHoursSet { business_id, hours } => {
                if let Some(b) = self.businesses.get_mut(business_id) {
                    b.hours = *hours;
                }
            }
            Event::ServiceAdded { service } => {
                push_index(&mut self.services_by_business, service.business_id, service.id);
                self.services.insert(service.id, service.clone());
            }
            Event::StaffAdded { staff } => {
                push_index(&mut self.staff_by_business, staff.employer_id, staff.id);
                self.staff.insert(staff.id, staff.clone());
            }
            Event::StaffRemoved { id } => {
                let assigned = self.by_staff.remove(id).unwrap_or_default();
                for appt_id in assigned {
                    self.unindex_slots(appt_id);
                    if let Some(a) = self.appointments.get_mut(&appt_id) {
                        a.staff_id = None;
                    }
                    self.index_slots(appt_id);
                }
                for ex_id in self.exceptions_by_staff.remove(id).unwrap_or_default() {
                    self.exceptions.remove(&ex_id);
                }
                if let Some(staff) = self.staff.remove(id) {
                    drop_index(&mut self.staff_by_business, &staff.employer_id, id);
                }
            }
            Event::ExceptionAdded { exception } => {
                push_index(&mut self.exceptions_by_staff, exception.staff_id, exception.id);
                self.exceptions.insert(exception.id, exception.clone());
            }
            Event::ExceptionRemoved { id } => {
                if let Some(ex) = self.exceptions.remove(id) {
                    drop_index(&mut self.exceptions_by_staff, &ex.staff_id, id);
                }
            }
            Event::ClientRegistered { client } => {
                self.clients.insert(client.id, client.clone());
            }
            Event::AppointmentBooked { appointment } => {
                let id = appointment.id;
                push_index(&mut self.by_client, appointment.client_id, id);
                push_index(&mut self.by_business, appointment.business_id, id);
                if let Some(staff_id) = appointment.staff_id {
                    push_index(&mut self.by_staff, staff_id, id);
                }
                self.appointments.insert(id, appointment.clone());
                self.index_slots(id);
            }
            Event::AppointmentRescheduled { id, date, time, staff_id, comment } => {
                self.unindex_slots(*id);
                self.set_staff(*id, *staff_id);
                if let Some(a) = self.appointments.get_mut(id) {
                    a.date = *date;
                    a.time = *time;
                    a.comment = comment.clone();
                    a.reminded = false;
                }
                self.index_slots(*id);
            }
            Event::StaffAssigned { id, staff_id } => {
                self.unindex_slots(*id);
                self.set_staff(*id, Some(*staff_id));
                self.index_slots(*id);
            }
            Event::AppointmentCancelled { id, comment } => {
                self.unindex_slots(*id);
                if let Some(a) = self.appointments.get_mut(id) {
                    a.state = AppointmentState::Cancelled;
                    if comment.is_some() {
                        a.comment = comment.clone();
                    }
                }
            }
            Event::AppointmentCompleted { id } => {
                if let Some(a) = self.appointments.get_mut(id) {
                    a.state = AppointmentState::Completed;
                }
            }
            Event::ReminderSent { id } => {
                if let Some(a) = self.appointments.get_mut(id) {
                    a.reminded = true;
                }
            }
            // The outbox lives outside the store.
            Event::NotificationQueued { .. }
            | Event::NotificationRetryFailed { .. }
            | Event::NotificationDelivered { .. }
            | Event::NotificationDiscarded { .. } => {}
        }
    }

    /// Minimal event sequence that rebuilds the current state.
    pub fn snapshot(&self) -> Vec<Event> {
        let mut events = Vec::with_capacity(
            self.businesses.len()
                + self.services.len()
                + self.staff.len()
                + self.exceptions.len()
                + self.clients.len()
                + self.appointments.len(),
        );
        events.extend(self.businesses.values().map(|b| Event::BusinessRegistered { business: b.clone() }));
        events.extend(self.services.values().map(|s| Event::ServiceAdded { service: s.clone() }));
        events.extend(self.staff.values().map(|s| Event::StaffAdded { staff: s.clone() }));
        events.extend(self.exceptions.values().map(|e| Event::ExceptionAdded { exception: e.clone() }));
        events.extend(self.clients.values().map(|c| Event::ClientRegistered { client: c.clone() }));
        events.extend(
            self.appointments
                .values()
                .map(|a| Event::AppointmentBooked { appointment: a.clone() }),
        );
        events
    }
}
