use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use ulid::Ulid;

use crate::limits::MAX_COMMENT_LEN;
use crate::model::*;
use crate::notify::NotificationFailure;
use crate::observability;

use super::conflict::{appointment_window, check_staff_available, conflicting_booking};
use super::duration::occupancy_window;
use super::hours::is_open;
use super::store::Store;
use super::{BookingError, Engine, Entity};

/// A committed change plus any notification that failed to go out with it.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome<T> {
    pub value: T,
    pub warnings: Vec<NotificationFailure>,
}

impl<T> Outcome<T> {
    fn new(value: T, warning: Option<NotificationFailure>) -> Self {
        Self {
            value,
            warnings: warning.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BookRequest {
    pub client_id: Ulid,
    pub service_id: Ulid,
    pub staff_id: Option<Ulid>,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub comment: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RescheduleRequest {
    pub appointment_id: Ulid,
    pub client_id: Ulid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    /// Replaces the assigned staff member when set.
    pub staff_id: Option<Ulid>,
    /// Replaces the comment when set.
    pub comment: Option<String>,
    /// Channel for the reschedule notice; `None` sends nothing.
    pub notification: Option<Channel>,
}

fn normalize_comment(comment: Option<String>) -> Result<Option<String>, BookingError> {
    match comment {
        Some(c) if c.len() > MAX_COMMENT_LEN => Err(BookingError::LimitExceeded("comment too long")),
        Some(c) if c.trim().is_empty() => Ok(None),
        other => Ok(other),
    }
}

fn lookup<'a, T>(
    found: Option<&'a T>,
    entity: Entity,
    id: Ulid,
) -> Result<&'a T, BookingError> {
    found.ok_or(BookingError::NotFound(entity, id))
}

/// The staff member, provided they work for `business_id`.
fn staff_of_business(store: &Store, staff_id: Ulid, business_id: Ulid) -> Result<&Staff, BookingError> {
    let staff = lookup(store.staff(&staff_id), Entity::Staff, staff_id)?;
    if staff.employer_id != business_id {
        return Err(BookingError::Forbidden("staff does not belong to this business"));
    }
    Ok(staff)
}

fn owned_by_client(store: &Store, appointment_id: Ulid, client_id: Ulid) -> Result<&Appointment, BookingError> {
    let appt = lookup(store.appointment(&appointment_id), Entity::Appointment, appointment_id)?;
    if appt.client_id != client_id {
        return Err(BookingError::Forbidden("appointment belongs to another client"));
    }
    Ok(appt)
}

fn owned_by_business(store: &Store, appointment_id: Ulid, business_id: Ulid) -> Result<&Appointment, BookingError> {
    lookup(store.business(&business_id), Entity::Business, business_id)?;
    let appt = lookup(store.appointment(&appointment_id), Entity::Appointment, appointment_id)?;
    if appt.business_id != business_id {
        return Err(BookingError::Forbidden("appointment belongs to another business"));
    }
    Ok(appt)
}

fn ensure_not_past(window: &Span, now: NaiveDateTime) -> Result<(), BookingError> {
    if window.start < now {
        return Err(BookingError::Validation(format!(
            "requested slot {} is in the past",
            window.start.format("%d-%m-%Y %H:%M")
        )));
    }
    Ok(())
}

/// Decide a booking over the current state. Check order: existence and
/// ownership, slot in the past, operating hours, staff availability, client
/// double-booking.
fn plan_booking(
    store: &Store,
    req: &BookRequest,
    comment: Option<String>,
    now: NaiveDateTime,
) -> Result<Appointment, BookingError> {
    lookup(store.client(&req.client_id), Entity::Client, req.client_id)?;
    let service = lookup(store.service(&req.service_id), Entity::Service, req.service_id)?;
    let business = lookup(store.business(&service.business_id), Entity::Business, service.business_id)?;
    if let Some(staff_id) = req.staff_id {
        staff_of_business(store, staff_id, business.id)?;
    }

    let window = occupancy_window(req.date, req.time, service.duration)?;
    ensure_not_past(&window, now)?;
    if !is_open(req.time, req.date, &business.hours) {
        return Err(BookingError::Closed(business.id));
    }
    if let Some(staff_id) = req.staff_id {
        check_staff_available(store, staff_id, &window, now.date(), None)?;
    }
    if let Some(existing) = conflicting_booking(store, req.client_id, req.date, req.time, None) {
        return Err(BookingError::ClientDoubleBooked(existing));
    }

    Ok(Appointment {
        id: Ulid::new(),
        business_id: business.id,
        client_id: req.client_id,
        service_id: service.id,
        staff_id: req.staff_id,
        date: req.date,
        time: req.time,
        comment,
        state: AppointmentState::Active,
        reminded: false,
        created_at: now,
    })
}

fn plan_reschedule(
    store: &Store,
    req: &RescheduleRequest,
    comment: Option<String>,
    now: NaiveDateTime,
) -> Result<Event, BookingError> {
    let appt = owned_by_client(store, req.appointment_id, req.client_id)?;
    if appt.is_completed() {
        return Err(BookingError::InvalidState("appointment is already completed"));
    }
    if appt.is_cancelled() {
        return Err(BookingError::InvalidState("appointment is cancelled"));
    }
    let service = lookup(store.service(&appt.service_id), Entity::Service, appt.service_id)?;
    let business = lookup(store.business(&appt.business_id), Entity::Business, appt.business_id)?;
    if let Some(staff_id) = req.staff_id {
        staff_of_business(store, staff_id, business.id)?;
    }
    let staff_id = req.staff_id.or(appt.staff_id);

    let window = occupancy_window(req.date, req.time, service.duration)?;
    ensure_not_past(&window, now)?;
    if !is_open(req.time, req.date, &business.hours) {
        return Err(BookingError::Closed(business.id));
    }
    if let Some(staff_id) = staff_id {
        check_staff_available(store, staff_id, &window, now.date(), Some(appt.id))?;
    }
    if let Some(existing) = conflicting_booking(store, appt.client_id, req.date, req.time, Some(appt.id)) {
        return Err(BookingError::ClientDoubleBooked(existing));
    }

    Ok(Event::AppointmentRescheduled {
        id: appt.id,
        date: req.date,
        time: req.time,
        staff_id,
        comment: comment.or_else(|| appt.comment.clone()),
    })
}

fn plan_assignment(
    store: &Store,
    appointment_id: Ulid,
    business_id: Ulid,
    staff_id: Ulid,
    password: &str,
    today: NaiveDate,
) -> Result<(), BookingError> {
    let business = lookup(store.business(&business_id), Entity::Business, business_id)?;
    if !business.check_password(password) {
        return Err(BookingError::Forbidden("password confirmation failed"));
    }
    let appt = owned_by_business(store, appointment_id, business_id)?;
    if appt.is_cancelled() {
        return Err(BookingError::InvalidState("appointment is cancelled"));
    }
    if appt.is_completed() {
        return Err(BookingError::InvalidState("appointment is already completed"));
    }
    staff_of_business(store, staff_id, business_id)?;
    let window = appointment_window(store, appt)?;
    check_staff_available(store, staff_id, &window, today, Some(appointment_id))
}

fn reject(op: &'static str, err: BookingError) -> BookingError {
    metrics::counter!(observability::BOOKING_REJECTIONS_TOTAL, "op" => op, "kind" => err.kind())
        .increment(1);
    tracing::debug!(op, kind = err.kind(), error = %err, "rejected");
    err
}

impl Engine {
    pub async fn book(&self, req: BookRequest) -> Result<Outcome<Appointment>, BookingError> {
        let comment = normalize_comment(req.comment.clone()).map_err(|e| reject("book", e))?;
        let now = self.clock.now();

        let appt = {
            let mut store = self.store.write().await;
            let appt = plan_booking(&store, &req, comment, now).map_err(|e| reject("book", e))?;
            self.commit(&mut store, Event::AppointmentBooked { appointment: appt.clone() })
                .await
                .map_err(|e| reject("book", e))?;
            appt
        };

        metrics::counter!(observability::APPOINTMENTS_BOOKED_TOTAL).increment(1);
        tracing::info!(
            appointment = %appt.id,
            client = %appt.client_id,
            business = %appt.business_id,
            staff = ?appt.staff_id,
            start = %appt.starts_at(),
            "appointment booked"
        );

        let warning = self
            .dispatch(Notification::for_appointment(NotificationKind::Confirmation, Channel::Email, &appt))
            .await;
        Ok(Outcome::new(appt, warning))
    }

    pub async fn reschedule(&self, req: RescheduleRequest) -> Result<Outcome<Appointment>, BookingError> {
        let comment = normalize_comment(req.comment.clone()).map_err(|e| reject("reschedule", e))?;
        let now = self.clock.now();

        let appt = {
            let mut store = self.store.write().await;
            let event = plan_reschedule(&store, &req, comment, now).map_err(|e| reject("reschedule", e))?;
            self.commit(&mut store, event)
                .await
                .map_err(|e| reject("reschedule", e))?;
            lookup(store.appointment(&req.appointment_id), Entity::Appointment, req.appointment_id)?.clone()
        };

        metrics::counter!(observability::APPOINTMENTS_RESCHEDULED_TOTAL).increment(1);
        tracing::info!(
            appointment = %appt.id,
            staff = ?appt.staff_id,
            start = %appt.starts_at(),
            "appointment rescheduled"
        );

        let warning = match req.notification {
            Some(channel) => {
                self.dispatch(Notification::for_appointment(NotificationKind::Reschedule, channel, &appt))
                    .await
            }
            None => None,
        };
        Ok(Outcome::new(appt, warning))
    }

    /// Cancelling an already-cancelled appointment succeeds without change.
    pub async fn cancel(
        &self,
        appointment_id: Ulid,
        client_id: Ulid,
        comment: Option<String>,
    ) -> Result<Outcome<Appointment>, BookingError> {
        let comment = normalize_comment(comment).map_err(|e| reject("cancel", e))?;

        let appt = {
            let mut store = self.store.write().await;
            let appt = owned_by_client(&store, appointment_id, client_id).map_err(|e| reject("cancel", e))?;
            if appt.is_completed() {
                return Err(reject("cancel", BookingError::InvalidState("appointment is already completed")));
            }
            if appt.is_cancelled() {
                return Ok(Outcome::new(appt.clone(), None));
            }
            self.commit(&mut store, Event::AppointmentCancelled { id: appointment_id, comment })
                .await
                .map_err(|e| reject("cancel", e))?;
            lookup(store.appointment(&appointment_id), Entity::Appointment, appointment_id)?.clone()
        };

        metrics::counter!(observability::APPOINTMENTS_CANCELLED_TOTAL).increment(1);
        tracing::info!(appointment = %appt.id, client = %appt.client_id, "appointment cancelled");

        let warning = self
            .dispatch(Notification::for_appointment(NotificationKind::Cancellation, Channel::Email, &appt))
            .await;
        Ok(Outcome::new(appt, warning))
    }

    /// Business-initiated. The owner's password is re-confirmed.
    pub async fn assign_staff(
        &self,
        appointment_id: Ulid,
        business_id: Ulid,
        staff_id: Ulid,
        password: &str,
    ) -> Result<Appointment, BookingError> {
        let today = self.clock.now().date();
        let mut store = self.store.write().await;

        plan_assignment(&store, appointment_id, business_id, staff_id, password, today)
            .map_err(|e| reject("assign_staff", e))?;

        self.commit(&mut store, Event::StaffAssigned { id: appointment_id, staff_id })
            .await
            .map_err(|e| reject("assign_staff", e))?;
        tracing::info!(appointment = %appointment_id, staff = %staff_id, "staff assigned");
        Ok(lookup(store.appointment(&appointment_id), Entity::Appointment, appointment_id)?.clone())
    }

    /// Marks a started appointment completed and requests a review.
    pub async fn complete(
        &self,
        appointment_id: Ulid,
        business_id: Ulid,
    ) -> Result<Outcome<Appointment>, BookingError> {
        let now = self.clock.now();

        let appt = {
            let mut store = self.store.write().await;
            let appt = owned_by_business(&store, appointment_id, business_id)
                .map_err(|e| reject("complete", e))?;
            let state_error = if appt.is_completed() {
                Some("appointment is already completed")
            } else if appt.is_cancelled() {
                Some("appointment is cancelled")
            } else if appt.starts_at() > now {
                Some("appointment has not started yet")
            } else {
                None
            };
            if let Some(msg) = state_error {
                return Err(reject("complete", BookingError::InvalidState(msg)));
            }
            self.commit(&mut store, Event::AppointmentCompleted { id: appointment_id })
                .await
                .map_err(|e| reject("complete", e))?;
            lookup(store.appointment(&appointment_id), Entity::Appointment, appointment_id)?.clone()
        };

        metrics::counter!(observability::APPOINTMENTS_COMPLETED_TOTAL).increment(1);
        tracing::info!(appointment = %appt.id, business = %appt.business_id, "appointment completed");

        let warning = self
            .dispatch(Notification::for_appointment(NotificationKind::ReviewRequest, Channel::Email, &appt))
            .await;
        Ok(Outcome::new(appt, warning))
    }
}
