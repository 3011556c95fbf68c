use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::model::*;

use super::duration::occupancy_window;
use super::error::Entity;
use super::store::Store;
use super::BookingError;

/// Whether a candidate window intersects an existing one.
///
/// Windows are whole-minute `[start, end)` spans, so nesting and
/// start-inside-candidate are both special cases of this test. Touching
/// endpoints do not overlap.
pub fn overlaps(existing: &Span, candidate: &Span) -> bool {
    candidate.start < existing.end && candidate.end > existing.start
}

/// Occupancy window of a stored appointment, resolved through its service.
pub fn appointment_window(store: &Store, appt: &Appointment) -> Result<Span, BookingError> {
    let service = store
        .service(&appt.service_id)
        .ok_or(BookingError::NotFound(Entity::Service, appt.service_id))?;
    occupancy_window(appt.date, appt.time, service.duration)
}

/// Fail with `StaffConflict` if `candidate` collides with the staff member's
/// commitments.
///
/// Every non-cancelled appointment whose window has not ended before `today`
/// is compared by window, whatever its calendar date, so a late booking that
/// runs past midnight still blocks the next morning. Completed appointments
/// count too. An availability exception on the candidate's date blocks when
/// the candidate start falls strictly inside it.
pub fn check_staff_available(
    store: &Store,
    staff_id: Ulid,
    candidate: &Span,
    today: NaiveDate,
    exclude: Option<Ulid>,
) -> Result<(), BookingError> {
    let horizon = today.and_time(NaiveTime::MIN);
    for appt in store.staff_appointments(&staff_id) {
        if appt.is_cancelled() || Some(appt.id) == exclude {
            continue;
        }
        let window = appointment_window(store, appt)?;
        if window.end <= horizon {
            continue;
        }
        if overlaps(&window, candidate) {
            return Err(BookingError::StaffConflict {
                staff_id,
                conflicting: appt.id,
            });
        }
    }

    let (date, time) = (candidate.start.date(), candidate.start.time());
    if let Some(ex) = store
        .staff_exceptions(&staff_id)
        .find(|ex| ex.date == date && ex.blocks(time))
    {
        return Err(BookingError::StaffConflict {
            staff_id,
            conflicting: ex.id,
        });
    }
    Ok(())
}

/// The client's other non-cancelled appointment at exactly `date` + `time`.
/// Exact-start equality only; overlapping but differently-timed bookings pass.
pub fn conflicting_booking(
    store: &Store,
    client_id: Ulid,
    date: NaiveDate,
    time: NaiveTime,
    exclude: Option<Ulid>,
) -> Option<Ulid> {
    store
        .client_slot(client_id, date.and_time(time))
        .filter(|id| Some(*id) != exclude)
}

pub fn has_conflicting_booking(
    store: &Store,
    client_id: Ulid,
    date: NaiveDate,
    time: NaiveTime,
    exclude: Option<Ulid>,
) -> bool {
    conflicting_booking(store, client_id, date, time, exclude).is_some()
}
