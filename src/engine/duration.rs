use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

use crate::model::{ServiceDuration, Span};

use super::BookingError;

/// Normalize a decimal-hours value (e.g. `1.5`) into a bookable duration.
pub fn resolve_duration(decimal_hours: f64) -> Result<ServiceDuration, BookingError> {
    ServiceDuration::from_decimal_hours(decimal_hours).ok_or_else(|| {
        BookingError::Validation(format!(
            "estimated service time {decimal_hours} must resolve to between 1 minute and 24 hours"
        ))
    })
}

/// `base + duration`, carrying into the next calendar day when needed.
/// Fails when the end falls past the last representable date.
pub fn add_duration(base: NaiveDateTime, duration: ServiceDuration) -> Result<NaiveDateTime, BookingError> {
    base.checked_add_signed(Duration::minutes(i64::from(duration.minutes())))
        .ok_or_else(|| BookingError::Validation(format!("appointment starting {base} ends out of range")))
}

/// Occupancy window of an appointment starting at `date` + `time`.
pub fn occupancy_window(date: NaiveDate, time: NaiveTime, duration: ServiceDuration) -> Result<Span, BookingError> {
    let start = date.and_time(time);
    Ok(Span::new(start, add_duration(start, duration)?))
}
