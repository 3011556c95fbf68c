use chrono::{Datelike, NaiveDate, NaiveTime};

use crate::model::{is_weekend, OperatingHours};

use super::BookingError;

/// Whether the business takes bookings starting at `time` on `date`.
///
/// Saturday and Sunday use the weekend pair, all other days the weekday pair.
/// Both bounds are exclusive: a slot exactly at opening or closing time is
/// rejected. A missing bound means closed.
pub fn is_open(time: NaiveTime, date: NaiveDate, hours: &OperatingHours) -> bool {
    let (open, close) = if is_weekend(date.weekday()) {
        (hours.weekend_open, hours.weekend_close)
    } else {
        (hours.weekday_open, hours.weekday_close)
    };
    match (open, close) {
        (Some(open), Some(close)) => open < time && time < close,
        _ => false,
    }
}

/// Reject pairs that can never admit a booking. Partially unset hours are fine.
pub fn validate_hours(hours: &OperatingHours) -> Result<(), BookingError> {
    let pairs = [
        ("weekday", hours.weekday_open, hours.weekday_close),
        ("weekend", hours.weekend_open, hours.weekend_close),
    ];
    for (label, open, close) in pairs {
        if let (Some(open), Some(close)) = (open, close)
            && open >= close
        {
            return Err(BookingError::Validation(format!(
                "{label} opening time must be before closing time"
            )));
        }
    }
    Ok(())
}
