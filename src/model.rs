use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::MAX_SERVICE_MINUTES;

/// Half-open occupancy interval `[start, end)` in local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Span {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Classic intersection test. Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Whether any part of the span falls on `date`.
    pub fn touches_date(&self, date: NaiveDate) -> bool {
        let day_start = date.and_time(NaiveTime::MIN);
        match date.succ_opt() {
            Some(next) => self.start < next.and_time(NaiveTime::MIN) && self.end > day_start,
            None => self.end > day_start,
        }
    }
}

/// A service's length, normalized to whole minutes. Always > 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceDuration(u32);

impl ServiceDuration {
    /// Split decimal hours into whole hours plus a rounded minute remainder.
    /// Returns `None` for anything that resolves to zero, negative, non-finite
    /// or longer than a day.
    pub fn from_decimal_hours(hours: f64) -> Option<Self> {
        if !hours.is_finite() || hours <= 0.0 {
            return None;
        }
        let whole = hours.trunc();
        let minutes = ((hours - whole) * 60.0).round();
        let total = whole * 60.0 + minutes;
        if total < 1.0 || total > MAX_SERVICE_MINUTES as f64 {
            return None;
        }
        Some(Self(total as u32))
    }

    pub fn from_minutes(minutes: u32) -> Option<Self> {
        (1..=MAX_SERVICE_MINUTES).contains(&minutes).then_some(Self(minutes))
    }

    pub fn minutes(&self) -> u32 {
        self.0
    }

    pub fn as_decimal_hours(&self) -> f64 {
        self.0 as f64 / 60.0
    }
}

/// Opening hours per day class. An unset bound means "not configured" and
/// the business is treated as closed for that day class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingHours {
    pub weekday_open: Option<NaiveTime>,
    pub weekday_close: Option<NaiveTime>,
    pub weekend_open: Option<NaiveTime>,
    pub weekend_close: Option<NaiveTime>,
}

impl OperatingHours {
    pub fn weekdays(open: NaiveTime, close: NaiveTime) -> Self {
        Self {
            weekday_open: Some(open),
            weekday_close: Some(close),
            ..Self::default()
        }
    }

    pub fn with_weekend(mut self, open: NaiveTime, close: NaiveTime) -> Self {
        self.weekend_open = Some(open);
        self.weekend_close = Some(close);
        self
    }
}

pub fn is_weekend(day: Weekday) -> bool {
    matches!(day, Weekday::Sat | Weekday::Sun)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Business {
    pub id: Ulid,
    pub name: String,
    pub hours: OperatingHours,
    pub password_hash: [u8; 32],
    pub verified: bool,
}

impl Business {
    pub fn check_password(&self, password: &str) -> bool {
        // blake3::Hash equality is constant-time.
        blake3::hash(password.as_bytes()) == blake3::Hash::from(self.password_hash)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub business_id: Ulid,
    pub name: String,
    pub description: Option<String>,
    /// Minor currency units.
    pub price: u64,
    pub duration: ServiceDuration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Staff {
    pub id: Ulid,
    pub employer_id: Ulid,
    pub name: String,
    pub role: Option<String>,
}

/// Explicit unavailable window for a staff member (leave, break).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffAvailability {
    pub id: Ulid,
    pub staff_id: Ulid,
    pub date: NaiveDate,
    pub day_of_week: Weekday,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl StaffAvailability {
    pub fn new(id: Ulid, staff_id: Ulid, date: NaiveDate, start_time: NaiveTime, end_time: NaiveTime) -> Self {
        Self {
            id,
            staff_id,
            date,
            day_of_week: date.weekday(),
            start_time,
            end_time,
        }
    }

    /// Strictly inside the window; the bounds themselves are bookable.
    pub fn blocks(&self, time: NaiveTime) -> bool {
        self.start_time < time && time < self.end_time
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: Ulid,
    pub name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentState {
    Active,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub business_id: Ulid,
    pub client_id: Ulid,
    pub service_id: Ulid,
    pub staff_id: Option<Ulid>,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub comment: Option<String>,
    pub state: AppointmentState,
    pub reminded: bool,
    pub created_at: NaiveDateTime,
}

impl Appointment {
    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.time)
    }

    pub fn is_active(&self) -> bool {
        self.state == AppointmentState::Active
    }

    pub fn is_cancelled(&self) -> bool {
        self.state == AppointmentState::Cancelled
    }

    pub fn is_completed(&self) -> bool {
        self.state == AppointmentState::Completed
    }
}

// ── Notifications ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Confirmation,
    Reschedule,
    Cancellation,
    ReviewRequest,
    Reminder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    #[default]
    Email,
    Sms,
}

/// A message the core asks the dispatcher to deliver to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub channel: Channel,
    pub appointment_id: Ulid,
    pub client_id: Ulid,
    pub business_id: Ulid,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl Notification {
    pub fn for_appointment(kind: NotificationKind, channel: Channel, appt: &Appointment) -> Self {
        Self {
            kind,
            channel,
            appointment_id: appt.id,
            client_id: appt.client_id,
            business_id: appt.business_id,
            date: appt.date,
            time: appt.time,
        }
    }
}

/// Outbox entry for a notification that could not be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedNotification {
    pub id: Ulid,
    pub notification: Notification,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: String,
    pub queued_at: NaiveDateTime,
}

impl FailedNotification {
    pub fn retryable(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// The journal record format. Flat, one variant per state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    BusinessRegistered {
        business: Business,
    },
    BusinessVerified {
        id: Ulid,
    },
    OperatingHoursSet {
        business_id: Ulid,
        hours: OperatingHours,
    },
    ServiceAdded {
        service: Service,
    },
    StaffAdded {
        staff: Staff,
    },
    StaffRemoved {
        id: Ulid,
    },
    ExceptionAdded {
        exception: StaffAvailability,
    },
    ExceptionRemoved {
        id: Ulid,
    },
    ClientRegistered {
        client: Client,
    },
    AppointmentBooked {
        appointment: Appointment,
    },
    AppointmentRescheduled {
        id: Ulid,
        date: NaiveDate,
        time: NaiveTime,
        staff_id: Option<Ulid>,
        comment: Option<String>,
    },
    StaffAssigned {
        id: Ulid,
        staff_id: Ulid,
    },
    AppointmentCancelled {
        id: Ulid,
        comment: Option<String>,
    },
    AppointmentCompleted {
        id: Ulid,
    },
    ReminderSent {
        id: Ulid,
    },
    NotificationQueued {
        failed: FailedNotification,
    },
    NotificationRetryFailed {
        id: Ulid,
        error: String,
    },
    NotificationDelivered {
        id: Ulid,
    },
    /// An exhausted entry dropped after its retention period.
    NotificationDiscarded {
        id: Ulid,
    },
}
