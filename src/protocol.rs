//! Line protocol: one JSON object per line in each direction.
//!
//! ```text
//! {"api_key":"appointd","as":{"client":"01J..."},"op":"book","date":"14-10-2026","time":"10:00","service":"01J..."}
//! {"ok":true,"data":{...},"warnings":[]}
//! ```

use chrono::{Datelike, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::{BookingError, ScheduleEntry};
use crate::limits::{MAX_YEAR, MIN_YEAR};
use crate::model::*;
use crate::notify::NotificationFailure;

pub const DATE_FORMAT: &str = "%d-%m-%Y";
pub const TIME_FORMAT: &str = "%H:%M";

pub fn parse_date(raw: &str) -> Result<NaiveDate, BookingError> {
    let date = NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
        .map_err(|_| BookingError::Validation(format!("invalid date '{raw}', expected DD-MM-YYYY")))?;
    if !(MIN_YEAR..=MAX_YEAR).contains(&date.year()) {
        return Err(BookingError::Validation(format!(
            "date '{raw}' is outside years {MIN_YEAR}-{MAX_YEAR}"
        )));
    }
    Ok(date)
}

pub fn parse_time(raw: &str) -> Result<NaiveTime, BookingError> {
    NaiveTime::parse_from_str(raw.trim(), TIME_FORMAT)
        .map_err(|_| BookingError::Validation(format!("invalid time '{raw}', expected HH:MM")))
}

fn parse_optional_time(raw: &Option<String>) -> Result<Option<NaiveTime>, BookingError> {
    raw.as_deref().map(parse_time).transpose()
}

/// Who the request acts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Principal {
    Client(Ulid),
    Business(Ulid),
}

#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub api_key: String,
    #[serde(rename = "as", default)]
    pub principal: Option<Principal>,
    #[serde(flatten)]
    pub request: Request,
}

/// Stored schemas carried this as either a number or a numeric string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum DecimalHours {
    Number(f64),
    Text(String),
}

impl DecimalHours {
    pub fn value(&self) -> Result<f64, BookingError> {
        match self {
            DecimalHours::Number(n) => Ok(*n),
            DecimalHours::Text(s) => s.trim().parse().map_err(|_| {
                BookingError::Validation(format!("estimated_service_time '{s}' is not a number"))
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HoursPayload {
    #[serde(default)]
    pub weekday_open: Option<String>,
    #[serde(default)]
    pub weekday_close: Option<String>,
    #[serde(default)]
    pub weekend_open: Option<String>,
    #[serde(default)]
    pub weekend_close: Option<String>,
}

impl HoursPayload {
    pub fn parse(&self) -> Result<OperatingHours, BookingError> {
        Ok(OperatingHours {
            weekday_open: parse_optional_time(&self.weekday_open)?,
            weekday_close: parse_optional_time(&self.weekday_close)?,
            weekend_open: parse_optional_time(&self.weekend_open)?,
            weekend_close: parse_optional_time(&self.weekend_close)?,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    // ── Admin (API key only) ──
    RegisterBusiness {
        name: String,
        password: String,
        #[serde(default)]
        hours: HoursPayload,
    },
    VerifyBusiness {
        business_id: Ulid,
    },
    RegisterClient {
        name: String,
        email: String,
        #[serde(default)]
        phone: String,
    },
    FailedNotifications,

    // ── Business ──
    SetOperatingHours {
        hours: HoursPayload,
    },
    AddService {
        name: String,
        #[serde(default)]
        description: Option<String>,
        price: u64,
        estimated_service_time: DecimalHours,
    },
    AddStaff {
        name: String,
        #[serde(default)]
        role: Option<String>,
    },
    RemoveStaff {
        staff_id: Ulid,
    },
    AddAvailabilityException {
        staff_id: Ulid,
        date: String,
        start_time: String,
        end_time: String,
    },
    RemoveAvailabilityException {
        exception_id: Ulid,
    },
    AssignStaff {
        appointment_id: Ulid,
        #[serde(rename = "staffID")]
        staff_id: Ulid,
        password: String,
    },
    Complete {
        appointment_id: Ulid,
    },
    StaffSchedule {
        staff_id: Ulid,
        date: String,
    },

    // ── Client ──
    Book {
        date: String,
        time: String,
        service: Ulid,
        #[serde(default)]
        staff: Option<Ulid>,
        #[serde(default)]
        comment: Option<String>,
    },
    Reschedule {
        appointment_id: Ulid,
        date: String,
        time: String,
        #[serde(default)]
        comment: Option<String>,
        #[serde(default)]
        staff_id: Option<Ulid>,
        #[serde(default)]
        notification: Option<Channel>,
    },
    Cancel {
        appointment_id: Ulid,
        #[serde(default)]
        comment: Option<String>,
    },

    // ── Either principal ──
    GetAppointment {
        appointment_id: Ulid,
    },
    ListAppointments,
    IsOpen {
        business_id: Ulid,
        date: String,
        time: String,
    },
}

// ── Responses ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppointmentView {
    pub id: Ulid,
    pub business_id: Ulid,
    pub client_id: Ulid,
    pub service_id: Ulid,
    pub staff_id: Option<Ulid>,
    pub date: String,
    pub time: String,
    pub comment: Option<String>,
    pub cancelled: bool,
    pub completed: bool,
    pub created_at: String,
}

impl From<&Appointment> for AppointmentView {
    fn from(a: &Appointment) -> Self {
        Self {
            id: a.id,
            business_id: a.business_id,
            client_id: a.client_id,
            service_id: a.service_id,
            staff_id: a.staff_id,
            date: a.date.format(DATE_FORMAT).to_string(),
            time: a.time.format(TIME_FORMAT).to_string(),
            comment: a.comment.clone(),
            cancelled: a.is_cancelled(),
            completed: a.is_completed(),
            created_at: a.created_at.format("%d-%m-%Y %H:%M:%S").to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleView {
    pub appointment_id: Ulid,
    pub start: String,
    pub end: String,
    pub completed: bool,
}

impl From<&ScheduleEntry> for ScheduleView {
    fn from(e: &ScheduleEntry) -> Self {
        let fmt = "%d-%m-%Y %H:%M";
        Self {
            appointment_id: e.appointment_id,
            start: e.window.start.format(fmt).to_string(),
            end: e.window.end.format(fmt).to_string(),
            completed: e.state == AppointmentState::Completed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<NotificationFailure>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn ok(data: impl Serialize) -> Self {
        Self::with_warnings(data, Vec::new())
    }

    pub fn with_warnings(data: impl Serialize, warnings: Vec<NotificationFailure>) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self {
                ok: true,
                data: Some(value),
                warnings: Some(warnings),
                error: None,
            },
            Err(e) => Self::failure("InternalError", e.to_string()),
        }
    }

    pub fn error(err: &BookingError) -> Self {
        Self::failure(err.kind(), err.to_string())
    }

    fn failure(kind: &str, message: String) -> Self {
        Self {
            ok: false,
            data: None,
            warnings: None,
            error: Some(ErrorBody {
                kind: kind.to_string(),
                message,
            }),
        }
    }
}
