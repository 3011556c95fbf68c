use std::fmt;

use thiserror::Error;
use ulid::Ulid;

use super::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Business,
    Service,
    Staff,
    Client,
    Appointment,
    Exception,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::Business => "business",
            Entity::Service => "service",
            Entity::Staff => "staff",
            Entity::Client => "client",
            Entity::Appointment => "appointment",
            Entity::Exception => "availability exception",
        })
    }
}

/// Hard failures. Any of these aborts the operation before a write.
#[derive(Debug, Error)]
pub enum BookingError {
    #[error("{0} not found: {1}")]
    NotFound(Entity, Ulid),

    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    #[error("business {0} is closed at the requested time")]
    Closed(Ulid),

    /// `conflicting` is the appointment or availability exception in the way.
    #[error("staff {staff_id} is unavailable: conflicts with {conflicting}")]
    StaffConflict { staff_id: Ulid, conflicting: Ulid },

    #[error("client already has an appointment at that slot: {0}")]
    ClientDoubleBooked(Ulid),

    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    #[error("journal error: {0}")]
    Journal(String),
}

impl BookingError {
    /// Stable kind name used on the wire and as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            BookingError::NotFound(..) => "NotFound",
            BookingError::Forbidden(_) => "Forbidden",
            BookingError::Closed(_) => "Closed",
            BookingError::StaffConflict { .. } => "StaffConflict",
            BookingError::ClientDoubleBooked(_) => "ClientDoubleBooked",
            BookingError::InvalidState(_) => "InvalidState",
            BookingError::Validation(_) => "ValidationError",
            BookingError::LimitExceeded(_) => "LimitExceeded",
            BookingError::Journal(_) => "JournalError",
        }
    }
}

impl From<StoreError> for BookingError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ClientSlotTaken { existing } => BookingError::ClientDoubleBooked(existing),
            StoreError::StaffSlotTaken { staff_id, existing } => BookingError::StaffConflict {
                staff_id,
                conflicting: existing,
            },
        }
    }
}
