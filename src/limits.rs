//! Hard caps on input sizes. Anything larger is rejected with `LimitExceeded`.

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_DESCRIPTION_LEN: usize = 2_000;
pub const MAX_COMMENT_LEN: usize = 1_000;
pub const MAX_PASSWORD_LEN: usize = 256;

pub const MAX_BUSINESSES: usize = 100_000;
pub const MAX_SERVICES_PER_BUSINESS: usize = 500;
pub const MAX_STAFF_PER_BUSINESS: usize = 500;
pub const MAX_EXCEPTIONS_PER_STAFF: usize = 2_000;

/// Longest bookable service: one full day.
pub const MAX_SERVICE_MINUTES: u32 = 24 * 60;

/// Accepted calendar years for dates on the wire.
pub const MIN_YEAR: i32 = 1970;
pub const MAX_YEAR: i32 = 9999;

/// Longest accepted request line on the wire.
pub const MAX_LINE_LEN: usize = 64 * 1024;
