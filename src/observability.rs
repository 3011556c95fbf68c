use std::net::SocketAddr;

use crate::protocol::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "appointd_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "appointd_request_duration_seconds";

/// Counter: requests refused by the guard chain. Labels: reason.
pub const AUTH_FAILURES_TOTAL: &str = "appointd_auth_failures_total";

// ── Scheduling outcomes ─────────────────────────────────────────

pub const APPOINTMENTS_BOOKED_TOTAL: &str = "appointd_appointments_booked_total";
pub const APPOINTMENTS_RESCHEDULED_TOTAL: &str = "appointd_appointments_rescheduled_total";
pub const APPOINTMENTS_CANCELLED_TOTAL: &str = "appointd_appointments_cancelled_total";
pub const APPOINTMENTS_COMPLETED_TOTAL: &str = "appointd_appointments_completed_total";

/// Counter: lifecycle operations rejected before any write. Labels: op, kind.
pub const BOOKING_REJECTIONS_TOTAL: &str = "appointd_booking_rejections_total";

/// Counter: notifications that failed on first delivery and were queued.
pub const NOTIFICATION_FAILURES_TOTAL: &str = "appointd_notification_failures_total";

/// Gauge: entries currently in the failed-notification outbox.
pub const OUTBOX_SIZE: &str = "appointd_outbox_size";

/// Gauge: outbox entries with no retries left, awaiting discard.
pub const OUTBOX_EXHAUSTED: &str = "appointd_outbox_exhausted";

/// Counter: exhausted outbox entries dropped after their retention period.
pub const NOTIFICATIONS_DISCARDED_TOTAL: &str = "appointd_notifications_discarded_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "appointd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "appointd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "appointd_connections_rejected_total";

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "appointd_journal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (events per flush).
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "appointd_journal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Request variant to a short label for metrics.
pub fn request_label(req: &Request) -> &'static str {
    match req {
        Request::RegisterBusiness { .. } => "register_business",
        Request::VerifyBusiness { .. } => "verify_business",
        Request::RegisterClient { .. } => "register_client",
        Request::SetOperatingHours { .. } => "set_operating_hours",
        Request::AddService { .. } => "add_service",
        Request::AddStaff { .. } => "add_staff",
        Request::RemoveStaff { .. } => "remove_staff",
        Request::AddAvailabilityException { .. } => "add_availability_exception",
        Request::RemoveAvailabilityException { .. } => "remove_availability_exception",
        Request::Book { .. } => "book",
        Request::Reschedule { .. } => "reschedule",
        Request::Cancel { .. } => "cancel",
        Request::AssignStaff { .. } => "assign_staff",
        Request::Complete { .. } => "complete",
        Request::GetAppointment { .. } => "get_appointment",
        Request::ListAppointments => "list_appointments",
        Request::StaffSchedule { .. } => "staff_schedule",
        Request::IsOpen { .. } => "is_open",
        Request::FailedNotifications => "failed_notifications",
    }
}
