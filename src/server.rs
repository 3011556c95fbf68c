use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

use crate::auth::{require_api_key, require_business, require_client};
use crate::engine::{BookRequest, BookingError, Engine, Entity, RescheduleRequest};
use crate::limits::MAX_LINE_LEN;
use crate::observability::{self, request_label};
use crate::protocol::*;

/// Serve one connection until the peer closes it.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    api_key: Arc<str>,
) -> Result<(), LinesCodecError> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));

    while let Some(line) = framed.next().await {
        let response = match line {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => handle_line(&engine, &api_key, &line).await,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                Response::error(&BookingError::LimitExceeded("request line too long"))
            }
            Err(e) => return Err(e),
        };
        let encoded = serde_json::to_string(&response)
            .unwrap_or_else(|e| format!(r#"{{"ok":false,"error":{{"kind":"InternalError","message":"{e}"}}}}"#));
        framed.send(encoded).await?;
    }
    Ok(())
}

/// Decode, guard and execute a single request line.
pub async fn handle_line(engine: &Engine, api_key: &str, line: &str) -> Response {
    let envelope: Envelope = match serde_json::from_str(line) {
        Ok(env) => env,
        Err(e) => {
            metrics::counter!(observability::REQUESTS_TOTAL, "op" => "unknown", "status" => "error")
                .increment(1);
            return Response::error(&BookingError::Validation(format!("malformed request: {e}")));
        }
    };

    let op = request_label(&envelope.request);
    let started = Instant::now();
    let response = match execute(engine, api_key, envelope).await {
        Ok(resp) => resp,
        Err(e) => Response::error(&e),
    };

    let status = if response.ok { "ok" } else { "error" };
    metrics::counter!(observability::REQUESTS_TOTAL, "op" => op, "status" => status).increment(1);
    metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());
    response
}

async fn execute(engine: &Engine, api_key: &str, envelope: Envelope) -> Result<Response, BookingError> {
    require_api_key(api_key, &envelope.api_key)?;
    let principal = envelope.principal;

    match envelope.request {
        Request::RegisterBusiness { name, password, hours } => {
            let business = engine.register_business(&name, &password, hours.parse()?).await?;
            Ok(Response::ok(serde_json::json!({
                "id": business.id,
                "name": business.name,
                "verified": business.verified,
            })))
        }
        Request::VerifyBusiness { business_id } => {
            engine.verify_business(business_id).await?;
            Ok(Response::ok(serde_json::json!({ "id": business_id, "verified": true })))
        }
        Request::RegisterClient { name, email, phone } => {
            Ok(Response::ok(engine.register_client(&name, &email, &phone).await?))
        }
        Request::FailedNotifications => Ok(Response::ok(engine.failed_notifications())),

        Request::SetOperatingHours { hours } => {
            let business = require_business(engine, principal).await?;
            engine.set_operating_hours(business.id, hours.parse()?).await?;
            Ok(Response::ok(serde_json::json!({ "id": business.id })))
        }
        Request::AddService { name, description, price, estimated_service_time } => {
            let business = require_business(engine, principal).await?;
            let hours = estimated_service_time.value()?;
            let service = engine.add_service(business.id, &name, description, price, hours).await?;
            Ok(Response::ok(serde_json::json!({
                "id": service.id,
                "name": service.name,
                "price": service.price,
                "estimated_service_time": service.duration.as_decimal_hours(),
            })))
        }
        Request::AddStaff { name, role } => {
            let business = require_business(engine, principal).await?;
            Ok(Response::ok(engine.add_staff(business.id, &name, role).await?))
        }
        Request::RemoveStaff { staff_id } => {
            let business = require_business(engine, principal).await?;
            engine.remove_staff(business.id, staff_id).await?;
            Ok(Response::ok(serde_json::json!({ "id": staff_id })))
        }
        Request::AddAvailabilityException { staff_id, date, start_time, end_time } => {
            let business = require_business(engine, principal).await?;
            let exception = engine
                .add_availability_exception(
                    business.id,
                    staff_id,
                    parse_date(&date)?,
                    parse_time(&start_time)?,
                    parse_time(&end_time)?,
                )
                .await?;
            Ok(Response::ok(serde_json::json!({ "id": exception.id })))
        }
        Request::RemoveAvailabilityException { exception_id } => {
            let business = require_business(engine, principal).await?;
            engine.remove_availability_exception(business.id, exception_id).await?;
            Ok(Response::ok(serde_json::json!({ "id": exception_id })))
        }
        Request::AssignStaff { appointment_id, staff_id, password } => {
            let business = require_business(engine, principal).await?;
            let appt = engine.assign_staff(appointment_id, business.id, staff_id, &password).await?;
            Ok(Response::ok(AppointmentView::from(&appt)))
        }
        Request::Complete { appointment_id } => {
            let business = require_business(engine, principal).await?;
            let outcome = engine.complete(appointment_id, business.id).await?;
            Ok(Response::with_warnings(AppointmentView::from(&outcome.value), outcome.warnings))
        }
        Request::StaffSchedule { staff_id, date } => {
            let business = require_business(engine, principal).await?;
            let staff = engine
                .staff(&staff_id)
                .await
                .ok_or(BookingError::NotFound(Entity::Staff, staff_id))?;
            if staff.employer_id != business.id {
                return Err(BookingError::Forbidden("staff does not belong to this business"));
            }
            let entries = engine.staff_schedule(staff_id, parse_date(&date)?).await?;
            Ok(Response::ok(entries.iter().map(ScheduleView::from).collect::<Vec<_>>()))
        }

        Request::Book { date, time, service, staff, comment } => {
            let client_id = require_client(engine, principal).await?;
            let req = BookRequest {
                client_id,
                service_id: service,
                staff_id: staff,
                date: parse_date(&date)?,
                time: parse_time(&time)?,
                comment,
            };
            let outcome = engine.book(req).await?;
            Ok(Response::with_warnings(AppointmentView::from(&outcome.value), outcome.warnings))
        }
        Request::Reschedule { appointment_id, date, time, comment, staff_id, notification } => {
            let client_id = require_client(engine, principal).await?;
            let req = RescheduleRequest {
                appointment_id,
                client_id,
                date: parse_date(&date)?,
                time: parse_time(&time)?,
                staff_id,
                comment,
                notification,
            };
            let outcome = engine.reschedule(req).await?;
            Ok(Response::with_warnings(AppointmentView::from(&outcome.value), outcome.warnings))
        }
        Request::Cancel { appointment_id, comment } => {
            let client_id = require_client(engine, principal).await?;
            let outcome = engine.cancel(appointment_id, client_id, comment).await?;
            Ok(Response::with_warnings(AppointmentView::from(&outcome.value), outcome.warnings))
        }

        Request::GetAppointment { appointment_id } => {
            let (client_id, business_id) = match principal {
                Some(Principal::Business(_)) => (None, Some(require_business(engine, principal).await?.id)),
                _ => (Some(require_client(engine, principal).await?), None),
            };
            let appt = engine
                .appointment(&appointment_id)
                .await
                .ok_or(BookingError::NotFound(Entity::Appointment, appointment_id))?;
            if Some(appt.client_id) != client_id && Some(appt.business_id) != business_id {
                return Err(BookingError::Forbidden("appointment belongs to someone else"));
            }
            Ok(Response::ok(AppointmentView::from(&appt)))
        }
        Request::ListAppointments => {
            let appts = match principal {
                Some(Principal::Business(_)) => {
                    let business = require_business(engine, principal).await?;
                    engine.business_appointments(&business.id).await
                }
                _ => {
                    let client_id = require_client(engine, principal).await?;
                    engine.client_appointments(&client_id).await
                }
            };
            Ok(Response::ok(appts.iter().map(AppointmentView::from).collect::<Vec<_>>()))
        }
        Request::IsOpen { business_id, date, time } => {
            let open = engine
                .is_business_open(business_id, parse_date(&date)?, parse_time(&time)?)
                .await?;
            Ok(Response::ok(serde_json::json!({ "open": open })))
        }
    }
}
