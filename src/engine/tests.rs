use super::*;
use crate::notify::testing::RecordingNotifier;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

/// Wednesday.
fn wed() -> NaiveDate {
    d(2026, 10, 14)
}

fn at(date: NaiveDate, h: u32, m: u32) -> NaiveDateTime {
    date.and_time(t(h, m))
}

fn test_journal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("appointd_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

struct World {
    engine: Engine,
    clock: Clock,
    notifier: Arc<RecordingNotifier>,
    business: Business,
    service: Service,
    staff: Staff,
    client: Client,
}

fn open_engine(path: PathBuf, clock: &Clock, notifier: &Arc<RecordingNotifier>, retries: u32) -> Engine {
    let options = EngineOptions {
        clock: clock.clone(),
        max_notification_retries: retries,
    };
    Engine::open(path, notifier.clone(), options).unwrap()
}

/// Salon open 09:00-17:00 on weekdays, closed at weekends; 1.5h service; one
/// staff member; one client. "Now" is Wednesday 08:00.
async fn world(name: &str) -> World {
    world_on(test_journal_path(name)).await
}

async fn world_on(path: PathBuf) -> World {
    let clock = Clock::fixed(at(wed(), 8, 0));
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = open_engine(path, &clock, &notifier, 3);

    let business = engine
        .register_business("Kinyua Salon", "s3cret", OperatingHours::weekdays(t(9, 0), t(17, 0)))
        .await
        .unwrap();
    engine.verify_business(business.id).await.unwrap();
    let service = engine
        .add_service(business.id, "Box braids", Some("Medium length".into()), 4_500, 1.5)
        .await
        .unwrap();
    let staff = engine.add_staff(business.id, "Achieng", Some("Stylist".into())).await.unwrap();
    let client = engine.register_client("Amina", "amina@example.com", "+254700000001").await.unwrap();

    World { engine, clock, notifier, business, service, staff, client }
}

fn booking(w: &World, client_id: Ulid, staff: Option<Ulid>, date: NaiveDate, time: NaiveTime) -> BookRequest {
    BookRequest {
        client_id,
        service_id: w.service.id,
        staff_id: staff,
        date,
        time,
        comment: None,
    }
}

async fn another_client(w: &World, name: &str) -> Client {
    let email = format!("{}@example.com", name.to_lowercase());
    w.engine.register_client(name, &email, "+254700000999").await.unwrap()
}

fn reschedule(appt: &Appointment, date: NaiveDate, time: NaiveTime) -> RescheduleRequest {
    RescheduleRequest {
        appointment_id: appt.id,
        client_id: appt.client_id,
        date,
        time,
        staff_id: None,
        comment: None,
        notification: None,
    }
}

// ── Booking ──────────────────────────────────────────────

#[tokio::test]
async fn wednesday_scenario() {
    let w = world("wednesday_scenario.journal").await;
    let staff = Some(w.staff.id);

    let first = w.engine.book(booking(&w, w.client.id, staff, wed(), t(10, 0))).await.unwrap();
    assert!(first.warnings.is_empty());
    let schedule = w.engine.staff_schedule(w.staff.id, wed()).await.unwrap();
    assert_eq!(schedule.len(), 1);
    assert_eq!(schedule[0].window, Span::new(at(wed(), 10, 0), at(wed(), 11, 30)));

    let other = another_client(&w, "Baraka").await;
    let overlapping = w.engine.book(booking(&w, other.id, staff, wed(), t(10, 45))).await;
    assert!(matches!(
        overlapping,
        Err(BookingError::StaffConflict { conflicting, .. }) if conflicting == first.value.id
    ));

    let touching = w.engine.book(booking(&w, other.id, staff, wed(), t(11, 30))).await;
    assert!(touching.is_ok());

    let early = w.engine.book(booking(&w, other.id, staff, wed(), t(8, 0))).await;
    assert!(matches!(early, Err(BookingError::Closed(id)) if id == w.business.id));

    assert_eq!(w.engine.staff_schedule(w.staff.id, wed()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn booking_dispatches_confirmation() {
    let w = world("book_confirmation.journal").await;
    w.engine.book(booking(&w, w.client.id, None, wed(), t(10, 0))).await.unwrap();
    assert_eq!(w.notifier.kinds(), vec![NotificationKind::Confirmation]);
}

#[tokio::test]
async fn booking_checks_existence_first() {
    let w = world("book_not_found.journal").await;

    let mut req = booking(&w, Ulid::new(), None, wed(), t(10, 0));
    assert!(matches!(w.engine.book(req.clone()).await, Err(BookingError::NotFound(Entity::Client, _))));

    req.client_id = w.client.id;
    req.service_id = Ulid::new();
    assert!(matches!(w.engine.book(req.clone()).await, Err(BookingError::NotFound(Entity::Service, _))));

    req.service_id = w.service.id;
    req.staff_id = Some(Ulid::new());
    assert!(matches!(w.engine.book(req).await, Err(BookingError::NotFound(Entity::Staff, _))));
}

#[tokio::test]
async fn staff_from_another_business_is_forbidden() {
    let w = world("foreign_staff.journal").await;
    let rival = w
        .engine
        .register_business("Rival Cuts", "pw", OperatingHours::weekdays(t(9, 0), t(17, 0)))
        .await
        .unwrap();
    let outsider = w.engine.add_staff(rival.id, "Otieno", None).await.unwrap();

    let result = w.engine.book(booking(&w, w.client.id, Some(outsider.id), wed(), t(10, 0))).await;
    assert!(matches!(result, Err(BookingError::Forbidden(_))));
    assert!(w.engine.client_appointments(&w.client.id).await.is_empty());
}

#[tokio::test]
async fn past_slot_is_rejected() {
    let w = world("past_slot.journal").await;
    w.clock.set(at(wed(), 12, 0));
    let result = w.engine.book(booking(&w, w.client.id, None, wed(), t(11, 0))).await;
    assert!(matches!(result, Err(BookingError::Validation(_))));
}

#[tokio::test]
async fn slot_past_the_last_date_is_rejected() {
    let w = world("calendar_end.journal").await;
    let result = w.engine.book(booking(&w, w.client.id, None, NaiveDate::MAX, t(23, 30))).await;
    assert!(matches!(result, Err(BookingError::Validation(_))));

    // The engine keeps serving afterwards.
    assert!(w.engine.book(booking(&w, w.client.id, None, wed(), t(10, 0))).await.is_ok());
}

#[tokio::test]
async fn weekend_without_hours_is_closed() {
    let w = world("weekend_closed.journal").await;
    let saturday = d(2026, 10, 17);
    let result = w.engine.book(booking(&w, w.client.id, None, saturday, t(11, 0))).await;
    assert!(matches!(result, Err(BookingError::Closed(_))));

    let hours = OperatingHours::weekdays(t(9, 0), t(17, 0)).with_weekend(t(10, 0), t(14, 0));
    w.engine.set_operating_hours(w.business.id, hours).await.unwrap();
    assert!(w.engine.book(booking(&w, w.client.id, None, saturday, t(11, 0))).await.is_ok());
}

#[tokio::test]
async fn opening_and_closing_instants_are_closed() {
    let w = world("hours_bounds.journal").await;
    for time in [t(9, 0), t(17, 0)] {
        let result = w.engine.book(booking(&w, w.client.id, None, wed(), time)).await;
        assert!(matches!(result, Err(BookingError::Closed(_))), "{time} should be closed");
    }
    assert!(w.engine.is_business_open(w.business.id, wed(), t(9, 1)).await.unwrap());
}

#[tokio::test]
async fn unset_hours_are_closed() {
    let w = world("unset_hours.journal").await;
    let bare = w
        .engine
        .register_business("Pop-up", "pw", OperatingHours::default())
        .await
        .unwrap();
    for date in [wed(), d(2026, 10, 17)] {
        assert!(!w.engine.is_business_open(bare.id, date, t(12, 0)).await.unwrap());
    }
}

#[tokio::test]
async fn availability_exception_blocks_staff() {
    let w = world("exception_blocks.journal").await;
    let ex = w
        .engine
        .add_availability_exception(w.business.id, w.staff.id, wed(), t(12, 0), t(14, 0))
        .await
        .unwrap();

    let inside = w.engine.book(booking(&w, w.client.id, Some(w.staff.id), wed(), t(13, 0))).await;
    assert!(matches!(inside, Err(BookingError::StaffConflict { conflicting, .. }) if conflicting == ex.id));

    w.engine.remove_availability_exception(w.business.id, ex.id).await.unwrap();
    assert!(w.engine.book(booking(&w, w.client.id, Some(w.staff.id), wed(), t(13, 0))).await.is_ok());
}

#[tokio::test]
async fn late_booking_blocks_next_morning() {
    let w = world("cross_midnight.journal").await;
    let all_day = OperatingHours::weekdays(t(0, 0), t(23, 59));
    w.engine.set_operating_hours(w.business.id, all_day).await.unwrap();

    // 23:00 + 1h30 runs until 00:30 on Thursday.
    w.engine.book(booking(&w, w.client.id, Some(w.staff.id), wed(), t(23, 0))).await.unwrap();

    let other = another_client(&w, "Chebet").await;
    let thursday = wed().succ_opt().unwrap();
    let clash = w.engine.book(booking(&w, other.id, Some(w.staff.id), thursday, t(0, 15))).await;
    assert!(matches!(clash, Err(BookingError::StaffConflict { .. })));
    assert!(w.engine.book(booking(&w, other.id, Some(w.staff.id), thursday, t(0, 30))).await.is_ok());

    let thursday_schedule = w.engine.staff_schedule(w.staff.id, thursday).await.unwrap();
    assert_eq!(thursday_schedule.len(), 2);
}

// ── Client double-booking ────────────────────────────────

#[tokio::test]
async fn client_cannot_hold_the_same_slot_twice() {
    let w = world("client_double_book.journal").await;
    let first = w.engine.book(booking(&w, w.client.id, None, wed(), t(10, 0))).await.unwrap();

    // Same exact slot at a different business still collides.
    let elsewhere = w
        .engine
        .register_business("Nail Bar", "pw", OperatingHours::weekdays(t(8, 0), t(20, 0)))
        .await
        .unwrap();
    let nails = w.engine.add_service(elsewhere.id, "Manicure", None, 1_500, 0.5).await.unwrap();
    let mut req = booking(&w, w.client.id, None, wed(), t(10, 0));
    req.service_id = nails.id;
    let dup = w.engine.book(req.clone()).await;
    assert!(matches!(dup, Err(BookingError::ClientDoubleBooked(id)) if id == first.value.id));

    // A minute apart is allowed even though the windows overlap.
    let mut shifted = req.clone();
    shifted.time = t(10, 1);
    assert!(w.engine.book(shifted).await.is_ok());

    w.engine.cancel(first.value.id, w.client.id, None).await.unwrap();
    assert!(w.engine.book(req).await.is_ok());
}

#[tokio::test]
async fn concurrent_bookings_for_one_slot_admit_exactly_one() {
    let w = world("concurrent_slot.journal").await;
    let engine = Arc::new(w.engine);

    let mut clients = Vec::new();
    for i in 0..8 {
        let c = engine
            .register_client(&format!("Client {i}"), &format!("c{i}@example.com"), "")
            .await
            .unwrap();
        clients.push(c.id);
    }

    let mut handles = Vec::new();
    for client_id in clients {
        let engine = engine.clone();
        let req = BookRequest {
            client_id,
            service_id: w.service.id,
            staff_id: Some(w.staff.id),
            date: wed(),
            time: t(10, 0),
            comment: None,
        };
        handles.push(tokio::spawn(async move { engine.book(req).await }));
    }

    let mut ok = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(e) => assert!(matches!(e, BookingError::StaffConflict { .. })),
        }
    }
    assert_eq!(ok, 1);
}

#[tokio::test]
async fn slot_constraints_surface_as_booking_errors() {
    let w = world("slot_constraints.journal").await;
    let held = w
        .engine
        .book(booking(&w, w.client.id, Some(w.staff.id), wed(), t(10, 0)))
        .await
        .unwrap()
        .value;
    let other = another_client(&w, "Zawadi").await;

    let mut store = w.engine.store.write().await;
    let same_staff = Appointment { id: Ulid::new(), client_id: other.id, ..held.clone() };
    let err = w
        .engine
        .commit(&mut store, Event::AppointmentBooked { appointment: same_staff })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "StaffConflict");
    assert!(matches!(err, BookingError::StaffConflict { conflicting, .. } if conflicting == held.id));

    let same_client = Appointment { id: Ulid::new(), staff_id: None, ..held.clone() };
    let err = w
        .engine
        .commit(&mut store, Event::AppointmentBooked { appointment: same_client })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "ClientDoubleBooked");
    assert!(matches!(err, BookingError::ClientDoubleBooked(existing) if existing == held.id));
    drop(store);

    assert_eq!(w.engine.business_appointments(&w.business.id).await, vec![held]);
}

// ── Reschedule ───────────────────────────────────────────

#[tokio::test]
async fn reschedule_to_own_slot_succeeds() {
    let w = world("reschedule_self.journal").await;
    let appt = w.engine.book(booking(&w, w.client.id, Some(w.staff.id), wed(), t(10, 0))).await.unwrap().value;

    let same = w.engine.reschedule(reschedule(&appt, wed(), t(10, 0))).await.unwrap();
    assert_eq!(same.value.starts_at(), appt.starts_at());

    // Overlapping its own old window is also fine.
    let shifted = w.engine.reschedule(reschedule(&appt, wed(), t(10, 30))).await.unwrap();
    assert_eq!(shifted.value.time, t(10, 30));
    assert_eq!(shifted.value.staff_id, Some(w.staff.id));
}

#[tokio::test]
async fn reschedule_rechecks_staff_and_hours() {
    let w = world("reschedule_checks.journal").await;
    let first = w.engine.book(booking(&w, w.client.id, Some(w.staff.id), wed(), t(10, 0))).await.unwrap().value;
    let other = another_client(&w, "Daudi").await;
    let second = w.engine.book(booking(&w, other.id, Some(w.staff.id), wed(), t(13, 0))).await.unwrap().value;

    let onto_first = w.engine.reschedule(reschedule(&second, wed(), t(11, 0))).await;
    assert!(matches!(
        onto_first,
        Err(BookingError::StaffConflict { conflicting, .. }) if conflicting == first.id
    ));

    let after_hours = w.engine.reschedule(reschedule(&second, wed(), t(18, 0))).await;
    assert!(matches!(after_hours, Err(BookingError::Closed(_))));

    // Rejections leave the appointment untouched.
    assert_eq!(w.engine.appointment(&second.id).await.unwrap().time, t(13, 0));
}

#[tokio::test]
async fn reschedule_by_another_client_is_forbidden() {
    let w = world("reschedule_forbidden.journal").await;
    let appt = w.engine.book(booking(&w, w.client.id, None, wed(), t(10, 0))).await.unwrap().value;
    let mut req = reschedule(&appt, wed(), t(14, 0));
    req.client_id = Ulid::new();
    assert!(matches!(w.engine.reschedule(req).await, Err(BookingError::Forbidden(_))));
}

#[tokio::test]
async fn reschedule_notice_follows_requested_channel() {
    let w = world("reschedule_channel.journal").await;
    let appt = w.engine.book(booking(&w, w.client.id, None, wed(), t(10, 0))).await.unwrap().value;

    w.engine.reschedule(reschedule(&appt, wed(), t(11, 0))).await.unwrap();
    assert_eq!(w.notifier.kinds(), vec![NotificationKind::Confirmation]);

    let mut req = reschedule(&appt, wed(), t(12, 0));
    req.notification = Some(Channel::Sms);
    req.comment = Some("running late".into());
    let moved = w.engine.reschedule(req).await.unwrap().value;
    assert_eq!(moved.comment.as_deref(), Some("running late"));

    let delivered = w.notifier.delivered.lock().unwrap().clone();
    assert_eq!(delivered.len(), 2);
    assert_eq!(delivered[1].kind, NotificationKind::Reschedule);
    assert_eq!(delivered[1].channel, Channel::Sms);
    assert_eq!(delivered[1].time, t(12, 0));
}

// ── Cancel ───────────────────────────────────────────────

#[tokio::test]
async fn cancel_is_idempotent() {
    let w = world("cancel_idempotent.journal").await;
    let appt = w.engine.book(booking(&w, w.client.id, None, wed(), t(10, 0))).await.unwrap().value;

    let cancelled = w.engine.cancel(appt.id, w.client.id, Some("fever".into())).await.unwrap();
    assert!(cancelled.value.is_cancelled());
    assert_eq!(cancelled.value.comment.as_deref(), Some("fever"));

    let again = w.engine.cancel(appt.id, w.client.id, Some("other".into())).await.unwrap();
    assert!(again.value.is_cancelled());
    assert_eq!(again.value.comment.as_deref(), Some("fever"));
    assert_eq!(
        w.notifier.kinds(),
        vec![NotificationKind::Confirmation, NotificationKind::Cancellation]
    );

    let reschedule_cancelled = w.engine.reschedule(reschedule(&appt, wed(), t(11, 0))).await;
    assert!(matches!(reschedule_cancelled, Err(BookingError::InvalidState(_))));
}

#[tokio::test]
async fn cancel_by_another_client_is_forbidden() {
    let w = world("cancel_forbidden.journal").await;
    let appt = w.engine.book(booking(&w, w.client.id, None, wed(), t(10, 0))).await.unwrap().value;
    let result = w.engine.cancel(appt.id, Ulid::new(), None).await;
    assert!(matches!(result, Err(BookingError::Forbidden(_))));
    assert!(w.engine.appointment(&appt.id).await.unwrap().is_active());
}

// ── Assign staff ─────────────────────────────────────────

#[tokio::test]
async fn assign_staff_requires_password_and_availability() {
    let w = world("assign_staff.journal").await;
    let busy = w.engine.book(booking(&w, w.client.id, Some(w.staff.id), wed(), t(10, 0))).await.unwrap().value;
    let other = another_client(&w, "Esther").await;
    let open = w.engine.book(booking(&w, other.id, None, wed(), t(10, 30))).await.unwrap().value;

    let wrong = w.engine.assign_staff(open.id, w.business.id, w.staff.id, "guess").await;
    assert!(matches!(wrong, Err(BookingError::Forbidden(_))));

    let clash = w.engine.assign_staff(open.id, w.business.id, w.staff.id, "s3cret").await;
    assert!(matches!(clash, Err(BookingError::StaffConflict { conflicting, .. }) if conflicting == busy.id));

    let second = w.engine.add_staff(w.business.id, "Faraji", None).await.unwrap();
    let assigned = w.engine.assign_staff(open.id, w.business.id, second.id, "s3cret").await.unwrap();
    assert_eq!(assigned.staff_id, Some(second.id));

    w.engine.cancel(open.id, other.id, None).await.unwrap();
    let on_cancelled = w.engine.assign_staff(open.id, w.business.id, second.id, "s3cret").await;
    assert!(matches!(on_cancelled, Err(BookingError::InvalidState(_))));
}

#[tokio::test]
async fn assign_staff_checks_ownership() {
    let w = world("assign_ownership.journal").await;
    let appt = w.engine.book(booking(&w, w.client.id, None, wed(), t(10, 0))).await.unwrap().value;
    let rival = w
        .engine
        .register_business("Rival Cuts", "pw", OperatingHours::weekdays(t(9, 0), t(17, 0)))
        .await
        .unwrap();
    let rival_staff = w.engine.add_staff(rival.id, "Gathoni", None).await.unwrap();

    let foreign_appt = w.engine.assign_staff(appt.id, rival.id, rival_staff.id, "pw").await;
    assert!(matches!(foreign_appt, Err(BookingError::Forbidden(_))));

    let foreign_staff = w.engine.assign_staff(appt.id, w.business.id, rival_staff.id, "s3cret").await;
    assert!(matches!(foreign_staff, Err(BookingError::Forbidden(_))));
}

// ── Complete ─────────────────────────────────────────────

#[tokio::test]
async fn completion_requires_a_started_appointment() {
    let w = world("complete_lifecycle.journal").await;
    let appt = w.engine.book(booking(&w, w.client.id, Some(w.staff.id), wed(), t(10, 0))).await.unwrap().value;

    let early = w.engine.complete(appt.id, w.business.id).await;
    assert!(matches!(early, Err(BookingError::InvalidState(_))));

    w.clock.set(at(wed(), 10, 0));
    let done = w.engine.complete(appt.id, w.business.id).await.unwrap();
    assert!(done.value.is_completed());
    assert_eq!(w.notifier.kinds().last(), Some(&NotificationKind::ReviewRequest));

    assert!(matches!(w.engine.complete(appt.id, w.business.id).await, Err(BookingError::InvalidState(_))));
    assert!(matches!(w.engine.cancel(appt.id, w.client.id, None).await, Err(BookingError::InvalidState(_))));
    assert!(matches!(
        w.engine.reschedule(reschedule(&appt, wed(), t(15, 0))).await,
        Err(BookingError::InvalidState(_))
    ));
}

#[tokio::test]
async fn completed_appointment_still_occupies_staff() {
    let w = world("completed_occupies.journal").await;
    w.engine.book(booking(&w, w.client.id, Some(w.staff.id), wed(), t(10, 0))).await.unwrap();
    w.clock.set(at(wed(), 10, 10));
    let appt = w.engine.client_appointments(&w.client.id).await.remove(0);
    w.engine.complete(appt.id, w.business.id).await.unwrap();

    let other = another_client(&w, "Halima").await;
    let result = w.engine.book(booking(&w, other.id, Some(w.staff.id), wed(), t(11, 0))).await;
    assert!(matches!(result, Err(BookingError::StaffConflict { .. })));
}

#[tokio::test]
async fn complete_by_another_business_is_forbidden() {
    let w = world("complete_forbidden.journal").await;
    let appt = w.engine.book(booking(&w, w.client.id, None, wed(), t(10, 0))).await.unwrap().value;
    w.clock.set(at(wed(), 11, 0));
    let rival = w.engine.register_business("Rival", "pw", OperatingHours::default()).await.unwrap();
    assert!(matches!(w.engine.complete(appt.id, rival.id).await, Err(BookingError::Forbidden(_))));
}

// ── Notifications ────────────────────────────────────────

#[tokio::test]
async fn notification_failure_never_rolls_back() {
    let w = world("notify_failure.journal").await;
    w.notifier.set_failing(true);

    let outcome = w.engine.book(booking(&w, w.client.id, None, wed(), t(10, 0))).await.unwrap();
    assert_eq!(outcome.warnings.len(), 1);
    assert_eq!(outcome.warnings[0].kind, NotificationKind::Confirmation);
    assert!(w.engine.appointment(&outcome.value.id).await.is_some());

    let queued = w.engine.failed_notifications();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].id, outcome.warnings[0].outbox_id);
    assert_eq!(queued[0].retry_count, 0);

    w.notifier.set_failing(false);
    let report = w.engine.retry_failed_notifications().await;
    assert_eq!(report, RetryReport { attempted: 1, delivered: 1, failed: 0 });
    assert!(w.engine.failed_notifications().is_empty());
    assert_eq!(w.notifier.kinds(), vec![NotificationKind::Confirmation]);
}

#[tokio::test]
async fn retries_stop_at_the_limit() {
    let clock = Clock::fixed(at(wed(), 8, 0));
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = open_engine(test_journal_path("retry_limit.journal"), &clock, &notifier, 2);
    let business = engine
        .register_business("Barber", "pw", OperatingHours::weekdays(t(9, 0), t(17, 0)))
        .await
        .unwrap();
    let service = engine.add_service(business.id, "Fade", None, 800, 0.5).await.unwrap();
    let client = engine.register_client("Imani", "imani@example.com", "").await.unwrap();

    notifier.set_failing(true);
    engine
        .book(BookRequest {
            client_id: client.id,
            service_id: service.id,
            staff_id: None,
            date: wed(),
            time: t(10, 0),
            comment: None,
        })
        .await
        .unwrap();

    for _ in 0..2 {
        let report = engine.retry_failed_notifications().await;
        assert_eq!(report, RetryReport { attempted: 1, delivered: 0, failed: 1 });
    }
    let exhausted = engine.failed_notifications();
    assert_eq!(exhausted.len(), 1);
    assert_eq!(exhausted[0].retry_count, 2);
    assert!(!exhausted[0].retryable());
    assert_eq!(exhausted[0].last_error, "gateway unavailable");

    assert_eq!(engine.retry_failed_notifications().await.attempted, 0);

    let retention = std::time::Duration::from_secs(3600);
    assert_eq!(engine.discard_exhausted_notifications(retention).await, 0);
    clock.set(at(wed(), 9, 0));
    assert_eq!(engine.discard_exhausted_notifications(retention).await, 1);
    assert!(engine.failed_notifications().is_empty());
}

#[tokio::test]
async fn retryable_entries_are_never_discarded() {
    let w = world("discard_retryable.journal").await;
    w.notifier.set_failing(true);
    w.engine.book(booking(&w, w.client.id, None, wed(), t(10, 0))).await.unwrap();

    w.clock.set(at(d(2026, 12, 1), 8, 0));
    let discarded = w.engine.discard_exhausted_notifications(std::time::Duration::from_secs(60)).await;
    assert_eq!(discarded, 0);
    assert_eq!(w.engine.failed_notifications().len(), 1);
}

#[tokio::test]
async fn reminders_are_sent_once() {
    let w = world("reminders.journal").await;
    let appt = w.engine.book(booking(&w, w.client.id, None, wed(), t(10, 0))).await.unwrap().value;
    let other = another_client(&w, "Jabali").await;
    let cancelled = w.engine.book(booking(&w, other.id, None, wed(), t(12, 0))).await.unwrap().value;
    w.engine.cancel(cancelled.id, other.id, None).await.unwrap();
    w.engine.book(booking(&w, other.id, None, d(2026, 10, 15), t(12, 0))).await.unwrap();

    let report = w.engine.dispatch_reminders(wed()).await;
    assert_eq!(report.sent, 1);
    assert!(report.warnings.is_empty());
    assert!(w.engine.appointment(&appt.id).await.unwrap().reminded);

    assert_eq!(w.engine.dispatch_reminders(wed()).await.sent, 0);

    // Moving the appointment re-arms its reminder.
    w.engine.reschedule(reschedule(&appt, wed(), t(14, 0))).await.unwrap();
    assert_eq!(w.engine.dispatch_reminders(wed()).await.sent, 1);
}

// ── Catalog ──────────────────────────────────────────────

#[tokio::test]
async fn service_duration_is_validated() {
    let w = world("service_duration.journal").await;
    for hours in [0.0, -1.0, f64::NAN, 25.0] {
        let result = w.engine.add_service(w.business.id, "Bad", None, 100, hours).await;
        assert!(matches!(result, Err(BookingError::Validation(_))), "{hours} should be rejected");
    }
    let quarter = w.engine.add_service(w.business.id, "Trim", None, 100, 0.25).await.unwrap();
    assert_eq!(quarter.duration.minutes(), 15);
}

#[tokio::test]
async fn inverted_hours_are_rejected() {
    let w = world("inverted_hours.journal").await;
    let result = w
        .engine
        .set_operating_hours(w.business.id, OperatingHours::weekdays(t(17, 0), t(9, 0)))
        .await;
    assert!(matches!(result, Err(BookingError::Validation(_))));
}

#[tokio::test]
async fn removing_staff_keeps_their_appointments() {
    let w = world("remove_staff.journal").await;
    let appt = w.engine.book(booking(&w, w.client.id, Some(w.staff.id), wed(), t(10, 0))).await.unwrap().value;

    w.engine.remove_staff(w.business.id, w.staff.id).await.unwrap();
    let kept = w.engine.appointment(&appt.id).await.unwrap();
    assert!(kept.is_active());
    assert_eq!(kept.staff_id, None);
    assert!(matches!(
        w.engine.staff_schedule(w.staff.id, wed()).await,
        Err(BookingError::NotFound(Entity::Staff, _))
    ));
}

#[tokio::test]
async fn oversized_input_hits_limits() {
    let w = world("limits.journal").await;
    let long_name = "x".repeat(crate::limits::MAX_NAME_LEN + 1);
    assert!(matches!(
        w.engine.add_staff(w.business.id, &long_name, None).await,
        Err(BookingError::LimitExceeded(_))
    ));

    let mut req = booking(&w, w.client.id, None, wed(), t(10, 0));
    req.comment = Some("y".repeat(crate::limits::MAX_COMMENT_LEN + 1));
    assert!(matches!(w.engine.book(req).await, Err(BookingError::LimitExceeded(_))));
}

// ── Journal ──────────────────────────────────────────────

#[tokio::test]
async fn state_survives_restart() {
    let path = test_journal_path("restart.journal");
    let clock = Clock::fixed(at(wed(), 8, 0));
    let notifier = Arc::new(RecordingNotifier::default());

    let (client_id, service_id, appt_id) = {
        let engine = open_engine(path.clone(), &clock, &notifier, 3);
        let business = engine
            .register_business("Salon", "pw", OperatingHours::weekdays(t(9, 0), t(17, 0)))
            .await
            .unwrap();
        let service = engine.add_service(business.id, "Wash", None, 500, 1.0).await.unwrap();
        let client = engine.register_client("Kamau", "kamau@example.com", "").await.unwrap();

        notifier.set_failing(true);
        let appt = engine
            .book(BookRequest {
                client_id: client.id,
                service_id: service.id,
                staff_id: None,
                date: wed(),
                time: t(10, 0),
                comment: Some("first visit".into()),
            })
            .await
            .unwrap()
            .value;
        notifier.set_failing(false);
        (client.id, service.id, appt.id)
    };

    let engine = open_engine(path, &clock, &notifier, 3);
    let restored = engine.appointment(&appt_id).await.unwrap();
    assert_eq!(restored.comment.as_deref(), Some("first visit"));
    assert_eq!(engine.failed_notifications().len(), 1);

    let dup = engine
        .book(BookRequest {
            client_id,
            service_id,
            staff_id: None,
            date: wed(),
            time: t(10, 0),
            comment: None,
        })
        .await;
    assert!(matches!(dup, Err(BookingError::ClientDoubleBooked(id)) if id == appt_id));
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_journal_path("compaction.journal");
    let w = world_on(path.clone()).await;

    let kept = w.engine.book(booking(&w, w.client.id, None, wed(), t(10, 0))).await.unwrap().value;
    let dropped = w.engine.book(booking(&w, w.client.id, None, wed(), t(12, 0))).await.unwrap().value;
    w.engine.cancel(dropped.id, w.client.id, None).await.unwrap();
    w.engine.reschedule(reschedule(&kept, wed(), t(11, 0))).await.unwrap();
    assert!(w.engine.journal_appends_since_compact().await > 0);

    w.engine.compact_journal().await.unwrap();
    assert_eq!(w.engine.journal_appends_since_compact().await, 0);

    let reopened = open_engine(path, &w.clock, &w.notifier, 3);
    assert_eq!(reopened.appointment(&kept.id).await.unwrap().time, t(11, 0));
    assert!(reopened.appointment(&dropped.id).await.unwrap().is_cancelled());
    assert_eq!(reopened.client_appointments(&w.client.id).await.len(), 2);
}
