use super::*;
use crate::limits::*;
use crate::period::Term;

use chrono::{NaiveDate, NaiveTime};

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn spring() -> PeriodId {
    PeriodId::new(Term::Spring, 2025)
}

fn mat101() -> CourseKey {
    CourseKey { subject_key: "MAT101".into(), section: 1, period_id: spring() }
}

fn booking(user: &str, room: &str, start: NaiveTime, duration: u32) -> Booking {
    Booking {
        user_id: user.into(),
        room_id: room.into(),
        period_id: spring(),
        start_time: start,
        duration_minutes: duration,
        motivo: "study group".into(),
    }
}

// ── Async engine tests ───────────────────────────────────

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("salones_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn new_engine(name: &str) -> Engine {
    Engine::new(test_wal_path(name), DEFAULT_LOCK_TIMEOUT).unwrap()
}

/// Rooms A1, B2 (classrooms) and L1 (lab), plus course MAT101/1 in SPRING-2025.
async fn seeded(name: &str) -> Engine {
    let engine = new_engine(name);
    engine.create_room("A1", 30, RoomKind::Classroom).await.unwrap();
    engine.create_room("B2", 60, RoomKind::Classroom).await.unwrap();
    engine.create_room("L1", 20, RoomKind::Lab).await.unwrap();
    engine
        .create_course("MAT101", 1, spring(), Some("Dra. Ruiz".into()))
        .await
        .unwrap();
    engine
}

/// A hand-made period spanning exactly four Tuesdays: 2025-03-04 .. 2025-03-25.
fn install_four_tuesday_period(engine: &Engine) -> PeriodId {
    let id = PeriodId::new(Term::Spring, 2031);
    engine.periods.insert(
        id,
        Period { id, start_date: d(2025, 3, 4), end_date: d(2025, 3, 25) },
    );
    id
}

fn room_ids(rooms: &[Room]) -> Vec<&str> {
    rooms.iter().map(|r| r.id.as_str()).collect()
}

// ── Catalog ──────────────────────────────────────────────

#[tokio::test]
async fn create_and_list_rooms() {
    let engine = seeded("create_rooms.wal").await;
    let all = engine.list_rooms(&RoomFilter::default()).await.unwrap();
    assert_eq!(room_ids(&all), vec!["A1", "B2", "L1"]);

    let big = engine
        .list_rooms(&RoomFilter { min_capacity: Some(30), kind: Some(RoomKind::Classroom) })
        .await
        .unwrap();
    assert_eq!(room_ids(&big), vec!["A1", "B2"]);
}

#[tokio::test]
async fn duplicate_room_is_already_exists() {
    let engine = seeded("dup_room.wal").await;
    let err = engine.create_room("A1", 10, RoomKind::Lab).await.unwrap_err();
    assert!(matches!(err, EngineError::AlreadyExists { kind: "room", .. }));
}

#[tokio::test]
async fn room_needs_positive_capacity_and_id() {
    let engine = new_engine("room_validation.wal");
    assert!(matches!(
        engine.create_room("A1", 0, RoomKind::Classroom).await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine.create_room("  ", 10, RoomKind::Classroom).await,
        Err(EngineError::Validation(_))
    ));
    let long = "X".repeat(MAX_ID_LEN + 1);
    assert!(matches!(
        engine.create_room(&long, 10, RoomKind::Classroom).await,
        Err(EngineError::LimitExceeded(_))
    ));
}

#[tokio::test]
async fn course_creates_period_implicitly() {
    let engine = new_engine("implicit_period.wal");
    assert!(engine.list_periods().is_empty());

    let fall: PeriodId = "OTOÑO-2025".parse().unwrap();
    engine.create_course("FIS200", 2, fall, None).await.unwrap();

    let periods = engine.list_periods();
    assert_eq!(periods.len(), 1);
    assert_eq!(periods[0].id.to_string(), "FALL-2025");
    assert_eq!(periods[0].start_date, d(2025, 8, 1));
    assert_eq!(periods[0].end_date, d(2025, 12, 10));

    // A second course in the same period reuses it.
    engine.create_course("FIS200", 3, fall, None).await.unwrap();
    assert_eq!(engine.list_periods().len(), 1);
    assert_eq!(engine.list_courses().len(), 2);
}

#[tokio::test]
async fn duplicate_course_and_bad_section() {
    let engine = seeded("dup_course.wal").await;
    let err = engine.create_course("MAT101", 1, spring(), None).await.unwrap_err();
    assert!(matches!(err, EngineError::AlreadyExists { kind: "course", .. }));
    assert!(matches!(
        engine.create_course("MAT101", 0, spring(), None).await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn duplicate_user_has_friendly_message() {
    let engine = new_engine("dup_user.wal");
    engine.create_user("ana", "Ana Pérez", Role::Student).await.unwrap();
    let err = engine.create_user("ana", "Ana Otra", Role::Professor).await.unwrap_err();
    assert!(matches!(err, EngineError::AlreadyExists { kind: "user", .. }));
    assert_eq!(err.to_string(), "user already exists: ana");
    assert_eq!(engine.get_user("ana").unwrap().role, Role::Student);
}

// ── Reservations ─────────────────────────────────────────

#[tokio::test]
async fn availability_round_trip() {
    let engine = seeded("availability_round_trip.wal").await;
    let date = d(2025, 3, 10);

    engine
        .create_reservation(&booking("u1", "A1", t(14, 0), 60), date)
        .await
        .unwrap();

    let at_two = engine.find_available_rooms(date, t(14, 0), 60).await.unwrap();
    assert!(!room_ids(&at_two).contains(&"A1"));
    assert_eq!(room_ids(&at_two), vec!["B2", "L1"]);

    let at_three = engine.find_available_rooms(date, t(15, 0), 60).await.unwrap();
    assert!(room_ids(&at_three).contains(&"A1"));
}

#[tokio::test]
async fn empty_catalog_has_no_available_rooms() {
    let engine = new_engine("empty_catalog.wal");
    assert!(engine.find_available_rooms(d(2025, 3, 10), t(9, 0), 60).await.unwrap().is_empty());
}

#[tokio::test]
async fn reservation_validation() {
    let engine = seeded("reservation_validation.wal").await;

    let mut b = booking("u1", "A1", t(9, 0), 0);
    assert!(matches!(
        engine.create_reservation(&b, d(2025, 3, 10)).await,
        Err(EngineError::Validation(_))
    ));

    b.duration_minutes = 60;
    b.motivo = "   ".into();
    assert!(matches!(
        engine.create_reservation(&b, d(2025, 3, 10)).await,
        Err(EngineError::Validation(_))
    ));

    b.motivo = "exam".into();
    // Outside SPRING-2025.
    assert!(matches!(
        engine.create_reservation(&b, d(2025, 6, 2)).await,
        Err(EngineError::Validation(_))
    ));

    // Period not in the catalog.
    b.period_id = PeriodId::new(Term::Fall, 2026);
    assert!(matches!(
        engine.create_reservation(&b, d(2026, 9, 1)).await,
        Err(EngineError::Validation(_))
    ));

    b.period_id = spring();
    b.room_id = "Z9".into();
    assert!(matches!(
        engine.create_reservation(&b, d(2025, 3, 10)).await,
        Err(EngineError::NotFound { kind: "room", .. })
    ));
}

#[tokio::test]
async fn reservation_conflicts_with_reservation() {
    let engine = seeded("res_vs_res.wal").await;
    let date = d(2025, 3, 10);
    engine.create_reservation(&booking("u1", "A1", t(9, 0), 60), date).await.unwrap();

    let err = engine
        .create_reservation(&booking("u2", "A1", t(9, 59), 30), date)
        .await
        .unwrap_err();
    match err {
        EngineError::Conflict(info) => {
            assert_eq!(info.room_id, "A1");
            assert_eq!(info.date, Some(date));
            assert!(matches!(info.occupant, Occupant::Reservation { .. }));
        }
        other => panic!("expected conflict, got {other:?}"),
    }

    // Touching endpoints are fine.
    engine.create_reservation(&booking("u2", "A1", t(10, 0), 30), date).await.unwrap();
    // Same interval, another date.
    engine.create_reservation(&booking("u2", "A1", t(9, 0), 60), d(2025, 3, 11)).await.unwrap();
}

#[tokio::test]
async fn reservation_conflicts_with_schedule_slot() {
    let engine = seeded("res_vs_slot.wal").await;
    engine
        .create_schedule_slot(&mat101(), "A1", Weekday::Monday, t(8, 0), 120)
        .await
        .unwrap();

    // 2025-03-10 is a Monday inside SPRING-2025.
    let err = engine
        .create_reservation(&booking("u1", "A1", t(9, 0), 60), d(2025, 3, 10))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Conflict(ConflictInfo { occupant: Occupant::Slot { .. }, .. })
    ));

    // Tuesday is free, and the room is not offered on Monday morning.
    engine
        .create_reservation(&booking("u1", "A1", t(9, 0), 60), d(2025, 3, 11))
        .await
        .unwrap();
    let free = engine.find_available_rooms(d(2025, 3, 10), t(9, 0), 60).await.unwrap();
    assert_eq!(room_ids(&free), vec!["B2", "L1"]);
    assert!(!engine.is_room_available("A1", d(2025, 3, 17), t(8, 30), 15).await.unwrap());
    assert!(engine.is_room_available("A1", d(2025, 3, 17), t(10, 0), 15).await.unwrap());
}

#[tokio::test]
async fn slot_does_not_block_outside_its_period() {
    let engine = seeded("slot_outside_period.wal").await;
    engine
        .create_schedule_slot(&mat101(), "A1", Weekday::Monday, t(8, 0), 120)
        .await
        .unwrap();
    let fall = PeriodId::new(Term::Fall, 2025);
    engine.create_course("HIS100", 1, fall, None).await.unwrap();

    let mut b = booking("u1", "A1", t(8, 0), 120);
    b.period_id = fall;
    // 2025-09-08 is a Monday in FALL-2025.
    engine.create_reservation(&b, d(2025, 9, 8)).await.unwrap();
}

#[tokio::test]
async fn periodic_reservation_is_atomic() {
    let engine = seeded("periodic_atomic.wal").await;
    let period = install_four_tuesday_period(&engine);

    let mut blocker = booking("someone", "A1", t(10, 0), 60);
    blocker.period_id = period;
    // Third Tuesday.
    engine.create_reservation(&blocker, d(2025, 3, 18)).await.unwrap();

    let mut periodic = booking("u1", "A1", t(10, 0), 60);
    periodic.period_id = period;
    let err = engine
        .create_periodic_reservation(&periodic, Weekday::Tuesday)
        .await
        .unwrap_err();
    match err {
        EngineError::Conflict(info) => assert_eq!(info.date, Some(d(2025, 3, 18))),
        other => panic!("expected conflict, got {other:?}"),
    }

    // Nothing from Tuesdays 1 and 2 was kept.
    assert!(engine.reservations_for_user("u1").await.unwrap().is_empty());
    assert!(engine.is_room_available("A1", d(2025, 3, 4), t(10, 0), 60).await.unwrap());
    assert!(engine.is_room_available("A1", d(2025, 3, 11), t(10, 0), 60).await.unwrap());
    let rs = engine.get_room("A1").unwrap();
    assert_eq!(rs.read().await.reservations.len(), 1);
}

#[tokio::test]
async fn periodic_reservation_books_every_matching_date() {
    let engine = seeded("periodic_ok.wal").await;
    let period = install_four_tuesday_period(&engine);

    let mut periodic = booking("u1", "B2", t(16, 0), 90);
    periodic.period_id = period;
    let created = engine
        .create_periodic_reservation(&periodic, Weekday::Tuesday)
        .await
        .unwrap();
    let dates: Vec<NaiveDate> = created.iter().map(|r| r.date).collect();
    assert_eq!(dates, vec![d(2025, 3, 4), d(2025, 3, 11), d(2025, 3, 18), d(2025, 3, 25)]);
    assert_eq!(engine.reservations_for_user("u1").await.unwrap(), created);
}

#[tokio::test]
async fn periodic_reservation_over_full_term() {
    let engine = seeded("periodic_full_term.wal").await;
    let created = engine
        .create_periodic_reservation(&booking("u1", "L1", t(18, 0), 60), Weekday::Monday)
        .await
        .unwrap();
    assert_eq!(created.len(), 18);
    assert_eq!(created.first().unwrap().date, d(2025, 1, 20));
    assert_eq!(created.last().unwrap().date, d(2025, 5, 19));
}

#[tokio::test]
async fn periodic_reservation_without_matching_dates_fails() {
    let engine = seeded("periodic_no_dates.wal").await;
    let id = PeriodId::new(Term::Fall, 2031);
    // Wednesday 2025-03-05 .. Monday 2025-03-10: no Tuesday.
    engine.periods.insert(id, Period { id, start_date: d(2025, 3, 5), end_date: d(2025, 3, 10) });

    let mut periodic = booking("u1", "A1", t(10, 0), 60);
    periodic.period_id = id;
    let err = engine
        .create_periodic_reservation(&periodic, Weekday::Tuesday)
        .await
        .unwrap_err();
    match err {
        EngineError::Validation(msg) => assert!(msg.contains("no applicable dates")),
        other => panic!("expected validation error, got {other:?}"),
    }
    assert_eq!(engine.wal_appends_since_compact().await, 4);
}

#[tokio::test]
async fn cancel_reservation_then_not_found() {
    let engine = seeded("cancel_one.wal").await;
    let r = engine
        .create_reservation(&booking("u1", "A1", t(9, 0), 60), d(2025, 3, 10))
        .await
        .unwrap();
    assert_eq!(engine.get_reservation(r.id).await.unwrap(), r);

    let cancelled = engine.cancel_reservation(r.id).await.unwrap();
    assert_eq!(cancelled.id, r.id);
    assert!(engine.is_room_available("A1", d(2025, 3, 10), t(9, 0), 60).await.unwrap());

    assert!(matches!(
        engine.cancel_reservation(r.id).await,
        Err(EngineError::NotFound { kind: "reservation", .. })
    ));
    assert!(matches!(
        engine.get_reservation(r.id).await,
        Err(EngineError::NotFound { .. })
    ));
}

#[tokio::test]
async fn cancel_reservation_rejects_slot_ids() {
    let engine = seeded("cancel_slot_id.wal").await;
    let slot = engine
        .create_schedule_slot(&mat101(), "A1", Weekday::Friday, t(7, 0), 60)
        .await
        .unwrap();
    assert!(matches!(
        engine.cancel_reservation(slot.id).await,
        Err(EngineError::NotFound { kind: "reservation", .. })
    ));
    assert_eq!(engine.schedule(spring(), None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn ranged_cancellation() {
    let engine = seeded("ranged_cancel.wal").await;
    let (d1, d2, d3) = (d(2025, 3, 10), d(2025, 3, 12), d(2025, 3, 14));
    engine.create_reservation(&booking("U", "A1", t(9, 0), 60), d1).await.unwrap();
    engine.create_reservation(&booking("U", "B2", t(9, 0), 60), d2).await.unwrap();
    let kept = engine.create_reservation(&booking("U", "A1", t(9, 0), 60), d3).await.unwrap();
    let other = engine.create_reservation(&booking("V", "L1", t(9, 0), 60), d1).await.unwrap();

    let cancelled = engine.cancel_reservations_in_range("U", d1, d2).await.unwrap();
    assert_eq!(cancelled.len(), 2);

    assert_eq!(engine.reservations_for_user("U").await.unwrap(), vec![kept]);
    assert_eq!(engine.reservations_for_user("V").await.unwrap(), vec![other]);
}

#[tokio::test]
async fn ranged_cancellation_nothing_to_cancel() {
    let engine = seeded("ranged_cancel_empty.wal").await;
    let err = engine
        .cancel_reservations_in_range("U", d(2025, 3, 1), d(2025, 3, 31))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { kind: "reservations", .. }));
    assert!(err.to_string().contains("nothing to cancel"));

    assert!(matches!(
        engine.cancel_reservations_in_range("U", d(2025, 3, 31), d(2025, 3, 1)).await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn ranged_cancellation_is_one_transaction() {
    let engine = seeded("ranged_cancel_record.wal").await;
    for day in 10..15 {
        engine
            .create_reservation(&booking("U", "A1", t(9, 0), 60), d(2025, 3, day))
            .await
            .unwrap();
    }
    let before = engine.wal_appends_since_compact().await;
    engine.cancel_reservations_in_range("U", d(2025, 3, 1), d(2025, 3, 31)).await.unwrap();
    assert_eq!(engine.wal_appends_since_compact().await, before + 1);
}

// ── Concurrency ──────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_booking_race_has_one_winner() {
    let engine = Arc::new(seeded("race.wal").await);

    for day in 10..24 {
        let date = d(2025, 3, day);
        let a = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine.create_reservation(&booking("u1", "A1", t(14, 0), 60), date).await
            })
        };
        let b = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine.create_reservation(&booking("u2", "A1", t(14, 0), 60), date).await
            })
        };
        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        let wins = [a.is_ok(), b.is_ok()].iter().filter(|w| **w).count();
        assert_eq!(wins, 1, "exactly one booking wins on {date}");
        let loser = if a.is_ok() { b } else { a };
        assert!(matches!(loser, Err(EngineError::Conflict(_))));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn no_double_booking_under_contention() {
    let engine = Arc::new(seeded("contention.wal").await);
    let date = d(2025, 4, 7); // Monday
    engine
        .create_schedule_slot(&mat101(), "A1", Weekday::Monday, t(12, 0), 60)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..48u32 {
        let engine = engine.clone();
        let start = t(8 + (i % 8), (i * 7) % 60);
        let duration = 30 + (i % 4) * 30;
        handles.push(tokio::spawn(async move {
            engine
                .create_reservation(&booking(&format!("u{i}"), "A1", start, duration), date)
                .await
        }));
    }
    let mut successes = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => successes += 1,
            Err(EngineError::Conflict(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    let rs = engine.get_room("A1").unwrap();
    let guard = rs.read().await;
    let booked = guard.reservations_on(date);
    assert_eq!(booked.len(), successes);
    for (i, a) in booked.iter().enumerate() {
        assert!(!overlaps(a.start_time, a.duration_minutes, t(12, 0), 60));
        for b in &booked[i + 1..] {
            assert!(!overlaps(a.start_time, a.duration_minutes, b.start_time, b.duration_minutes));
        }
    }
}

#[tokio::test]
async fn lock_timeout_is_retryable() {
    let engine = Engine::new(test_wal_path("lock_timeout.wal"), Duration::from_millis(50)).unwrap();
    engine.create_room("A1", 30, RoomKind::Classroom).await.unwrap();
    engine.create_course("MAT101", 1, spring(), None).await.unwrap();

    let held = engine.lock_room("A1").await.unwrap();
    let err = engine
        .create_reservation(&booking("u1", "A1", t(9, 0), 60), d(2025, 3, 10))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::LockTimeout(ref room) if room == "A1"));
    assert!(err.is_retryable());

    drop(held);
    engine
        .create_reservation(&booking("u1", "A1", t(9, 0), 60), d(2025, 3, 10))
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn disjoint_rooms_do_not_wait_on_each_other() {
    let engine = Arc::new(seeded("disjoint_rooms.wal").await);
    let _held = engine.lock_room("A1").await.unwrap();
    // B2 proceeds while A1 is locked.
    tokio::time::timeout(
        Duration::from_secs(2),
        engine.create_reservation(&booking("u1", "B2", t(9, 0), 60), d(2025, 3, 10)),
    )
    .await
    .expect("B2 must not wait for A1")
    .unwrap();
}

// ── Schedule slots ───────────────────────────────────────

#[tokio::test]
async fn slot_conflicts_within_period() {
    let engine = seeded("slot_conflict.wal").await;
    engine.create_course("FIS200", 1, spring(), None).await.unwrap();
    let fis = CourseKey { subject_key: "FIS200".into(), section: 1, period_id: spring() };

    engine
        .create_schedule_slot(&mat101(), "A1", Weekday::Monday, t(9, 0), 90)
        .await
        .unwrap();
    let err = engine
        .create_schedule_slot(&fis, "A1", Weekday::Monday, t(10, 0), 60)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(ConflictInfo { date: None, .. })));

    // Other room, other day, adjacent time: all fine.
    engine.create_schedule_slot(&fis, "B2", Weekday::Monday, t(10, 0), 60).await.unwrap();
    engine.create_schedule_slot(&fis, "A1", Weekday::Tuesday, t(10, 0), 60).await.unwrap();
    engine.create_schedule_slot(&fis, "A1", Weekday::Monday, t(10, 30), 60).await.unwrap();
}

#[tokio::test]
async fn multi_day_slot_creation_is_all_or_nothing() {
    let engine = seeded("multi_day_slots.wal").await;
    engine
        .create_schedule_slot(&mat101(), "A1", Weekday::Wednesday, t(9, 0), 60)
        .await
        .unwrap();
    engine.create_course("QUI100", 1, spring(), None).await.unwrap();
    let qui = CourseKey { subject_key: "QUI100".into(), section: 1, period_id: spring() };

    let err = engine
        .create_schedule_slots(&qui, "A1", &[Weekday::Monday, Weekday::Wednesday, Weekday::Friday], t(9, 0), 60)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
    assert_eq!(engine.schedule(spring(), None).await.unwrap().len(), 1);

    let created = engine
        .create_schedule_slots(&qui, "A1", &[Weekday::Friday, Weekday::Monday, Weekday::Monday], t(9, 0), 60)
        .await
        .unwrap();
    assert_eq!(created.len(), 2);
    assert_eq!(engine.schedule(spring(), None).await.unwrap().len(), 3);
}

#[tokio::test]
async fn slot_creation_validation() {
    let engine = seeded("slot_validation.wal").await;
    assert!(matches!(
        engine.create_schedule_slots(&mat101(), "A1", &[], t(9, 0), 60).await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine.create_schedule_slot(&mat101(), "A1", Weekday::Monday, t(23, 0), 90).await,
        Err(EngineError::Validation(_))
    ));
    let unknown = CourseKey { subject_key: "NOPE".into(), section: 1, period_id: spring() };
    assert!(matches!(
        engine.create_schedule_slot(&unknown, "A1", Weekday::Monday, t(9, 0), 60).await,
        Err(EngineError::NotFound { kind: "course", .. })
    ));
    assert!(matches!(
        engine.create_schedule_slot(&mat101(), "Z9", Weekday::Monday, t(9, 0), 60).await,
        Err(EngineError::NotFound { kind: "room", .. })
    ));
}

#[tokio::test]
async fn slot_blocked_by_existing_reservation() {
    let engine = seeded("slot_vs_reservation.wal").await;
    // 2025-04-08 is a Tuesday inside SPRING-2025.
    engine
        .create_reservation(&booking("u1", "A1", t(11, 0), 60), d(2025, 4, 8))
        .await
        .unwrap();
    let err = engine
        .create_schedule_slot(&mat101(), "A1", Weekday::Tuesday, t(10, 0), 90)
        .await
        .unwrap_err();
    match err {
        EngineError::Conflict(info) => assert_eq!(info.date, Some(d(2025, 4, 8))),
        other => panic!("expected conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn update_slot_excludes_itself_and_moves_rooms() {
    let engine = seeded("update_slot.wal").await;
    let slot = engine
        .create_schedule_slot(&mat101(), "A1", Weekday::Monday, t(9, 0), 60)
        .await
        .unwrap();

    // Overlaps its own old time only.
    let moved = engine
        .update_schedule_slot(slot.id, "A1", Weekday::Monday, t(9, 30), 60)
        .await
        .unwrap();
    assert_eq!(moved.start_time, t(9, 30));
    assert_eq!(moved.course, mat101());

    let moved = engine
        .update_schedule_slot(slot.id, "B2", Weekday::Thursday, t(7, 0), 120)
        .await
        .unwrap();
    assert_eq!(moved.room_id, "B2");
    assert!(engine.get_room("A1").unwrap().read().await.slots.is_empty());
    assert_eq!(engine.get_room_for_entity(&slot.id).as_deref(), Some("B2"));

    let schedule = engine.schedule(spring(), None).await.unwrap();
    assert_eq!(schedule.len(), 1);
    assert_eq!(schedule[0].slot, moved);

    engine.delete_schedule_slot(slot.id).await.unwrap();
    assert!(engine.schedule(spring(), None).await.unwrap().is_empty());
}

#[tokio::test]
async fn update_slot_conflict_leaves_it_untouched() {
    let engine = seeded("update_slot_conflict.wal").await;
    let a = engine
        .create_schedule_slot(&mat101(), "A1", Weekday::Monday, t(9, 0), 60)
        .await
        .unwrap();
    engine
        .create_schedule_slot(&mat101(), "A1", Weekday::Monday, t(11, 0), 60)
        .await
        .unwrap();

    let err = engine
        .update_schedule_slot(a.id, "A1", Weekday::Monday, t(10, 30), 60)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
    let rs = engine.get_room("A1").unwrap();
    let guard = rs.read().await;
    assert!(guard.slots.iter().any(|s| s.id == a.id && s.start_time == t(9, 0)));
}

#[tokio::test]
async fn missing_slots_are_not_found() {
    let engine = seeded("missing_slot.wal").await;
    let ghost = Ulid::new();
    assert!(matches!(
        engine.update_schedule_slot(ghost, "A1", Weekday::Monday, t(9, 0), 60).await,
        Err(EngineError::NotFound { kind: "schedule slot", .. })
    ));
    assert!(matches!(
        engine.delete_schedule_slot(ghost).await,
        Err(EngineError::NotFound { kind: "schedule slot", .. })
    ));

    let slot = engine
        .create_schedule_slot(&mat101(), "A1", Weekday::Monday, t(9, 0), 60)
        .await
        .unwrap();
    engine.delete_schedule_slot(slot.id).await.unwrap();
    assert!(matches!(
        engine.delete_schedule_slot(slot.id).await,
        Err(EngineError::NotFound { .. })
    ));
}

#[tokio::test]
async fn check_schedule_conflict_reports_bool() {
    let engine = seeded("check_conflict.wal").await;
    let slot = engine
        .create_schedule_slot(&mat101(), "A1", Weekday::Monday, t(9, 0), 60)
        .await
        .unwrap();

    assert!(engine
        .check_schedule_conflict("A1", Weekday::Monday, spring(), t(9, 30), 60, None)
        .await
        .unwrap());
    assert!(!engine
        .check_schedule_conflict("A1", Weekday::Monday, spring(), t(9, 30), 60, Some(slot.id))
        .await
        .unwrap());
    assert!(!engine
        .check_schedule_conflict("A1", Weekday::Monday, spring(), t(10, 0), 60, None)
        .await
        .unwrap());
    // FALL-2025 is not in the catalog yet; it is derived from the id and does not intersect.
    assert!(!engine
        .check_schedule_conflict("A1", Weekday::Monday, PeriodId::new(Term::Fall, 2025), t(9, 0), 60, None)
        .await
        .unwrap());
    assert!(matches!(
        engine
            .check_schedule_conflict("Z9", Weekday::Monday, spring(), t(9, 0), 60, None)
            .await,
        Err(EngineError::NotFound { .. })
    ));
}

// ── Room deletion ────────────────────────────────────────

#[tokio::test]
async fn delete_room_cascades() {
    let engine = seeded("delete_room.wal").await;
    let slot = engine
        .create_schedule_slot(&mat101(), "A1", Weekday::Monday, t(9, 0), 60)
        .await
        .unwrap();
    let r = engine
        .create_reservation(&booking("u1", "A1", t(14, 0), 60), d(2025, 3, 10))
        .await
        .unwrap();
    engine
        .create_reservation(&booking("u1", "B2", t(14, 0), 60), d(2025, 3, 10))
        .await
        .unwrap();

    let removal = engine.delete_room("A1").await.unwrap();
    assert_eq!(removal, RoomRemoval { slots: 1, reservations: 1 });

    assert!(engine.get_room("A1").is_none());
    assert!(engine.get_room_for_entity(&slot.id).is_none());
    assert!(matches!(engine.cancel_reservation(r.id).await, Err(EngineError::NotFound { .. })));
    assert_eq!(engine.reservations_for_user("u1").await.unwrap().len(), 1);
    let free = engine.find_available_rooms(d(2025, 3, 10), t(9, 0), 60).await.unwrap();
    assert_eq!(room_ids(&free), vec!["B2", "L1"]);

    assert!(matches!(engine.delete_room("A1").await, Err(EngineError::NotFound { .. })));

    // The id can be reused and starts empty.
    engine.create_room("A1", 25, RoomKind::Lab).await.unwrap();
    assert!(engine.is_room_available("A1", d(2025, 3, 10), t(9, 0), 60).await.unwrap());
}

// ── Views ────────────────────────────────────────────────

#[tokio::test]
async fn schedule_view_joins_instructor_and_orders() {
    let engine = seeded("schedule_view.wal").await;
    engine.create_course("FIS200", 1, spring(), None).await.unwrap();
    let fis = CourseKey { subject_key: "FIS200".into(), section: 1, period_id: spring() };

    engine.create_schedule_slot(&fis, "B2", Weekday::Monday, t(11, 0), 60).await.unwrap();
    engine.create_schedule_slot(&mat101(), "A1", Weekday::Monday, t(8, 0), 60).await.unwrap();
    engine.create_schedule_slot(&mat101(), "A1", Weekday::Wednesday, t(8, 0), 60).await.unwrap();

    let monday = engine.schedule(spring(), Some(Weekday::Monday)).await.unwrap();
    assert_eq!(monday.len(), 2);
    assert_eq!(monday[0].slot.start_time, t(8, 0));
    assert_eq!(monday[0].instructor.as_deref(), Some("Dra. Ruiz"));
    assert_eq!(monday[1].instructor, None);

    let all = engine.schedule(spring(), None).await.unwrap();
    assert_eq!(all.len(), 3);
    assert!(engine.schedule(PeriodId::new(Term::Fall, 2025), None).await.unwrap().is_empty());
}

#[tokio::test]
async fn reservations_for_user_are_chronological() {
    let engine = seeded("my_reservations.wal").await;
    engine.create_reservation(&booking("u1", "A1", t(15, 0), 30), d(2025, 3, 12)).await.unwrap();
    engine.create_reservation(&booking("u1", "B2", t(9, 0), 30), d(2025, 3, 12)).await.unwrap();
    engine.create_reservation(&booking("u1", "L1", t(18, 0), 30), d(2025, 3, 11)).await.unwrap();

    let mine = engine.reservations_for_user("u1").await.unwrap();
    let order: Vec<(NaiveDate, NaiveTime)> = mine.iter().map(|r| (r.date, r.start_time)).collect();
    assert_eq!(
        order,
        vec![(d(2025, 3, 11), t(18, 0)), (d(2025, 3, 12), t(9, 0)), (d(2025, 3, 12), t(15, 0))]
    );
    assert!(engine.reservations_for_user("nobody").await.unwrap().is_empty());
}

#[tokio::test]
async fn busiest_rooms_ranked_by_minutes() {
    let engine = seeded("busiest.wal").await;
    // 18 Mondays × 60 = 1080 minutes.
    engine.create_schedule_slot(&mat101(), "L1", Weekday::Monday, t(9, 0), 60).await.unwrap();
    engine.create_reservation(&booking("u1", "B2", t(9, 0), 120), d(2025, 3, 11)).await.unwrap();

    let top = engine.busiest_rooms(2).await.unwrap();
    assert_eq!(
        top,
        vec![
            RoomUsage { room_id: "L1".into(), occupied_minutes: 1080 },
            RoomUsage { room_id: "B2".into(), occupied_minutes: 120 },
        ]
    );
    let all = engine.busiest_rooms(10).await.unwrap();
    assert_eq!(all.last().unwrap(), &RoomUsage { room_id: "A1".into(), occupied_minutes: 0 });
}

#[tokio::test]
async fn free_windows_of_a_room() {
    let engine = seeded("free_windows.wal").await;
    engine.create_schedule_slot(&mat101(), "A1", Weekday::Monday, t(8, 0), 120).await.unwrap();
    engine.create_reservation(&booking("u1", "A1", t(13, 0), 60), d(2025, 3, 10)).await.unwrap();

    let windows = engine.room_free_windows("A1", d(2025, 3, 10)).await.unwrap();
    assert_eq!(
        windows,
        vec![Span::new(0, 480), Span::new(600, 780), Span::new(840, MINUTES_PER_DAY)]
    );
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn wal_replay_restores_everything() {
    let path = test_wal_path("replay.wal");
    let (slot, kept, cancelled) = {
        let engine = Engine::new(path.clone(), DEFAULT_LOCK_TIMEOUT).unwrap();
        engine.create_room("A1", 30, RoomKind::Classroom).await.unwrap();
        engine.create_room("B2", 60, RoomKind::Auditorium).await.unwrap();
        engine.create_room("GONE", 10, RoomKind::Lab).await.unwrap();
        engine.create_user("prof", "Prof. X", Role::Professor).await.unwrap();
        engine.create_course("MAT101", 1, spring(), Some("Dra. Ruiz".into())).await.unwrap();
        let slot = engine
            .create_schedule_slot(&mat101(), "A1", Weekday::Monday, t(9, 0), 60)
            .await
            .unwrap();
        let slot = engine
            .update_schedule_slot(slot.id, "B2", Weekday::Monday, t(9, 0), 60)
            .await
            .unwrap();
        let kept = engine
            .create_reservation(&booking("prof", "A1", t(14, 0), 60), d(2025, 3, 10))
            .await
            .unwrap();
        let cancelled = engine
            .create_reservation(&booking("prof", "A1", t(16, 0), 60), d(2025, 3, 10))
            .await
            .unwrap();
        engine.cancel_reservation(cancelled.id).await.unwrap();
        engine
            .create_reservation(&booking("prof", "GONE", t(9, 0), 60), d(2025, 3, 10))
            .await
            .unwrap();
        engine.delete_room("GONE").await.unwrap();
        (slot, kept, cancelled)
    };

    let engine = Engine::new(path, DEFAULT_LOCK_TIMEOUT).unwrap();
    let rooms = engine.list_rooms(&RoomFilter::default()).await.unwrap();
    assert_eq!(room_ids(&rooms), vec!["A1", "B2"]);
    assert_eq!(rooms[1].kind, RoomKind::Auditorium);
    assert_eq!(engine.get_user("prof").unwrap().role, Role::Professor);
    assert_eq!(engine.list_courses().len(), 1);
    assert_eq!(engine.list_periods().len(), 1);

    let schedule = engine.schedule(spring(), None).await.unwrap();
    assert_eq!(schedule.len(), 1);
    assert_eq!(schedule[0].slot, slot);
    assert_eq!(engine.reservations_for_user("prof").await.unwrap(), vec![kept.clone()]);
    assert!(matches!(engine.get_reservation(cancelled.id).await, Err(EngineError::NotFound { .. })));

    // Entity index is rebuilt: the replayed reservation can be cancelled.
    engine.cancel_reservation(kept.id).await.unwrap();
}

#[tokio::test]
async fn periodic_reservation_replays_as_a_unit() {
    let path = test_wal_path("replay_periodic.wal");
    {
        let engine = Engine::new(path.clone(), DEFAULT_LOCK_TIMEOUT).unwrap();
        engine.create_room("A1", 30, RoomKind::Classroom).await.unwrap();
        engine.create_course("MAT101", 1, spring(), None).await.unwrap();
        engine
            .create_periodic_reservation(&booking("u1", "A1", t(10, 0), 60), Weekday::Thursday)
            .await
            .unwrap();
        // Room, course (+ period) and the periodic booking: three transactions.
        assert_eq!(engine.wal_appends_since_compact().await, 3);
    }
    let engine = Engine::new(path, DEFAULT_LOCK_TIMEOUT).unwrap();
    let mine = engine.reservations_for_user("u1").await.unwrap();
    assert_eq!(mine.len(), 18);
    assert!(mine.iter().all(|r| Weekday::of(r.date) == Weekday::Thursday));
}

#[tokio::test]
async fn group_commit_batches_appends() {
    let path = test_wal_path("group_commit_batch.wal");
    let engine = Arc::new(Engine::new(path.clone(), DEFAULT_LOCK_TIMEOUT).unwrap());

    let n = 20;
    let mut handles = Vec::new();
    for i in 0..n {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            eng.create_room(&format!("R{i:02}"), 10, RoomKind::Classroom).await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
    assert_eq!(engine.room_count(), n);

    let engine2 = Engine::new(path, DEFAULT_LOCK_TIMEOUT).unwrap();
    assert_eq!(engine2.room_count(), n);
}

#[tokio::test]
async fn compaction_preserves_state_and_resets_counter() {
    let path = test_wal_path("compact.wal");
    let engine = Engine::new(path.clone(), DEFAULT_LOCK_TIMEOUT).unwrap();
    engine.create_room("A1", 30, RoomKind::Classroom).await.unwrap();
    engine.create_user("u1", "User One", Role::Student).await.unwrap();
    engine.create_course("MAT101", 1, spring(), None).await.unwrap();
    engine.create_schedule_slot(&mat101(), "A1", Weekday::Monday, t(9, 0), 60).await.unwrap();
    for day in 10..20 {
        let r = engine
            .create_reservation(&booking("u1", "A1", t(14, 0), 60), d(2025, 3, day))
            .await
            .unwrap();
        if day % 2 == 0 {
            engine.cancel_reservation(r.id).await.unwrap();
        }
    }
    assert!(engine.wal_appends_since_compact().await > 10);

    engine.compact_wal().await.unwrap();
    assert_eq!(engine.wal_appends_since_compact().await, 0);

    engine
        .create_reservation(&booking("u1", "A1", t(16, 0), 60), d(2025, 3, 10))
        .await
        .unwrap();

    let replayed = Engine::new(path, DEFAULT_LOCK_TIMEOUT).unwrap();
    assert_eq!(replayed.reservations_for_user("u1").await.unwrap().len(), 6);
    assert_eq!(replayed.schedule(spring(), None).await.unwrap().len(), 1);
    assert_eq!(replayed.list_periods().len(), 1);
    assert!(replayed.get_user("u1").is_some());
}
