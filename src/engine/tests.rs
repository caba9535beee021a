use super::ledger::{plan_cancellation, plan_slot, validate_span};
use super::*;
use crate::limits::*;
use crate::media::MediaKind;

const H: Ms = 3_600_000; // 1 hour in ms
/// 2026-01-01T00:00:00Z
const DAY: Ms = 1_767_225_600_000;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("slotbook_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn new_engine(name: &str) -> Engine {
    Engine::new(test_wal_path(name), Arc::new(NotifyHub::new())).unwrap()
}

fn reopen(path: &PathBuf) -> Engine {
    Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap()
}

/// One market, one date, `n` consecutive one-hour slots starting at 10:00.
async fn seed(engine: &Engine, n: usize) -> (Ulid, Ulid, Vec<Ulid>) {
    let market = Ulid::new();
    engine
        .create_market(market, "Riverside Farmers Market", Some("Pier 4".into()), 7_500, None)
        .await
        .unwrap();
    let date = Ulid::new();
    engine.create_performance_date(date, market, DAY, None).await.unwrap();
    let mut slots = Vec::new();
    for i in 0..n {
        let id = Ulid::new();
        let start = DAY + (10 + i as Ms) * H;
        engine
            .create_time_slot(id, date, start, start + H, i as u32 + 1)
            .await
            .unwrap();
        slots.push(id);
    }
    (market, date, slots)
}

async fn musician(engine: &Engine, name: &str) -> Ulid {
    let id = Ulid::new();
    engine
        .register_musician(NewMusician {
            id,
            name: name.to_string(),
            email: format!("{}@bands.test", name.to_lowercase().replace(' ', ".")),
            phone: "555-0100".into(),
            genre: "folk".into(),
            description: None,
            website: None,
        })
        .await
        .unwrap();
    id
}

async fn book(engine: &Engine, musician_id: Ulid, slot: Ulid, join_waitlist: bool) -> SlotOutcome {
    let results = engine.create_bookings(musician_id, &[slot], join_waitlist).await.unwrap();
    assert_eq!(results.len(), 1);
    results[0].outcome
}

fn positions(view: &SlotLedgerView) -> Vec<u32> {
    view.waitlist.iter().map(|e| e.position).collect()
}

// ── Pure planning ────────────────────────────────────────

fn empty_slot() -> SlotState {
    SlotState::new(Ulid::new(), Ulid::new(), Span::new(DAY + 10 * H, DAY + 11 * H), 1)
}

#[test]
fn plan_open_slot_confirms() {
    let slot = empty_slot();
    let m = Ulid::new();
    let (outcome, event) = plan_slot(&slot, m, false, DAY).unwrap();
    let booking_id = outcome.booking_id().unwrap();
    assert_eq!(
        event,
        Some(Event::BookingConfirmed {
            id: booking_id,
            time_slot_id: slot.id,
            musician_id: m,
            booked_at: DAY,
            promoted: false,
        })
    );
}

#[test]
fn plan_occupied_slot_without_opt_in_is_full() {
    let mut slot = empty_slot();
    let (_, event) = plan_slot(&slot, Ulid::new(), false, DAY).unwrap();
    apply_to_slot(&mut slot, &event.unwrap());

    let (outcome, event) = plan_slot(&slot, Ulid::new(), false, DAY).unwrap();
    assert_eq!(outcome, SlotOutcome::Full);
    assert!(event.is_none());
}

#[test]
fn plan_checks_own_booking_before_occupancy() {
    let mut slot = empty_slot();
    let m = Ulid::new();
    let (_, event) = plan_slot(&slot, m, true, DAY).unwrap();
    apply_to_slot(&mut slot, &event.unwrap());

    let (outcome, event) = plan_slot(&slot, m, true, DAY).unwrap();
    assert_eq!(outcome, SlotOutcome::AlreadyBooked);
    assert!(event.is_none());
}

#[test]
fn plan_waitlist_positions_follow_max() {
    let mut slot = empty_slot();
    let (_, event) = plan_slot(&slot, Ulid::new(), false, DAY).unwrap();
    apply_to_slot(&mut slot, &event.unwrap());

    for expected in 1..=3 {
        let m = Ulid::new();
        let (outcome, event) = plan_slot(&slot, m, true, DAY).unwrap();
        assert_eq!(outcome, SlotOutcome::Waitlisted { position: expected });
        apply_to_slot(&mut slot, &event.unwrap());
        let (again, none) = plan_slot(&slot, m, true, DAY).unwrap();
        assert_eq!(again, SlotOutcome::AlreadyWaitlisted);
        assert!(none.is_none());
    }
}

#[test]
fn plan_refuses_waitlist_past_limit() {
    let mut slot = empty_slot();
    let (_, event) = plan_slot(&slot, Ulid::new(), false, DAY).unwrap();
    apply_to_slot(&mut slot, &event.unwrap());
    for _ in 0..MAX_WAITLIST_PER_SLOT {
        let (_, event) = plan_slot(&slot, Ulid::new(), true, DAY).unwrap();
        apply_to_slot(&mut slot, &event.unwrap());
    }
    let result = plan_slot(&slot, Ulid::new(), true, DAY);
    assert!(matches!(result, Err(EngineError::LimitExceeded(_))));
    // Without the opt-in it is still just full.
    let (outcome, _) = plan_slot(&slot, Ulid::new(), false, DAY).unwrap();
    assert_eq!(outcome, SlotOutcome::Full);
}

#[test]
fn plan_cancellation_promotes_head() {
    let mut slot = empty_slot();
    let (outcome, event) = plan_slot(&slot, Ulid::new(), false, DAY).unwrap();
    apply_to_slot(&mut slot, &event.unwrap());
    let booking_id = outcome.booking_id().unwrap();
    let head = Ulid::new();
    let (_, event) = plan_slot(&slot, head, true, DAY).unwrap();
    apply_to_slot(&mut slot, &event.unwrap());

    let events = plan_cancellation(&slot, booking_id, "rain", DAY + H).unwrap();
    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], Event::BookingCancelled { id, reason, .. } if *id == booking_id && reason == "rain"));
    assert!(matches!(&events[1], Event::WaitlistPromoted { musician_id, .. } if *musician_id == head));

    for e in &events {
        apply_to_slot(&mut slot, e);
    }
    assert!(slot.waitlist.is_empty());
    let confirmed = slot.confirmed().unwrap();
    assert_eq!(confirmed.musician_id, head);
    assert!(confirmed.promoted);
    assert!(matches!(
        plan_cancellation(&slot, booking_id, "again", DAY),
        Err(EngineError::AlreadyCancelled(id)) if id == booking_id
    ));
    assert!(matches!(
        plan_cancellation(&slot, Ulid::new(), "x", DAY),
        Err(EngineError::NotFound(_))
    ));
}

#[test]
fn span_validation() {
    assert!(validate_span(DAY, DAY + H).is_ok());
    assert!(matches!(validate_span(DAY + H, DAY), Err(EngineError::Validation(_))));
    assert!(matches!(validate_span(DAY, DAY), Err(EngineError::Validation(_))));
    assert!(matches!(validate_span(0, H), Err(EngineError::LimitExceeded(_))));
}

// ── Booking scenarios ────────────────────────────────────

#[tokio::test]
async fn book_full_then_waitlist() {
    let engine = new_engine("book_full_then_waitlist.wal");
    let (_, _, slots) = seed(&engine, 1).await;
    let s = slots[0];
    let a = musician(&engine, "Alice").await;
    let b = musician(&engine, "Bob").await;

    assert!(matches!(book(&engine, a, s, false).await, SlotOutcome::Confirmed { .. }));
    assert_eq!(book(&engine, b, s, false).await, SlotOutcome::Full);
    assert_eq!(book(&engine, b, s, true).await, SlotOutcome::Waitlisted { position: 1 });

    let view = engine.slot_ledger(s).await.unwrap();
    assert_eq!(view.confirmed.unwrap().musician_id, a);
    assert_eq!(view.waitlist.len(), 1);
    assert_eq!(view.waitlist[0].musician_id, b);
}

#[tokio::test]
async fn cancel_promotes_waitlisted_musician() {
    let engine = new_engine("cancel_promotes.wal");
    let (_, _, slots) = seed(&engine, 1).await;
    let s = slots[0];
    let a = musician(&engine, "Alice").await;
    let b = musician(&engine, "Bob").await;

    let booking_a = book(&engine, a, s, false).await.booking_id().unwrap();
    book(&engine, b, s, true).await;

    let outcome = engine.cancel_booking(booking_a, None).await.unwrap();
    assert_eq!(outcome.cancelled_booking_id, booking_a);
    assert_eq!(outcome.time_slot_id, s);
    let promoted = outcome.promoted.unwrap();
    assert_eq!(promoted.musician.id, b);
    assert_eq!(promoted.musician.name, "Bob");
    assert_eq!(promoted.musician.email, "bob@bands.test");

    let view = engine.slot_ledger(s).await.unwrap();
    let confirmed = view.confirmed.unwrap();
    assert_eq!(confirmed.id, promoted.booking_id);
    assert_eq!(confirmed.musician_id, b);
    assert!(confirmed.promoted);
    assert!(view.waitlist.is_empty());

    let cancelled = engine
        .list_bookings(&BookingFilter { musician_id: Some(a), ..Default::default() })
        .await;
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].booking.status, BookingStatus::Cancelled);
    assert_eq!(cancelled[0].booking.cancellation_reason.as_deref(), Some(DEFAULT_CANCEL_REASON));
    assert!(cancelled[0].booking.cancelled_at.is_some());
}

#[tokio::test]
async fn promotion_renumbers_remaining_waitlist() {
    let engine = new_engine("renumber.wal");
    let (_, _, slots) = seed(&engine, 1).await;
    let s = slots[0];
    let head = musician(&engine, "Headliner").await;
    let c = musician(&engine, "Carol").await;
    let d = musician(&engine, "Dave").await;
    let e = musician(&engine, "Erin").await;

    let booking = book(&engine, head, s, false).await.booking_id().unwrap();
    assert_eq!(book(&engine, c, s, true).await, SlotOutcome::Waitlisted { position: 1 });
    assert_eq!(book(&engine, d, s, true).await, SlotOutcome::Waitlisted { position: 2 });
    assert_eq!(book(&engine, e, s, true).await, SlotOutcome::Waitlisted { position: 3 });

    let outcome = engine.cancel_booking(booking, Some("Double booked".into())).await.unwrap();
    assert_eq!(outcome.promoted.unwrap().musician.id, c);

    let view = engine.slot_ledger(s).await.unwrap();
    let queue: Vec<(Ulid, u32)> = view.waitlist.iter().map(|w| (w.musician_id, w.position)).collect();
    assert_eq!(queue, vec![(d, 1), (e, 2)]);

    // The next joiner lands after the renumbered tail.
    let f = musician(&engine, "Frank").await;
    assert_eq!(book(&engine, f, s, true).await, SlotOutcome::Waitlisted { position: 3 });
}

#[tokio::test]
async fn cancel_twice_is_rejected_without_promotion() {
    let engine = new_engine("cancel_twice.wal");
    let (_, _, slots) = seed(&engine, 1).await;
    let s = slots[0];
    let a = musician(&engine, "Alice").await;
    let b = musician(&engine, "Bob").await;
    let c = musician(&engine, "Carol").await;

    let booking = book(&engine, a, s, false).await.booking_id().unwrap();
    book(&engine, b, s, true).await;
    book(&engine, c, s, true).await;
    engine.cancel_booking(booking, None).await.unwrap();

    let err = engine.cancel_booking(booking, None).await.unwrap_err();
    assert!(matches!(err, EngineError::AlreadyCancelled(id) if id == booking));

    let view = engine.slot_ledger(s).await.unwrap();
    assert_eq!(view.confirmed.unwrap().musician_id, b);
    assert_eq!(view.waitlist.len(), 1);
    assert_eq!(view.waitlist[0].musician_id, c);
    assert_eq!(view.waitlist[0].position, 1);
}

#[tokio::test]
async fn cancel_unknown_booking() {
    let engine = new_engine("cancel_unknown.wal");
    let id = Ulid::new();
    assert!(matches!(
        engine.cancel_booking(id, None).await,
        Err(EngineError::NotFound(x)) if x == id
    ));
}

#[tokio::test]
async fn cancel_without_waitlist_leaves_slot_open() {
    let engine = new_engine("cancel_open.wal");
    let (_, _, slots) = seed(&engine, 1).await;
    let a = musician(&engine, "Alice").await;
    let b = musician(&engine, "Bob").await;
    let booking = book(&engine, a, slots[0], false).await.booking_id().unwrap();

    let outcome = engine.cancel_booking(booking, Some("  ".into())).await.unwrap();
    assert!(outcome.promoted.is_none());
    assert!(engine.slot_ledger(slots[0]).await.unwrap().confirmed.is_none());

    // A fresh booking after cancellation is admitted, including by the same musician.
    assert!(matches!(book(&engine, a, slots[0], false).await, SlotOutcome::Confirmed { .. }));
    assert_eq!(book(&engine, b, slots[0], false).await, SlotOutcome::Full);
}

#[tokio::test]
async fn waitlist_join_is_idempotent() {
    let engine = new_engine("waitlist_idempotent.wal");
    let (_, _, slots) = seed(&engine, 1).await;
    let a = musician(&engine, "Alice").await;
    let b = musician(&engine, "Bob").await;
    book(&engine, a, slots[0], false).await;

    assert_eq!(book(&engine, b, slots[0], true).await, SlotOutcome::Waitlisted { position: 1 });
    assert_eq!(book(&engine, b, slots[0], true).await, SlotOutcome::AlreadyWaitlisted);
    assert_eq!(engine.slot_ledger(slots[0]).await.unwrap().waitlist.len(), 1);
}

#[tokio::test]
async fn results_mirror_input_order() {
    let engine = new_engine("input_order.wal");
    let (_, _, slots) = seed(&engine, 5).await;
    let other = musician(&engine, "Other").await;
    let me = musician(&engine, "Me").await;

    // Slots 1 and 3 are taken; M = 3 of N = 5 stay open.
    book(&engine, other, slots[1], false).await;
    book(&engine, other, slots[3], false).await;

    let request = [slots[4], slots[3], slots[2], slots[1], slots[0]];
    let results = engine.create_bookings(me, &request, false).await.unwrap();
    let got: Vec<(Ulid, &str)> = results.iter().map(|r| (r.time_slot_id, r.outcome.status())).collect();
    assert_eq!(
        got,
        vec![
            (slots[4], "confirmed"),
            (slots[3], "full"),
            (slots[2], "confirmed"),
            (slots[1], "full"),
            (slots[0], "confirmed"),
        ]
    );
    let mine = engine
        .list_bookings(&BookingFilter { musician_id: Some(me), ..Default::default() })
        .await;
    assert_eq!(mine.len(), 3);
    // Ordered by slot order, not request order.
    let order: Vec<u32> = mine.iter().map(|b| b.slot_order).collect();
    assert_eq!(order, vec![1, 3, 5]);
}

#[tokio::test]
async fn repeated_slot_sees_earlier_occurrence() {
    let engine = new_engine("repeated_slot.wal");
    let (_, _, slots) = seed(&engine, 1).await;
    let holder = musician(&engine, "Holder").await;
    let a = musician(&engine, "Alice").await;

    let results = engine.create_bookings(a, &[slots[0], slots[0]], true).await.unwrap();
    assert!(matches!(results[0].outcome, SlotOutcome::Confirmed { .. }));
    assert_eq!(results[1].outcome, SlotOutcome::AlreadyBooked);

    let results = engine.create_bookings(holder, &[slots[0], slots[0]], true).await.unwrap();
    assert_eq!(results[0].outcome, SlotOutcome::Waitlisted { position: 1 });
    assert_eq!(results[1].outcome, SlotOutcome::AlreadyWaitlisted);
}

#[tokio::test]
async fn booking_request_validation() {
    let engine = new_engine("booking_validation.wal");
    let (_, _, slots) = seed(&engine, 1).await;
    let a = musician(&engine, "Alice").await;

    assert!(matches!(
        engine.create_bookings(a, &[], false).await,
        Err(EngineError::Validation(_))
    ));
    let ghost = Ulid::new();
    assert!(matches!(
        engine.create_bookings(ghost, &slots, false).await,
        Err(EngineError::NotFound(id)) if id == ghost
    ));
    let missing = Ulid::new();
    assert!(matches!(
        engine.create_bookings(a, &[slots[0], missing], false).await,
        Err(EngineError::NotFound(id)) if id == missing
    ));
    // Nothing from the failed request was applied.
    assert!(engine.slot_ledger(slots[0]).await.unwrap().confirmed.is_none());

    let too_many: Vec<Ulid> = (0..=MAX_SLOTS_PER_REQUEST).map(|_| Ulid::new()).collect();
    assert!(matches!(
        engine.create_bookings(a, &too_many, false).await,
        Err(EngineError::LimitExceeded(_))
    ));
}

// ── Transaction failure ──────────────────────────────────

#[tokio::test]
async fn wal_failure_aborts_whole_booking() {
    let mut engine = new_engine("booking_wal_failure.wal");
    let (_, _, slots) = seed(&engine, 3).await;
    let a = musician(&engine, "Alice").await;
    let b = musician(&engine, "Bob").await;
    book(&engine, a, slots[1], false).await;
    let before: Vec<SlotLedgerView> = {
        let mut v = Vec::new();
        for s in &slots {
            v.push(engine.slot_ledger(*s).await.unwrap());
        }
        v
    };

    engine.break_wal();
    let err = engine.create_bookings(b, &slots, true).await.unwrap_err();
    assert!(matches!(err, EngineError::BookingFailed(_)));

    for (s, expected) in slots.iter().zip(before) {
        assert_eq!(engine.slot_ledger(*s).await.unwrap(), expected);
    }
    assert!(engine
        .list_bookings(&BookingFilter { musician_id: Some(b), ..Default::default() })
        .await
        .is_empty());
}

#[tokio::test]
async fn wal_failure_aborts_cancellation() {
    let mut engine = new_engine("cancel_wal_failure.wal");
    let (_, _, slots) = seed(&engine, 1).await;
    let a = musician(&engine, "Alice").await;
    let b = musician(&engine, "Bob").await;
    let booking = book(&engine, a, slots[0], false).await.booking_id().unwrap();
    book(&engine, b, slots[0], true).await;

    engine.break_wal();
    let err = engine.cancel_booking(booking, None).await.unwrap_err();
    assert!(matches!(err, EngineError::CancelFailed(_)));

    let view = engine.slot_ledger(slots[0]).await.unwrap();
    let confirmed = view.confirmed.as_ref().unwrap();
    assert_eq!(confirmed.id, booking);
    assert_eq!(confirmed.status, BookingStatus::Confirmed);
    assert_eq!(positions(&view), vec![1]);
    assert_eq!(view.waitlist[0].musician_id, b);
}

// ── Concurrency ──────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bookings_confirm_exactly_one() {
    let engine = Arc::new(new_engine("concurrent_single.wal"));
    let (_, _, slots) = seed(&engine, 1).await;
    let s = slots[0];
    let mut musicians = Vec::new();
    for i in 0..24 {
        musicians.push(musician(&engine, &format!("Band {i}")).await);
    }

    let mut handles = Vec::new();
    for m in musicians {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move { engine.create_bookings(m, &[s], true).await }));
    }
    let mut confirmed = 0;
    let mut waitlisted = Vec::new();
    for h in handles {
        let results = h.await.unwrap().unwrap();
        match results[0].outcome {
            SlotOutcome::Confirmed { .. } => confirmed += 1,
            SlotOutcome::Waitlisted { position } => waitlisted.push(position),
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert_eq!(confirmed, 1);
    waitlisted.sort();
    assert_eq!(waitlisted, (1..=23).collect::<Vec<u32>>());

    let view = engine.slot_ledger(s).await.unwrap();
    assert_eq!(positions(&view), (1..=23).collect::<Vec<u32>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_multi_slot_requests_do_not_deadlock() {
    let engine = Arc::new(new_engine("concurrent_multi.wal"));
    let (_, _, slots) = seed(&engine, 4).await;
    let mut handles = Vec::new();
    for i in 0..16 {
        let m = musician(&engine, &format!("Act {i}")).await;
        let mut request = slots.clone();
        if i % 2 == 0 {
            request.reverse();
        } else {
            request.rotate_left(i % 4);
        }
        let engine = engine.clone();
        handles.push(tokio::spawn(async move { engine.create_bookings(m, &request, true).await }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
    for s in &slots {
        let view = engine.slot_ledger(*s).await.unwrap();
        assert!(view.confirmed.is_some());
        assert_eq!(positions(&view), (1..=15).collect::<Vec<u32>>());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cancel_and_join_keep_positions_contiguous() {
    let engine = Arc::new(new_engine("concurrent_cancel_join.wal"));
    let (_, _, slots) = seed(&engine, 1).await;
    let s = slots[0];
    let first = musician(&engine, "First").await;
    book(&engine, first, s, false).await;
    let mut queued = Vec::new();
    for i in 0..8 {
        let m = musician(&engine, &format!("Queued {i}")).await;
        book(&engine, m, s, true).await;
        queued.push(m);
    }

    let mut joiners = Vec::new();
    for i in 0..8 {
        joiners.push(musician(&engine, &format!("Late {i}")).await);
    }
    let mut handles = Vec::new();
    for m in joiners {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.create_bookings(m, &[s], true).await.map(|_| ())
        }));
    }
    for _ in 0..4 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let current = engine.slot_ledger(s).await?.confirmed.map(|b| b.id);
            if let Some(id) = current {
                match engine.cancel_booking(id, None).await {
                    Ok(_) | Err(EngineError::AlreadyCancelled(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            Ok::<(), EngineError>(())
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    let view = engine.slot_ledger(s).await.unwrap();
    assert!(view.confirmed.is_some());
    let n = view.waitlist.len() as u32;
    assert_eq!(positions(&view), (1..=n).collect::<Vec<u32>>());
    let confirmed_count = engine
        .list_bookings(&BookingFilter { status: Some(BookingStatus::Confirmed), ..Default::default() })
        .await
        .len();
    assert_eq!(confirmed_count, 1);
}

// ── Stipend ──────────────────────────────────────────────

#[tokio::test]
async fn stipend_payment_is_idempotent() {
    let engine = new_engine("stipend.wal");
    let (_, _, slots) = seed(&engine, 2).await;
    let a = musician(&engine, "Alice").await;
    let booking = book(&engine, a, slots[0], false).await.booking_id().unwrap();

    let paid = engine.mark_stipend_paid(booking).await.unwrap();
    let again = engine.mark_stipend_paid(booking).await.unwrap();
    assert_eq!(paid, again);
    let view = engine.slot_ledger(slots[0]).await.unwrap();
    assert_eq!(view.confirmed.unwrap().stipend_paid_at, Some(paid));

    let other = book(&engine, a, slots[1], false).await.booking_id().unwrap();
    engine.cancel_booking(other, None).await.unwrap();
    assert!(matches!(engine.mark_stipend_paid(other).await, Err(EngineError::Validation(_))));
    assert!(matches!(engine.mark_stipend_paid(Ulid::new()).await, Err(EngineError::NotFound(_))));
}

// ── Catalog ──────────────────────────────────────────────

#[tokio::test]
async fn duplicate_email_rejected_case_insensitively() {
    let engine = new_engine("duplicate_email.wal");
    musician(&engine, "Alice").await;
    let err = engine
        .register_musician(NewMusician {
            id: Ulid::new(),
            name: "Another Alice".into(),
            email: "ALICE@Bands.test".into(),
            phone: "555-0199".into(),
            genre: "jazz".into(),
            description: None,
            website: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DuplicateEmail(_)));
    assert_eq!(engine.list_musicians().len(), 1);
}

#[tokio::test]
async fn musician_required_fields() {
    let engine = new_engine("musician_required.wal");
    let base = NewMusician {
        id: Ulid::new(),
        name: "Solo".into(),
        email: "solo@bands.test".into(),
        phone: "555-0100".into(),
        genre: "blues".into(),
        description: Some("   ".into()),
        website: None,
    };
    for broken in [
        NewMusician { name: " ".into(), ..base.clone() },
        NewMusician { email: "not-an-email".into(), ..base.clone() },
        NewMusician { phone: String::new(), ..base.clone() },
        NewMusician { genre: String::new(), ..base.clone() },
    ] {
        assert!(matches!(engine.register_musician(broken).await, Err(EngineError::Validation(_))));
    }
    let m = engine.register_musician(base).await.unwrap();
    assert_eq!(m.description, None);
    assert_eq!(engine.get_musician(m.id).unwrap().name, "Solo");
}

#[tokio::test]
async fn musicians_listed_by_name() {
    let engine = new_engine("musicians_sorted.wal");
    musician(&engine, "zed").await;
    musician(&engine, "Amy").await;
    musician(&engine, "bert").await;
    let names: Vec<String> = engine.list_musicians().into_iter().map(|m| m.name).collect();
    assert_eq!(names, vec!["Amy", "bert", "zed"]);
}

#[tokio::test]
async fn time_slot_must_fit_its_day() {
    let engine = new_engine("slot_in_day.wal");
    let (_, date, _) = seed(&engine, 0).await;
    let outside = engine.create_time_slot(Ulid::new(), date, DAY + 23 * H, DAY + 25 * H, 1).await;
    assert!(matches!(outside, Err(EngineError::Validation(_))));
    let whole_day = engine.create_time_slot(Ulid::new(), date, DAY, DAY + 24 * H, 1).await;
    assert!(whole_day.is_ok());
    let missing = Ulid::new();
    assert!(matches!(
        engine.create_time_slot(Ulid::new(), missing, DAY, DAY + H, 1).await,
        Err(EngineError::NotFound(id)) if id == missing
    ));
}

#[tokio::test]
async fn time_slots_capped_per_date() {
    let engine = new_engine("slot_cap.wal");
    let (_, date, _) = seed(&engine, 0).await;
    let step = DAY_MS / MAX_SLOTS_PER_DATE as Ms;
    for i in 0..MAX_SLOTS_PER_DATE as Ms {
        engine
            .create_time_slot(Ulid::new(), date, DAY + i * step, DAY + (i + 1) * step, i as u32)
            .await
            .unwrap();
    }
    assert!(matches!(
        engine.create_time_slot(Ulid::new(), date, DAY, DAY + H, 99).await,
        Err(EngineError::LimitExceeded(_))
    ));
}

#[tokio::test]
async fn performance_date_must_be_midnight() {
    let engine = new_engine("date_midnight.wal");
    let market = Ulid::new();
    engine.create_market(market, "Harbor", None, 0, None).await.unwrap();
    assert!(matches!(
        engine.create_performance_date(Ulid::new(), market, DAY + H, None).await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine.create_performance_date(Ulid::new(), Ulid::new(), DAY, None).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn slot_with_bookings_cannot_be_deleted() {
    let engine = new_engine("slot_delete.wal");
    let (_, date, slots) = seed(&engine, 2).await;
    let a = musician(&engine, "Alice").await;
    let booking = book(&engine, a, slots[0], false).await.booking_id().unwrap();

    assert!(matches!(
        engine.delete_time_slot(slots[0]).await,
        Err(EngineError::HasBookings(id)) if id == slots[0]
    ));
    // Cancelled history still counts.
    engine.cancel_booking(booking, None).await.unwrap();
    assert!(matches!(engine.delete_time_slot(slots[0]).await, Err(EngineError::HasBookings(_))));

    engine.delete_time_slot(slots[1]).await.unwrap();
    let remaining: Vec<Ulid> = engine
        .list_time_slots(date)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(remaining, vec![slots[0]]);
    assert!(matches!(
        engine.create_bookings(a, &[slots[1]], false).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn market_settings_patch() {
    let engine = new_engine("market_patch.wal");
    let (market, _, _) = seed(&engine, 0).await;
    let updated = engine
        .update_market(
            market,
            MarketPatch { stipend_cents: Some(12_000), contact_email: Some("hi@market.test".into()), ..Default::default() },
        )
        .await
        .unwrap();
    assert_eq!(updated.name, "Riverside Farmers Market");
    assert_eq!(updated.location.as_deref(), Some("Pier 4"));
    assert_eq!(updated.stipend_cents, 12_000);
    assert_eq!(engine.get_market(market).unwrap(), updated);

    assert!(matches!(
        engine.update_market(market, MarketPatch::default()).await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine.update_market(market, MarketPatch { stipend_cents: Some(-1), ..Default::default() }).await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine.update_market(Ulid::new(), MarketPatch { name: Some("X".into()), ..Default::default() }).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn media_attach_and_remove() {
    let engine = new_engine("media.wal");
    let a = musician(&engine, "Alice").await;

    let sample = engine
        .attach_media(Ulid::new(), a, MediaKind::MusicSample, "Live Set.mp3", 4_000_000, "audio/mpeg")
        .await
        .unwrap();
    assert!(sample.stored_path.starts_with("music/music_"));
    assert!(sample.stored_path.ends_with(".mp3"));

    let err = engine
        .attach_media(Ulid::new(), a, MediaKind::Headshot, "me.svg", 1_000, "image/svg+xml")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidMedia(_)));
    assert!(matches!(
        engine.attach_media(Ulid::new(), Ulid::new(), MediaKind::Logo, "l.png", 10, "image/png").await,
        Err(EngineError::NotFound(_))
    ));

    let logo = engine
        .attach_media(Ulid::new(), a, MediaKind::Logo, "logo.png", 2_000, "image/png")
        .await
        .unwrap();
    assert_eq!(engine.list_media(a).unwrap().len(), 2);
    assert_eq!(engine.get_musician(a).unwrap().current_media(MediaKind::Logo), Some(&logo));

    engine.remove_media(logo.id).await.unwrap();
    assert_eq!(engine.list_media(a).unwrap(), vec![sample]);
    assert!(matches!(engine.remove_media(logo.id).await, Err(EngineError::NotFound(_))));
}

// ── Queries ──────────────────────────────────────────────

#[tokio::test]
async fn schedule_and_stats_skip_inactive_dates() {
    let engine = new_engine("schedule_stats.wal");
    let (market, date, slots) = seed(&engine, 3).await;
    let later = Ulid::new();
    engine.create_performance_date(later, market, DAY + DAY_MS, None).await.unwrap();
    let later_slot = Ulid::new();
    engine
        .create_time_slot(later_slot, later, DAY + DAY_MS + 9 * H, DAY + DAY_MS + 10 * H, 1)
        .await
        .unwrap();

    let a = musician(&engine, "Alice").await;
    let b = musician(&engine, "Bob").await;
    book(&engine, a, slots[0], false).await;
    book(&engine, b, slots[0], true).await;
    book(&engine, b, later_slot, false).await;

    let rows = engine.schedule(market).await.unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0].time_slot_id, slots[0]);
    assert_eq!(rows[0].musician_name.as_deref(), Some("Alice"));
    assert_eq!(rows[0].waitlist_count, 1);
    assert_eq!(rows[1].booking_id, None);
    assert_eq!(rows[3].time_slot_id, later_slot);

    let stats = engine.stats(Some(market)).await.unwrap();
    assert_eq!(
        stats,
        Stats { total_slots: 4, booked_slots: 2, available_slots: 2, total_musicians: 2, total_waitlist: 1 }
    );

    engine.deactivate_performance_date(date).await.unwrap();
    engine.deactivate_performance_date(date).await.unwrap();
    let rows = engine.schedule(market).await.unwrap();
    assert_eq!(rows.len(), 1);
    let stats = engine.stats(None).await.unwrap();
    assert_eq!(stats.total_slots, 1);
    assert_eq!(stats.booked_slots, 1);
    assert_eq!(stats.total_waitlist, 0);

    // Deactivation hides the date but keeps its bookings.
    let dates = engine.list_performance_dates(market).unwrap();
    assert_eq!(dates.len(), 2);
    assert!(!dates[0].is_active);
    assert_eq!(engine.list_bookings(&BookingFilter::default()).await.len(), 2);
    assert!(matches!(engine.stats(Some(Ulid::new())).await, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn list_bookings_by_month_with_market_details() {
    let engine = new_engine("list_by_month.wal");
    let (market, _, slots) = seed(&engine, 1).await;
    // 2026-06-01T00:00:00Z
    let june = DAY + 151 * 86_400_000;
    let june_date = Ulid::new();
    engine.create_performance_date(june_date, market, june, None).await.unwrap();
    let june_slot = Ulid::new();
    engine.create_time_slot(june_slot, june_date, june + 12 * H, june + 13 * H, 1).await.unwrap();

    let a = musician(&engine, "Alice").await;
    let b = musician(&engine, "Bob").await;
    let c = musician(&engine, "Carol").await;
    book(&engine, a, slots[0], false).await;
    book(&engine, b, slots[0], true).await;
    book(&engine, c, slots[0], true).await;
    book(&engine, b, june_slot, false).await;

    let january = engine
        .list_bookings(&BookingFilter { month: Some(1), ..Default::default() })
        .await;
    assert_eq!(january.len(), 1);
    assert_eq!(january[0].booking.musician_id, a);
    assert_eq!(january[0].market_name, "Riverside Farmers Market");
    assert_eq!(january[0].stipend_cents, 7_500);
    assert_eq!(january[0].waitlist_count, 2);

    let in_june = engine
        .list_bookings(&BookingFilter { market_id: Some(market), month: Some(6), ..Default::default() })
        .await;
    assert_eq!(in_june.len(), 1);
    assert_eq!(in_june[0].booking.musician_id, b);
    assert_eq!(in_june[0].waitlist_count, 0);

    assert!(engine
        .list_bookings(&BookingFilter { month: Some(3), ..Default::default() })
        .await
        .is_empty());
}

#[tokio::test]
async fn list_bookings_filters() {
    let engine = new_engine("list_filters.wal");
    let (market, _, slots) = seed(&engine, 2).await;
    let (other_market, _, other_slots) = seed(&engine, 1).await;
    let a = musician(&engine, "Alice").await;
    let b = musician(&engine, "Bob").await;
    let first = book(&engine, a, slots[0], false).await.booking_id().unwrap();
    book(&engine, b, slots[1], false).await;
    book(&engine, a, other_slots[0], false).await;
    engine.cancel_booking(first, None).await.unwrap();

    let all = engine.list_bookings(&BookingFilter::default()).await;
    assert_eq!(all.len(), 3);
    let in_market = engine
        .list_bookings(&BookingFilter { market_id: Some(market), ..Default::default() })
        .await;
    assert_eq!(in_market.len(), 2);
    assert!(in_market.iter().all(|b| b.market_id == market));
    let confirmed_a = engine
        .list_bookings(&BookingFilter {
            musician_id: Some(a),
            status: Some(BookingStatus::Confirmed),
            ..Default::default()
        })
        .await;
    assert_eq!(confirmed_a.len(), 1);
    assert_eq!(confirmed_a[0].market_id, other_market);
    assert_eq!(confirmed_a[0].musician_email, "alice@bands.test");
}

#[tokio::test]
async fn waitlist_listing_joins_musicians() {
    let engine = new_engine("list_waitlist.wal");
    let (_, _, slots) = seed(&engine, 1).await;
    let a = musician(&engine, "Alice").await;
    let b = musician(&engine, "Bob").await;
    let c = musician(&engine, "Carol").await;
    book(&engine, a, slots[0], false).await;
    book(&engine, b, slots[0], true).await;
    book(&engine, c, slots[0], true).await;

    let list = engine.list_waitlist(slots[0]).await.unwrap();
    let names: Vec<(&str, u32)> = list.iter().map(|w| (w.musician_name.as_str(), w.entry.position)).collect();
    assert_eq!(names, vec![("Bob", 1), ("Carol", 2)]);
    assert!(matches!(engine.list_waitlist(Ulid::new()).await, Err(EngineError::NotFound(_))));
}

// ── Notifications ────────────────────────────────────────

#[tokio::test]
async fn committed_events_are_published() {
    let engine = new_engine("publish.wal");
    let (_, _, slots) = seed(&engine, 1).await;
    let a = musician(&engine, "Alice").await;
    let b = musician(&engine, "Bob").await;
    let mut rx = engine.notify.subscribe();

    let booking = book(&engine, a, slots[0], false).await.booking_id().unwrap();
    book(&engine, b, slots[0], true).await;
    assert_eq!(book(&engine, b, slots[0], true).await, SlotOutcome::AlreadyWaitlisted);
    engine.cancel_booking(booking, None).await.unwrap();

    assert!(matches!(rx.recv().await.unwrap(), Event::BookingConfirmed { musician_id, .. } if musician_id == a));
    assert!(matches!(rx.recv().await.unwrap(), Event::WaitlistJoined { musician_id, position: 1, .. } if musician_id == b));
    // The idempotent repeat committed nothing, so the next event is the cancellation.
    assert!(matches!(rx.recv().await.unwrap(), Event::BookingCancelled { id, .. } if id == booking));
    assert!(matches!(rx.recv().await.unwrap(), Event::WaitlistPromoted { musician_id, .. } if musician_id == b));
}

// ── Durability ───────────────────────────────────────────

async fn snapshot(engine: &Engine, slots: &[Ulid]) -> (Vec<SlotLedgerView>, Vec<BookingInfo>, Vec<Musician>, Vec<Market>) {
    let mut views = Vec::new();
    for s in slots {
        views.push(engine.slot_ledger(*s).await.unwrap());
    }
    (
        views,
        engine.list_bookings(&BookingFilter::default()).await,
        engine.list_musicians(),
        engine.list_markets(),
    )
}

async fn busy_history(engine: &Engine) -> Vec<Ulid> {
    let (market, date, slots) = seed(engine, 3).await;
    let a = musician(engine, "Alice").await;
    let b = musician(engine, "Bob").await;
    let c = musician(engine, "Carol").await;
    let d = musician(engine, "Dave").await;
    engine
        .attach_media(Ulid::new(), a, MediaKind::Headshot, "alice.jpg", 50_000, "image/jpeg")
        .await
        .unwrap();
    let first = book(engine, a, slots[0], false).await.booking_id().unwrap();
    engine.create_bookings(b, &slots, true).await.unwrap();
    engine.create_bookings(c, &[slots[0], slots[2]], true).await.unwrap();
    book(engine, d, slots[0], true).await;
    engine.cancel_booking(first, Some("Sick".into())).await.unwrap();
    let promoted = engine.slot_ledger(slots[0]).await.unwrap().confirmed.unwrap().id;
    engine.mark_stipend_paid(promoted).await.unwrap();
    engine
        .update_market(market, MarketPatch { name: Some("Riverside Night Market".into()), ..Default::default() })
        .await
        .unwrap();
    let spare = Ulid::new();
    engine.create_time_slot(spare, date, DAY + 20 * H, DAY + 21 * H, 9).await.unwrap();
    engine.delete_time_slot(spare).await.unwrap();
    slots
}

#[tokio::test]
async fn replay_restores_ledgers() {
    let path = test_wal_path("replay_restores.wal");
    let (slots, before) = {
        let engine = reopen(&path);
        let slots = busy_history(&engine).await;
        let before = snapshot(&engine, &slots).await;
        (slots, before)
    };

    let engine = reopen(&path);
    let after = snapshot(&engine, &slots).await;
    assert_eq!(before, after);

    let view = &after.0[0];
    assert!(view.confirmed.as_ref().unwrap().promoted);
    assert!(view.confirmed.as_ref().unwrap().stipend_paid());
    assert_eq!(positions(view), vec![1, 2]);
    assert_eq!(after.3[0].name, "Riverside Night Market");
    assert_eq!(engine.slots.len(), 3);

    // The replayed engine keeps accepting work and indexes are intact.
    let e = musician(&engine, "Erin").await;
    assert_eq!(book(&engine, e, slots[0], true).await, SlotOutcome::Waitlisted { position: 3 });
    let cancelled = after.1.iter().find(|b| b.booking.status == BookingStatus::Cancelled).unwrap();
    assert!(matches!(
        engine.cancel_booking(cancelled.booking.id, None).await,
        Err(EngineError::AlreadyCancelled(_))
    ));
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compaction_preserves.wal");
    let (slots, before) = {
        let engine = reopen(&path);
        let slots = busy_history(&engine).await;
        assert!(engine.wal_appends_since_compact().await > 0);
        let size_before = std::fs::metadata(&path).unwrap().len();
        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        assert!(std::fs::metadata(&path).unwrap().len() < size_before);
        let before = snapshot(&engine, &slots).await;
        (slots, before)
    };

    let engine = reopen(&path);
    assert_eq!(snapshot(&engine, &slots).await, before);
    let alice = engine.list_musicians().into_iter().find(|m| m.name == "Alice").unwrap();
    assert_eq!(alice.media.len(), 1);
    assert!(engine.get_slot(&slots[0]).is_some());
}
