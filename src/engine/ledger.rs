use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

pub const DEFAULT_CANCEL_REASON: &str = "Admin cancelled";

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

pub(crate) fn validate_timestamp(ts: Ms) -> Result<(), EngineError> {
    if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&ts) {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

pub(crate) fn validate_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    validate_timestamp(start)?;
    validate_timestamp(end)?;
    if start >= end {
        return Err(EngineError::Validation("time slot must end after it starts".into()));
    }
    Ok(Span::new(start, end))
}

/// Decide what one booking request does to one slot.
///
/// Pure: reads the slot as it stands (staged effects of earlier slots in
/// the same request included) and returns the outcome plus the event to
/// apply, if any.
pub(crate) fn plan_slot(
    slot: &SlotState,
    musician_id: Ulid,
    join_waitlist: bool,
    now: Ms,
) -> Result<(SlotOutcome, Option<Event>), EngineError> {
    if slot.active_booking_for(musician_id).is_some() {
        return Ok((SlotOutcome::AlreadyBooked, None));
    }
    if slot.confirmed().is_none() {
        let booking_id = Ulid::new();
        let event = Event::BookingConfirmed {
            id: booking_id,
            time_slot_id: slot.id,
            musician_id,
            booked_at: now,
            promoted: false,
        };
        return Ok((SlotOutcome::Confirmed { booking_id }, Some(event)));
    }
    if !join_waitlist {
        return Ok((SlotOutcome::Full, None));
    }
    if slot.waitlist_entry_for(musician_id).is_some() {
        return Ok((SlotOutcome::AlreadyWaitlisted, None));
    }
    if slot.waitlist.len() >= MAX_WAITLIST_PER_SLOT {
        return Err(EngineError::LimitExceeded("waitlist is full"));
    }
    let position = slot.next_position();
    let event = Event::WaitlistJoined {
        id: Ulid::new(),
        time_slot_id: slot.id,
        musician_id,
        position,
        joined_at: now,
    };
    Ok((SlotOutcome::Waitlisted { position }, Some(event)))
}

/// Events that cancel `booking_id` and promote the waitlist head, if any.
pub(crate) fn plan_cancellation(
    slot: &SlotState,
    booking_id: Ulid,
    reason: &str,
    now: Ms,
) -> Result<Vec<Event>, EngineError> {
    let booking = slot.booking(booking_id).ok_or(EngineError::NotFound(booking_id))?;
    if !booking.is_confirmed() {
        return Err(EngineError::AlreadyCancelled(booking_id));
    }
    let mut events = vec![Event::BookingCancelled {
        id: booking_id,
        time_slot_id: slot.id,
        musician_id: booking.musician_id,
        cancelled_at: now,
        reason: reason.to_string(),
    }];
    if let Some(head) = slot.waitlist_head() {
        events.push(Event::WaitlistPromoted {
            entry_id: head.id,
            booking_id: Ulid::new(),
            time_slot_id: slot.id,
            musician_id: head.musician_id,
            promoted_at: now,
        });
    }
    Ok(events)
}

impl Engine {
    /// Current occupant and ordered waitlist of one slot.
    pub async fn slot_ledger(&self, slot_id: Ulid) -> Result<SlotLedgerView, EngineError> {
        let slot = self.get_slot(&slot_id).ok_or(EngineError::NotFound(slot_id))?;
        let guard = slot.read().await;
        if guard.deleted {
            return Err(EngineError::NotFound(slot_id));
        }
        Ok(SlotLedgerView {
            time_slot_id: slot_id,
            confirmed: guard.confirmed().cloned(),
            waitlist: guard.waitlist.clone(),
        })
    }
}
