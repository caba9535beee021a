use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{BOOKING_OUTCOMES_TOTAL, CANCELLATIONS_TOTAL, PROMOTIONS_TOTAL};

use super::ledger::{now_ms, plan_cancellation, plan_slot, DEFAULT_CANCEL_REASON};
use super::{apply_to_slot, Engine, EngineError};

impl Engine {
    /// Book `musician_id` into each slot, confirming or queueing per slot.
    ///
    /// The whole request is one transaction: write locks on every distinct
    /// slot are taken in sorted order, outcomes are planned against staged
    /// copies in input order, and all changes commit as a single WAL record.
    /// If the commit fails nothing is applied and no results are returned.
    pub async fn create_bookings(
        &self,
        musician_id: Ulid,
        slot_ids: &[Ulid],
        join_waitlist: bool,
    ) -> Result<Vec<SlotResult>, EngineError> {
        if slot_ids.is_empty() {
            return Err(EngineError::Validation("at least one time slot is required".into()));
        }
        let mut distinct: Vec<Ulid> = slot_ids.to_vec();
        distinct.sort();
        distinct.dedup();
        if distinct.len() > MAX_SLOTS_PER_REQUEST {
            return Err(EngineError::LimitExceeded("too many time slots in one request"));
        }
        if !self.musicians.contains_key(&musician_id) {
            return Err(EngineError::NotFound(musician_id));
        }
        let mut handles = Vec::with_capacity(distinct.len());
        for id in &distinct {
            handles.push(self.get_slot(id).ok_or(EngineError::NotFound(*id))?);
        }

        // Sorted acquisition: two requests sharing slots can never wait on each other in a cycle.
        let mut guards = Vec::with_capacity(handles.len());
        for handle in handles {
            let guard = handle.write_owned().await;
            if guard.deleted {
                return Err(EngineError::NotFound(guard.id));
            }
            guards.push(guard);
        }

        let mut staged: Vec<SlotState> = guards.iter().map(|g| (**g).clone()).collect();
        let now = now_ms();
        let mut events = Vec::new();
        let mut results = Vec::with_capacity(slot_ids.len());
        for &slot_id in slot_ids {
            let idx = distinct
                .binary_search(&slot_id)
                .map_err(|_| EngineError::NotFound(slot_id))?;
            let (outcome, event) = plan_slot(&staged[idx], musician_id, join_waitlist, now)?;
            if let Some(event) = event {
                apply_to_slot(&mut staged[idx], &event);
                events.push(event);
            }
            results.push(SlotResult { time_slot_id: slot_id, outcome });
        }

        if !events.is_empty() {
            self.wal_append(events.clone())
                .await
                .map_err(|e| EngineError::BookingFailed(e.to_string()))?;
            for (guard, state) in guards.iter_mut().zip(staged) {
                **guard = state;
            }
            for event in &events {
                self.apply_shared(event);
                self.notify.publish(event);
            }
        }
        drop(guards);

        for r in &results {
            metrics::counter!(BOOKING_OUTCOMES_TOTAL, "outcome" => r.outcome.status()).increment(1);
        }
        tracing::debug!(
            %musician_id,
            slots = slot_ids.len(),
            committed = events.len(),
            "booking request processed"
        );
        Ok(results)
    }

    /// Cancel a confirmed booking and promote the head of the slot's waitlist.
    pub async fn cancel_booking(
        &self,
        booking_id: Ulid,
        reason: Option<String>,
    ) -> Result<CancelOutcome, EngineError> {
        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string());
        if reason.len() > MAX_REASON_LEN {
            return Err(EngineError::LimitExceeded("cancellation reason too long"));
        }
        let slot_id = self
            .slot_for_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let slot = self.get_slot(&slot_id).ok_or(EngineError::NotFound(booking_id))?;
        let mut guard = slot.write().await;
        if guard.deleted {
            return Err(EngineError::NotFound(booking_id));
        }

        let events = plan_cancellation(&guard, booking_id, &reason, now_ms())?;
        let promoted = match events.get(1) {
            Some(Event::WaitlistPromoted { booking_id, musician_id, .. }) => {
                let musician = self
                    .musicians
                    .get(musician_id)
                    .map(|m| m.contact())
                    .ok_or(EngineError::NotFound(*musician_id))?;
                Some(Promotion { booking_id: *booking_id, musician })
            }
            _ => None,
        };

        let mut staged = (*guard).clone();
        for event in &events {
            apply_to_slot(&mut staged, event);
        }
        self.wal_append(events.clone())
            .await
            .map_err(|e| EngineError::CancelFailed(e.to_string()))?;
        *guard = staged;
        for event in &events {
            self.apply_shared(event);
            self.notify.publish(event);
        }
        drop(guard);

        metrics::counter!(CANCELLATIONS_TOTAL).increment(1);
        if let Some(p) = &promoted {
            metrics::counter!(PROMOTIONS_TOTAL).increment(1);
            tracing::info!(%booking_id, %slot_id, promoted = %p.musician.id, "booking cancelled, waitlist head promoted");
        } else {
            tracing::info!(%booking_id, %slot_id, "booking cancelled");
        }

        Ok(CancelOutcome {
            cancelled_booking_id: booking_id,
            time_slot_id: slot_id,
            promoted,
        })
    }

    /// Record the stipend for a booking as paid. Returns the payment time;
    /// a booking already paid keeps its original time.
    pub async fn mark_stipend_paid(&self, booking_id: Ulid) -> Result<Ms, EngineError> {
        let slot_id = self
            .slot_for_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let slot = self.get_slot(&slot_id).ok_or(EngineError::NotFound(booking_id))?;
        let mut guard = slot.write().await;
        let booking = guard.booking(booking_id).ok_or(EngineError::NotFound(booking_id))?;
        if let Some(paid_at) = booking.stipend_paid_at {
            return Ok(paid_at);
        }
        if !booking.is_confirmed() {
            return Err(EngineError::Validation(format!(
                "booking {booking_id} is cancelled; no stipend is owed"
            )));
        }

        let paid_at = now_ms();
        let event = Event::StipendPaid { booking_id, time_slot_id: slot_id, paid_at };
        self.wal_append(vec![event.clone()]).await?;
        apply_to_slot(&mut guard, &event);
        self.notify.publish(&event);
        Ok(paid_at)
    }
}
