mod booking;
mod error;
mod ledger;
mod mutations;
mod queries;
#[cfg(test)]
mod tests;

pub use error::EngineError;
pub use ledger::DEFAULT_CANCEL_REASON;
pub(crate) use ledger::now_ms;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedSlotState = Arc<RwLock<SlotState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        txn: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Vec<Event>, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches transactions for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain every Append already queued (the batch window).
/// 3. One flush_sync for the whole batch, then answer every sender.
/// A non-append command ends the window: the batch is committed first.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { txn, response } => {
                let mut batch = vec![(txn, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { txn, response }) => batch.push((txn, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for {} transactions: {e}", batch.len());
    }
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (txn, _) in batch {
        if let Err(e) = wal.append_buffered(txn) {
            append_err = Some(e);
            break;
        }
    }
    let result = match append_err {
        Some(e) => Err(e),
        None => wal.flush_sync(),
    };
    // Every caller of a failed batch is told it failed, so none of its
    // bytes may survive into a later flush.
    if result.is_err()
        && let Err(e) = wal.rollback()
    {
        tracing::error!("WAL rollback failed: {e}");
    }
    result
}

fn respond_batch(batch: &mut Vec<PendingAppend>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { txn, response } => {
            let mut batch = vec![(txn, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

pub struct Engine {
    pub(super) markets: DashMap<Ulid, Market>,
    pub(super) dates: DashMap<Ulid, PerformanceDate>,
    /// One lock per time slot: the row lock for its ledger.
    pub(super) slots: DashMap<Ulid, SharedSlotState>,
    pub(super) musicians: DashMap<Ulid, Musician>,
    /// Lowercased email → musician id.
    pub(super) emails: DashMap<String, Ulid>,
    pub(super) dates_by_market: DashMap<Ulid, Vec<Ulid>>,
    pub(super) slots_by_date: DashMap<Ulid, Vec<Ulid>>,
    pub(super) booking_to_slot: DashMap<Ulid, Ulid>,
    pub(super) media_to_musician: DashMap<Ulid, Ulid>,
    /// Serializes catalog mutations (uniqueness and parent checks are check-then-write).
    pub(super) catalog_lock: Mutex<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
}

/// Apply a ledger event to one slot. Caller holds the slot's write lock
/// (or owns a staged copy).
pub(super) fn apply_to_slot(slot: &mut SlotState, event: &Event) {
    match event {
        Event::BookingConfirmed { id, time_slot_id, musician_id, booked_at, promoted } => {
            slot.bookings.push(Booking {
                id: *id,
                time_slot_id: *time_slot_id,
                musician_id: *musician_id,
                status: BookingStatus::Confirmed,
                booked_at: *booked_at,
                cancelled_at: None,
                cancellation_reason: None,
                promoted: *promoted,
                stipend_paid_at: None,
            });
        }
        Event::WaitlistJoined { id, time_slot_id, musician_id, position, joined_at } => {
            slot.insert_waitlist(WaitlistEntry {
                id: *id,
                time_slot_id: *time_slot_id,
                musician_id: *musician_id,
                position: *position,
                joined_at: *joined_at,
            });
        }
        Event::BookingCancelled { id, cancelled_at, reason, .. } => {
            if let Some(b) = slot.booking_mut(*id) {
                b.status = BookingStatus::Cancelled;
                b.cancelled_at = Some(*cancelled_at);
                b.cancellation_reason = Some(reason.clone());
            }
        }
        Event::WaitlistPromoted { entry_id, booking_id, time_slot_id, musician_id, promoted_at } => {
            slot.remove_waitlist_entry(*entry_id);
            slot.bookings.push(Booking {
                id: *booking_id,
                time_slot_id: *time_slot_id,
                musician_id: *musician_id,
                status: BookingStatus::Confirmed,
                booked_at: *promoted_at,
                cancelled_at: None,
                cancellation_reason: None,
                promoted: true,
                stipend_paid_at: None,
            });
        }
        Event::StipendPaid { booking_id, paid_at, .. } => {
            if let Some(b) = slot.booking_mut(*booking_id)
                && b.stipend_paid_at.is_none()
            {
                b.stipend_paid_at = Some(*paid_at);
            }
        }
        Event::TimeSlotDeleted { .. } => slot.deleted = true,
        // Catalog events and slot creation are handled by `apply_shared`.
        Event::TimeSlotCreated { .. }
        | Event::MarketCreated { .. }
        | Event::MarketUpdated { .. }
        | Event::PerformanceDateCreated { .. }
        | Event::PerformanceDateDeactivated { .. }
        | Event::MusicianRegistered { .. }
        | Event::MediaAttached { .. }
        | Event::MediaRemoved { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let records = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            markets: DashMap::new(),
            dates: DashMap::new(),
            slots: DashMap::new(),
            musicians: DashMap::new(),
            emails: DashMap::new(),
            dates_by_market: DashMap::new(),
            slots_by_date: DashMap::new(),
            booking_to_slot: DashMap::new(),
            media_to_musician: DashMap::new(),
            catalog_lock: Mutex::new(()),
            wal_tx,
            notify,
        };

        // Sole owner of every Arc during replay, so try_write never contends.
        // Never block here: this runs inside the runtime.
        let mut replayed = 0usize;
        for txn in &records {
            for event in txn {
                engine.replay_event(event);
                replayed += 1;
            }
        }
        if replayed > 0 {
            tracing::info!(
                "replayed {replayed} events in {} transactions from {}",
                records.len(),
                wal_path.display()
            );
        }

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        if let Some(slot_id) = event.time_slot_id()
            && let Some(slot) = self.get_slot(&slot_id)
        {
            match slot.try_write() {
                Ok(mut guard) => apply_to_slot(&mut guard, event),
                Err(_) => tracing::warn!("replay: slot {slot_id} unexpectedly locked"),
            }
        }
        self.apply_shared(event);
    }

    /// Apply the catalog and index side of an event. Ledger changes go
    /// through `apply_to_slot` under the slot's lock.
    pub(super) fn apply_shared(&self, event: &Event) {
        match event {
            Event::MarketCreated { id, name, location, stipend_cents, contact_email }
            | Event::MarketUpdated { id, name, location, stipend_cents, contact_email } => {
                self.markets.insert(
                    *id,
                    Market {
                        id: *id,
                        name: name.clone(),
                        location: location.clone(),
                        stipend_cents: *stipend_cents,
                        contact_email: contact_email.clone(),
                    },
                );
            }
            Event::PerformanceDateCreated { id, market_id, date, notes } => {
                self.dates.insert(
                    *id,
                    PerformanceDate {
                        id: *id,
                        market_id: *market_id,
                        date: *date,
                        notes: notes.clone(),
                        is_active: true,
                    },
                );
                self.dates_by_market.entry(*market_id).or_default().push(*id);
            }
            Event::PerformanceDateDeactivated { id } => {
                if let Some(mut d) = self.dates.get_mut(id) {
                    d.is_active = false;
                }
            }
            Event::TimeSlotCreated { id, performance_date_id, span, slot_order } => {
                let slot = SlotState::new(*id, *performance_date_id, *span, *slot_order);
                self.slots.insert(*id, Arc::new(RwLock::new(slot)));
                self.slots_by_date.entry(*performance_date_id).or_default().push(*id);
            }
            Event::TimeSlotDeleted { id, performance_date_id } => {
                self.slots.remove(id);
                if let Some(mut ids) = self.slots_by_date.get_mut(performance_date_id) {
                    ids.retain(|s| s != id);
                }
            }
            Event::MusicianRegistered {
                id,
                name,
                email,
                phone,
                genre,
                description,
                website,
                registered_at,
            } => {
                self.emails.insert(email.to_lowercase(), *id);
                self.musicians.insert(
                    *id,
                    Musician {
                        id: *id,
                        name: name.clone(),
                        email: email.clone(),
                        phone: phone.clone(),
                        genre: genre.clone(),
                        description: description.clone(),
                        website: website.clone(),
                        registered_at: *registered_at,
                        media: Vec::new(),
                    },
                );
            }
            Event::MediaAttached {
                id,
                musician_id,
                kind,
                original_filename,
                stored_path,
                size_bytes,
                mime_type,
                uploaded_at,
            } => {
                if let Some(mut m) = self.musicians.get_mut(musician_id) {
                    m.media.push(MediaFile {
                        id: *id,
                        musician_id: *musician_id,
                        kind: *kind,
                        original_filename: original_filename.clone(),
                        stored_path: stored_path.clone(),
                        size_bytes: *size_bytes,
                        mime_type: mime_type.clone(),
                        uploaded_at: *uploaded_at,
                    });
                    self.media_to_musician.insert(*id, *musician_id);
                }
            }
            Event::MediaRemoved { id, musician_id } => {
                if let Some(mut m) = self.musicians.get_mut(musician_id) {
                    m.media.retain(|f| f.id != *id);
                }
                self.media_to_musician.remove(id);
            }
            Event::BookingConfirmed { id, time_slot_id, .. } => {
                self.booking_to_slot.insert(*id, *time_slot_id);
            }
            Event::WaitlistPromoted { booking_id, time_slot_id, .. } => {
                self.booking_to_slot.insert(*booking_id, *time_slot_id);
            }
            Event::WaitlistJoined { .. }
            | Event::BookingCancelled { .. }
            | Event::StipendPaid { .. } => {}
        }
    }

    /// Commit one transaction through the group-commit writer. Returns once
    /// the record is fsynced.
    pub(super) async fn wal_append(&self, txn: Vec<Event>) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { txn, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append, apply shared state, publish. For catalog transactions,
    /// which never touch a slot ledger except through a held guard.
    pub(super) async fn persist_and_apply(&self, txn: Vec<Event>) -> Result<(), EngineError> {
        self.wal_append(txn.clone()).await?;
        for event in &txn {
            self.apply_shared(event);
            self.notify.publish(event);
        }
        Ok(())
    }

    pub fn get_slot(&self, id: &Ulid) -> Option<SharedSlotState> {
        self.slots.get(id).map(|e| e.value().clone())
    }

    pub fn slot_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_slot.get(booking_id).map(|e| *e.value())
    }

    /// Swap in a writer whose receiver is gone, so every commit fails.
    #[cfg(test)]
    pub(super) fn break_wal(&mut self) {
        let (tx, _) = mpsc::channel(1);
        self.wal_tx = tx;
    }
}
