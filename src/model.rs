use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::media::MediaKind;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

// ── Catalog records ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Market {
    pub id: Ulid,
    pub name: String,
    pub location: Option<String>,
    /// Stipend paid per performance, in cents.
    pub stipend_cents: i64,
    pub contact_email: Option<String>,
}

/// Partial market settings update. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarketPatch {
    pub name: Option<String>,
    pub location: Option<String>,
    pub stipend_cents: Option<i64>,
    pub contact_email: Option<String>,
}

impl MarketPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.location.is_none()
            && self.stipend_cents.is_none()
            && self.contact_email.is_none()
    }

    pub fn applied_to(&self, market: &Market) -> Market {
        Market {
            id: market.id,
            name: self.name.clone().unwrap_or_else(|| market.name.clone()),
            location: self.location.clone().or_else(|| market.location.clone()),
            stipend_cents: self.stipend_cents.unwrap_or(market.stipend_cents),
            contact_email: self.contact_email.clone().or_else(|| market.contact_email.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerformanceDate {
    pub id: Ulid,
    pub market_id: Ulid,
    /// Start of the performance day.
    pub date: Ms,
    pub notes: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub id: Ulid,
    pub musician_id: Ulid,
    pub kind: MediaKind,
    pub original_filename: String,
    pub stored_path: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub uploaded_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Musician {
    pub id: Ulid,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub genre: String,
    pub description: Option<String>,
    pub website: Option<String>,
    pub registered_at: Ms,
    /// Upload order; the latest file of a kind is the current one.
    pub media: Vec<MediaFile>,
}

impl Musician {
    pub fn contact(&self) -> MusicianContact {
        MusicianContact {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
        }
    }

    pub fn current_media(&self, kind: MediaKind) -> Option<&MediaFile> {
        self.media.iter().rev().find(|m| m.kind == kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMusician {
    pub id: Ulid,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub genre: String,
    pub description: Option<String>,
    pub website: Option<String>,
}

// ── Slot ledger ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "confirmed" => Some(BookingStatus::Confirmed),
            "cancelled" | "canceled" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub id: Ulid,
    pub time_slot_id: Ulid,
    pub musician_id: Ulid,
    pub status: BookingStatus,
    pub booked_at: Ms,
    pub cancelled_at: Option<Ms>,
    pub cancellation_reason: Option<String>,
    /// Created by promoting the head of the waitlist.
    pub promoted: bool,
    pub stipend_paid_at: Option<Ms>,
}

impl Booking {
    pub fn is_confirmed(&self) -> bool {
        self.status == BookingStatus::Confirmed
    }

    pub fn stipend_paid(&self) -> bool {
        self.stipend_paid_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitlistEntry {
    pub id: Ulid,
    pub time_slot_id: Ulid,
    pub musician_id: Ulid,
    /// 1-based FIFO position, contiguous within the slot.
    pub position: u32,
    pub joined_at: Ms,
}

/// Everything the ledger knows about one time slot. Guarded by the slot's lock.
#[derive(Debug, Clone)]
pub struct SlotState {
    pub id: Ulid,
    pub performance_date_id: Ulid,
    pub span: Span,
    pub slot_order: u32,
    /// Full booking history, cancelled ones included, in creation order.
    pub bookings: Vec<Booking>,
    /// Sorted by `position`.
    pub waitlist: Vec<WaitlistEntry>,
    /// Set when the slot is deleted while a caller still holds its Arc.
    pub deleted: bool,
}

impl SlotState {
    pub fn new(id: Ulid, performance_date_id: Ulid, span: Span, slot_order: u32) -> Self {
        Self {
            id,
            performance_date_id,
            span,
            slot_order,
            bookings: Vec::new(),
            waitlist: Vec::new(),
            deleted: false,
        }
    }

    /// The single confirmed booking, if the slot is taken.
    pub fn confirmed(&self) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.is_confirmed())
    }

    pub fn active_booking_for(&self, musician_id: Ulid) -> Option<&Booking> {
        self.bookings
            .iter()
            .find(|b| b.musician_id == musician_id && b.is_confirmed())
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    pub fn waitlist_entry_for(&self, musician_id: Ulid) -> Option<&WaitlistEntry> {
        self.waitlist.iter().find(|e| e.musician_id == musician_id)
    }

    /// FIFO head: the entry with the smallest position.
    pub fn waitlist_head(&self) -> Option<&WaitlistEntry> {
        self.waitlist.first()
    }

    /// 1 + max existing position, or 1 for an empty queue.
    pub fn next_position(&self) -> u32 {
        self.waitlist.last().map_or(0, |e| e.position) + 1
    }

    pub fn insert_waitlist(&mut self, entry: WaitlistEntry) {
        let pos = self
            .waitlist
            .binary_search_by_key(&entry.position, |e| e.position)
            .unwrap_or_else(|e| e);
        self.waitlist.insert(pos, entry);
    }

    /// Remove an entry and close the gap: every later position moves up by one.
    pub fn remove_waitlist_entry(&mut self, id: Ulid) -> Option<WaitlistEntry> {
        let idx = self.waitlist.iter().position(|e| e.id == id)?;
        let removed = self.waitlist.remove(idx);
        for entry in &mut self.waitlist {
            if entry.position > removed.position {
                entry.position -= 1;
            }
        }
        Some(removed)
    }

    pub fn has_demand(&self) -> bool {
        !self.bookings.is_empty() || !self.waitlist.is_empty()
    }
}

/// The event types — flat, no nesting. A WAL record is a `Vec<Event>`
/// committed as one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    MarketCreated {
        id: Ulid,
        name: String,
        location: Option<String>,
        stipend_cents: i64,
        contact_email: Option<String>,
    },
    MarketUpdated {
        id: Ulid,
        name: String,
        location: Option<String>,
        stipend_cents: i64,
        contact_email: Option<String>,
    },
    PerformanceDateCreated {
        id: Ulid,
        market_id: Ulid,
        date: Ms,
        notes: Option<String>,
    },
    PerformanceDateDeactivated {
        id: Ulid,
    },
    TimeSlotCreated {
        id: Ulid,
        performance_date_id: Ulid,
        span: Span,
        slot_order: u32,
    },
    TimeSlotDeleted {
        id: Ulid,
        performance_date_id: Ulid,
    },
    MusicianRegistered {
        id: Ulid,
        name: String,
        email: String,
        phone: String,
        genre: String,
        description: Option<String>,
        website: Option<String>,
        registered_at: Ms,
    },
    MediaAttached {
        id: Ulid,
        musician_id: Ulid,
        kind: MediaKind,
        original_filename: String,
        stored_path: String,
        size_bytes: u64,
        mime_type: String,
        uploaded_at: Ms,
    },
    MediaRemoved {
        id: Ulid,
        musician_id: Ulid,
    },
    BookingConfirmed {
        id: Ulid,
        time_slot_id: Ulid,
        musician_id: Ulid,
        booked_at: Ms,
        promoted: bool,
    },
    WaitlistJoined {
        id: Ulid,
        time_slot_id: Ulid,
        musician_id: Ulid,
        position: u32,
        joined_at: Ms,
    },
    BookingCancelled {
        id: Ulid,
        time_slot_id: Ulid,
        musician_id: Ulid,
        cancelled_at: Ms,
        reason: String,
    },
    WaitlistPromoted {
        entry_id: Ulid,
        booking_id: Ulid,
        time_slot_id: Ulid,
        musician_id: Ulid,
        promoted_at: Ms,
    },
    StipendPaid {
        booking_id: Ulid,
        time_slot_id: Ulid,
        paid_at: Ms,
    },
}

impl Event {
    /// The time slot whose ledger this event changes, if any.
    pub fn time_slot_id(&self) -> Option<Ulid> {
        match self {
            Event::TimeSlotCreated { id, .. } | Event::TimeSlotDeleted { id, .. } => Some(*id),
            Event::BookingConfirmed { time_slot_id, .. }
            | Event::WaitlistJoined { time_slot_id, .. }
            | Event::BookingCancelled { time_slot_id, .. }
            | Event::WaitlistPromoted { time_slot_id, .. }
            | Event::StipendPaid { time_slot_id, .. } => Some(*time_slot_id),
            Event::MarketCreated { .. }
            | Event::MarketUpdated { .. }
            | Event::PerformanceDateCreated { .. }
            | Event::PerformanceDateDeactivated { .. }
            | Event::MusicianRegistered { .. }
            | Event::MediaAttached { .. }
            | Event::MediaRemoved { .. } => None,
        }
    }
}

// ── Operation results ────────────────────────────────────────────

/// Per-slot result of a booking request. Conflicts are values, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOutcome {
    Confirmed { booking_id: Ulid },
    Waitlisted { position: u32 },
    AlreadyBooked,
    AlreadyWaitlisted,
    Full,
}

impl SlotOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            SlotOutcome::Confirmed { .. } => "confirmed",
            SlotOutcome::Waitlisted { .. } => "waitlisted",
            SlotOutcome::AlreadyBooked => "already_booked",
            SlotOutcome::AlreadyWaitlisted => "already_waitlisted",
            SlotOutcome::Full => "full",
        }
    }

    pub fn booking_id(&self) -> Option<Ulid> {
        match self {
            SlotOutcome::Confirmed { booking_id } => Some(*booking_id),
            _ => None,
        }
    }

    pub fn position(&self) -> Option<u32> {
        match self {
            SlotOutcome::Waitlisted { position } => Some(*position),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotResult {
    pub time_slot_id: Ulid,
    pub outcome: SlotOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MusicianContact {
    pub id: Ulid,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promotion {
    pub booking_id: Ulid,
    pub musician: MusicianContact,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelOutcome {
    pub cancelled_booking_id: Ulid,
    pub time_slot_id: Ulid,
    pub promoted: Option<Promotion>,
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotLedgerView {
    pub time_slot_id: Ulid,
    pub confirmed: Option<Booking>,
    pub waitlist: Vec<WaitlistEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub musician_id: Option<Ulid>,
    pub market_id: Option<Ulid>,
    pub status: Option<BookingStatus>,
    /// Calendar month (1-12) of the performance date, in UTC, any year.
    pub month: Option<u32>,
}

/// A booking joined with its slot, date and musician for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingInfo {
    pub booking: Booking,
    pub market_id: Ulid,
    pub performance_date_id: Ulid,
    pub date: Ms,
    pub span: Span,
    pub slot_order: u32,
    pub musician_name: String,
    pub musician_email: String,
    pub market_name: String,
    pub stipend_cents: i64,
    /// Entries queued on the booking's slot right now.
    pub waitlist_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitlistInfo {
    pub entry: WaitlistEntry,
    pub musician_name: String,
    pub musician_email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSlotInfo {
    pub id: Ulid,
    pub performance_date_id: Ulid,
    pub span: Span,
    pub slot_order: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRow {
    pub performance_date_id: Ulid,
    pub date: Ms,
    pub time_slot_id: Ulid,
    pub span: Span,
    pub slot_order: u32,
    pub booking_id: Option<Ulid>,
    pub musician_id: Option<Ulid>,
    pub musician_name: Option<String>,
    pub waitlist_count: usize,
}

/// Where and when a slot takes place, for notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotContext {
    pub market_name: String,
    pub date: Ms,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub total_slots: usize,
    pub booked_slots: usize,
    pub available_slots: usize,
    pub total_musicians: usize,
    pub total_waitlist: usize,
}
