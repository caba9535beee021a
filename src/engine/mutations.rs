use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::media::{self, MediaKind};
use crate::model::*;

use super::ledger::{now_ms, validate_span, validate_timestamp};
use super::{apply_to_slot, Engine, EngineError, WalCommand};

fn required(field: &str, value: &str, max: usize) -> Result<String, EngineError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(EngineError::Validation(format!("{field} is required")));
    }
    if value.len() > max {
        return Err(EngineError::Validation(format!("{field} is too long")));
    }
    Ok(value.to_string())
}

/// Trimmed optional text; blank becomes `None`.
fn optional(field: &str, value: Option<String>, max: usize) -> Result<Option<String>, EngineError> {
    match value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(v) if v.len() > max => Err(EngineError::Validation(format!("{field} is too long"))),
        other => Ok(other),
    }
}

fn validate_email(field: &str, email: &str) -> Result<String, EngineError> {
    let email = required(field, email, MAX_EMAIL_LEN)?;
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(EngineError::Validation(format!("{field} is not a valid email address"))),
    }
}

impl Engine {
    // ── Markets ──────────────────────────────────────────────

    pub async fn create_market(
        &self,
        id: Ulid,
        name: &str,
        location: Option<String>,
        stipend_cents: i64,
        contact_email: Option<String>,
    ) -> Result<Market, EngineError> {
        let name = required("market name", name, MAX_NAME_LEN)?;
        let location = optional("location", location, MAX_TEXT_LEN)?;
        if stipend_cents < 0 {
            return Err(EngineError::Validation("stipend cannot be negative".into()));
        }
        let contact_email = match optional("contact email", contact_email, MAX_EMAIL_LEN)? {
            Some(e) => Some(validate_email("contact email", &e)?),
            None => None,
        };

        let _catalog = self.catalog_lock.lock().await;
        if self.markets.len() >= MAX_MARKETS {
            return Err(EngineError::LimitExceeded("too many markets"));
        }
        if self.markets.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let market = Market { id, name, location, stipend_cents, contact_email };
        self.persist_and_apply(vec![Event::MarketCreated {
            id,
            name: market.name.clone(),
            location: market.location.clone(),
            stipend_cents,
            contact_email: market.contact_email.clone(),
        }])
        .await?;
        Ok(market)
    }

    /// Apply a settings patch; absent fields keep their current value.
    pub async fn update_market(&self, id: Ulid, patch: MarketPatch) -> Result<Market, EngineError> {
        if patch.is_empty() {
            return Err(EngineError::Validation("no market settings to update".into()));
        }
        let patch = MarketPatch {
            name: match patch.name {
                Some(n) => Some(required("market name", &n, MAX_NAME_LEN)?),
                None => None,
            },
            location: optional("location", patch.location, MAX_TEXT_LEN)?,
            stipend_cents: patch.stipend_cents,
            contact_email: match optional("contact email", patch.contact_email, MAX_EMAIL_LEN)? {
                Some(e) => Some(validate_email("contact email", &e)?),
                None => None,
            },
        };
        if patch.stipend_cents.is_some_and(|c| c < 0) {
            return Err(EngineError::Validation("stipend cannot be negative".into()));
        }

        let _catalog = self.catalog_lock.lock().await;
        let current = self
            .markets
            .get(&id)
            .map(|m| m.value().clone())
            .ok_or(EngineError::NotFound(id))?;
        let updated = patch.applied_to(&current);
        self.persist_and_apply(vec![Event::MarketUpdated {
            id,
            name: updated.name.clone(),
            location: updated.location.clone(),
            stipend_cents: updated.stipend_cents,
            contact_email: updated.contact_email.clone(),
        }])
        .await?;
        Ok(updated)
    }

    // ── Performance dates ────────────────────────────────────

    /// `date` must be the first millisecond of a UTC day.
    pub async fn create_performance_date(
        &self,
        id: Ulid,
        market_id: Ulid,
        date: Ms,
        notes: Option<String>,
    ) -> Result<PerformanceDate, EngineError> {
        validate_timestamp(date)?;
        if date.rem_euclid(DAY_MS) != 0 {
            return Err(EngineError::Validation("performance date must start at midnight UTC".into()));
        }
        let notes = optional("notes", notes, MAX_TEXT_LEN)?;

        let _catalog = self.catalog_lock.lock().await;
        if !self.markets.contains_key(&market_id) {
            return Err(EngineError::NotFound(market_id));
        }
        if self.dates.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let existing = self.dates_by_market.get(&market_id).map_or(0, |d| d.len());
        if existing >= MAX_DATES_PER_MARKET {
            return Err(EngineError::LimitExceeded("too many performance dates for market"));
        }
        self.persist_and_apply(vec![Event::PerformanceDateCreated {
            id,
            market_id,
            date,
            notes: notes.clone(),
        }])
        .await?;
        Ok(PerformanceDate { id, market_id, date, notes, is_active: true })
    }

    /// Hide a date from the schedule. Its slots and bookings are kept.
    pub async fn deactivate_performance_date(&self, id: Ulid) -> Result<(), EngineError> {
        let _catalog = self.catalog_lock.lock().await;
        let active = self
            .dates
            .get(&id)
            .map(|d| d.is_active)
            .ok_or(EngineError::NotFound(id))?;
        if !active {
            return Ok(());
        }
        self.persist_and_apply(vec![Event::PerformanceDateDeactivated { id }]).await
    }

    // ── Time slots ───────────────────────────────────────────

    pub async fn create_time_slot(
        &self,
        id: Ulid,
        performance_date_id: Ulid,
        start: Ms,
        end: Ms,
        slot_order: u32,
    ) -> Result<TimeSlotInfo, EngineError> {
        let span = validate_span(start, end)?;

        let _catalog = self.catalog_lock.lock().await;
        let date = self
            .dates
            .get(&performance_date_id)
            .map(|d| d.date)
            .ok_or(EngineError::NotFound(performance_date_id))?;
        if !Span::new(date, date + DAY_MS).contains_span(&span) {
            return Err(EngineError::Validation(
                "time slot must fall within its performance date".into(),
            ));
        }
        if self.slots.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let existing = self.slots_by_date.get(&performance_date_id).map_or(0, |s| s.len());
        if existing >= MAX_SLOTS_PER_DATE {
            return Err(EngineError::LimitExceeded("too many time slots for performance date"));
        }
        self.persist_and_apply(vec![Event::TimeSlotCreated {
            id,
            performance_date_id,
            span,
            slot_order,
        }])
        .await?;
        Ok(TimeSlotInfo { id, performance_date_id, span, slot_order })
    }

    /// Delete a slot that nobody has booked or queued for.
    pub async fn delete_time_slot(&self, id: Ulid) -> Result<(), EngineError> {
        let _catalog = self.catalog_lock.lock().await;
        let slot = self.get_slot(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = slot.write().await;
        if guard.has_demand() {
            return Err(EngineError::HasBookings(id));
        }
        let event = Event::TimeSlotDeleted { id, performance_date_id: guard.performance_date_id };
        self.wal_append(vec![event.clone()]).await?;
        apply_to_slot(&mut guard, &event);
        self.apply_shared(&event);
        self.notify.publish(&event);
        Ok(())
    }

    // ── Musicians ────────────────────────────────────────────

    pub async fn register_musician(&self, new: NewMusician) -> Result<Musician, EngineError> {
        let name = required("name", &new.name, MAX_NAME_LEN)?;
        let email = validate_email("email", &new.email)?;
        let phone = required("phone", &new.phone, MAX_NAME_LEN)?;
        let genre = required("music genre", &new.genre, MAX_NAME_LEN)?;
        let description = optional("description", new.description, MAX_TEXT_LEN)?;
        let website = optional("website", new.website, MAX_TEXT_LEN)?;

        let _catalog = self.catalog_lock.lock().await;
        if self.musicians.len() >= MAX_MUSICIANS {
            return Err(EngineError::LimitExceeded("too many musicians"));
        }
        if self.musicians.contains_key(&new.id) {
            return Err(EngineError::AlreadyExists(new.id));
        }
        if self.emails.contains_key(&email.to_lowercase()) {
            return Err(EngineError::DuplicateEmail(email));
        }
        let registered_at = now_ms();
        self.persist_and_apply(vec![Event::MusicianRegistered {
            id: new.id,
            name: name.clone(),
            email: email.clone(),
            phone: phone.clone(),
            genre: genre.clone(),
            description: description.clone(),
            website: website.clone(),
            registered_at,
        }])
        .await?;
        tracing::info!(musician_id = %new.id, "musician registered");
        Ok(Musician {
            id: new.id,
            name,
            email,
            phone,
            genre,
            description,
            website,
            registered_at,
            media: Vec::new(),
        })
    }

    // ── Media ────────────────────────────────────────────────

    /// Record an upload's metadata after checking it against its kind's rule.
    pub async fn attach_media(
        &self,
        id: Ulid,
        musician_id: Ulid,
        kind: MediaKind,
        original_filename: &str,
        size_bytes: u64,
        mime_type: &str,
    ) -> Result<MediaFile, EngineError> {
        let ext = media::validate_upload(kind, original_filename, size_bytes, mime_type)?;

        let _catalog = self.catalog_lock.lock().await;
        let count = self
            .musicians
            .get(&musician_id)
            .map(|m| m.media.len())
            .ok_or(EngineError::NotFound(musician_id))?;
        if count >= MAX_MEDIA_PER_MUSICIAN {
            return Err(EngineError::LimitExceeded("too many media files for musician"));
        }
        if self.media_to_musician.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let uploaded_at = now_ms();
        let file = MediaFile {
            id,
            musician_id,
            kind,
            original_filename: original_filename.trim().to_string(),
            stored_path: media::stored_path(kind, uploaded_at, id, &ext),
            size_bytes,
            mime_type: mime_type.to_ascii_lowercase(),
            uploaded_at,
        };
        self.persist_and_apply(vec![Event::MediaAttached {
            id,
            musician_id,
            kind,
            original_filename: file.original_filename.clone(),
            stored_path: file.stored_path.clone(),
            size_bytes,
            mime_type: file.mime_type.clone(),
            uploaded_at,
        }])
        .await?;
        Ok(file)
    }

    pub async fn remove_media(&self, id: Ulid) -> Result<(), EngineError> {
        let _catalog = self.catalog_lock.lock().await;
        let musician_id = self
            .media_to_musician
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(id))?;
        self.persist_and_apply(vec![Event::MediaRemoved { id, musician_id }]).await
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL as the minimal event set that recreates current state.
    ///
    /// Holds the catalog lock and a read lock on every slot until the
    /// rewritten file is in place, so no commit can land between snapshot
    /// and swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _catalog = self.catalog_lock.lock().await;
        let mut events = Vec::new();

        let mut markets: Vec<Market> = self.markets.iter().map(|m| m.value().clone()).collect();
        markets.sort_by_key(|m| m.id);
        for m in markets {
            events.push(Event::MarketCreated {
                id: m.id,
                name: m.name,
                location: m.location,
                stipend_cents: m.stipend_cents,
                contact_email: m.contact_email,
            });
        }

        let mut dates: Vec<PerformanceDate> = self.dates.iter().map(|d| d.value().clone()).collect();
        dates.sort_by_key(|d| d.id);
        for d in dates {
            events.push(Event::PerformanceDateCreated {
                id: d.id,
                market_id: d.market_id,
                date: d.date,
                notes: d.notes,
            });
            if !d.is_active {
                events.push(Event::PerformanceDateDeactivated { id: d.id });
            }
        }

        let mut musicians: Vec<Musician> = self.musicians.iter().map(|m| m.value().clone()).collect();
        musicians.sort_by_key(|m| m.id);
        for m in musicians {
            events.push(Event::MusicianRegistered {
                id: m.id,
                name: m.name,
                email: m.email,
                phone: m.phone,
                genre: m.genre,
                description: m.description,
                website: m.website,
                registered_at: m.registered_at,
            });
            for f in m.media {
                events.push(Event::MediaAttached {
                    id: f.id,
                    musician_id: f.musician_id,
                    kind: f.kind,
                    original_filename: f.original_filename,
                    stored_path: f.stored_path,
                    size_bytes: f.size_bytes,
                    mime_type: f.mime_type,
                    uploaded_at: f.uploaded_at,
                });
            }
        }

        let mut slot_ids: Vec<Ulid> = self.slots.iter().map(|e| *e.key()).collect();
        slot_ids.sort();
        let mut guards = Vec::with_capacity(slot_ids.len());
        for id in &slot_ids {
            if let Some(slot) = self.get_slot(id) {
                guards.push(slot.read_owned().await);
            }
        }
        for slot in &guards {
            events.push(Event::TimeSlotCreated {
                id: slot.id,
                performance_date_id: slot.performance_date_id,
                span: slot.span,
                slot_order: slot.slot_order,
            });
            for b in &slot.bookings {
                events.push(Event::BookingConfirmed {
                    id: b.id,
                    time_slot_id: slot.id,
                    musician_id: b.musician_id,
                    booked_at: b.booked_at,
                    promoted: b.promoted,
                });
                if let Some(paid_at) = b.stipend_paid_at {
                    events.push(Event::StipendPaid { booking_id: b.id, time_slot_id: slot.id, paid_at });
                }
                if b.status == BookingStatus::Cancelled {
                    events.push(Event::BookingCancelled {
                        id: b.id,
                        time_slot_id: slot.id,
                        musician_id: b.musician_id,
                        cancelled_at: b.cancelled_at.unwrap_or(b.booked_at),
                        reason: b.cancellation_reason.clone().unwrap_or_default(),
                    });
                }
            }
            for e in &slot.waitlist {
                events.push(Event::WaitlistJoined {
                    id: e.id,
                    time_slot_id: slot.id,
                    musician_id: e.musician_id,
                    position: e.position,
                    joined_at: e.joined_at,
                });
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        drop(guards);
        tracing::info!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
