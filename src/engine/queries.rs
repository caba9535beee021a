use chrono::Datelike;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError, SharedSlotState};

impl Engine {
    pub fn list_markets(&self) -> Vec<Market> {
        let mut markets: Vec<Market> = self.markets.iter().map(|m| m.value().clone()).collect();
        markets.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()).then(a.id.cmp(&b.id)));
        markets
    }

    pub fn get_market(&self, id: Ulid) -> Result<Market, EngineError> {
        self.markets
            .get(&id)
            .map(|m| m.value().clone())
            .ok_or(EngineError::NotFound(id))
    }

    /// Dates of a market, inactive ones included, in calendar order.
    pub fn list_performance_dates(&self, market_id: Ulid) -> Result<Vec<PerformanceDate>, EngineError> {
        if !self.markets.contains_key(&market_id) {
            return Err(EngineError::NotFound(market_id));
        }
        let ids = self
            .dates_by_market
            .get(&market_id)
            .map(|d| d.value().clone())
            .unwrap_or_default();
        let mut dates: Vec<PerformanceDate> = ids
            .iter()
            .filter_map(|id| self.dates.get(id).map(|d| d.value().clone()))
            .collect();
        dates.sort_by_key(|d| (d.date, d.id));
        Ok(dates)
    }

    pub async fn list_time_slots(&self, performance_date_id: Ulid) -> Result<Vec<TimeSlotInfo>, EngineError> {
        if !self.dates.contains_key(&performance_date_id) {
            return Err(EngineError::NotFound(performance_date_id));
        }
        let mut slots = Vec::new();
        for handle in self.slot_handles_for_date(performance_date_id) {
            let guard = handle.read().await;
            if guard.deleted {
                continue;
            }
            slots.push(TimeSlotInfo {
                id: guard.id,
                performance_date_id: guard.performance_date_id,
                span: guard.span,
                slot_order: guard.slot_order,
            });
        }
        slots.sort_by_key(|s| (s.slot_order, s.span.start, s.id));
        Ok(slots)
    }

    /// Musicians ordered by name, case-insensitively.
    pub fn list_musicians(&self) -> Vec<Musician> {
        let mut musicians: Vec<Musician> = self.musicians.iter().map(|m| m.value().clone()).collect();
        musicians.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()).then(a.id.cmp(&b.id)));
        musicians
    }

    pub fn get_musician(&self, id: Ulid) -> Result<Musician, EngineError> {
        self.musicians
            .get(&id)
            .map(|m| m.value().clone())
            .ok_or(EngineError::NotFound(id))
    }

    pub fn list_media(&self, musician_id: Ulid) -> Result<Vec<MediaFile>, EngineError> {
        self.musicians
            .get(&musician_id)
            .map(|m| m.media.clone())
            .ok_or(EngineError::NotFound(musician_id))
    }

    /// Bookings joined with their date and musician, ordered by date then slot order.
    pub async fn list_bookings(&self, filter: &BookingFilter) -> Vec<BookingInfo> {
        let handles: Vec<SharedSlotState> = self.slots.iter().map(|e| e.value().clone()).collect();
        let mut rows = Vec::new();
        for handle in handles {
            let guard = handle.read().await;
            if guard.deleted {
                continue;
            }
            let Some(date) = self.dates.get(&guard.performance_date_id).map(|d| d.value().clone()) else {
                continue;
            };
            if filter.market_id.is_some_and(|m| m != date.market_id)
                || filter.month.is_some_and(|m| Some(m) != utc_month(date.date))
            {
                continue;
            }
            let (market_name, stipend_cents) = self
                .markets
                .get(&date.market_id)
                .map(|m| (m.name.clone(), m.stipend_cents))
                .unwrap_or_default();
            for b in &guard.bookings {
                if filter.musician_id.is_some_and(|m| m != b.musician_id)
                    || filter.status.is_some_and(|s| s != b.status)
                {
                    continue;
                }
                let (musician_name, musician_email) = self
                    .musicians
                    .get(&b.musician_id)
                    .map(|m| (m.name.clone(), m.email.clone()))
                    .unwrap_or_default();
                rows.push(BookingInfo {
                    booking: b.clone(),
                    market_id: date.market_id,
                    performance_date_id: date.id,
                    date: date.date,
                    span: guard.span,
                    slot_order: guard.slot_order,
                    musician_name,
                    musician_email,
                    market_name: market_name.clone(),
                    stipend_cents,
                    waitlist_count: guard.waitlist.len(),
                });
            }
        }
        rows.sort_by_key(|r| (r.date, r.slot_order, r.span.start, r.booking.booked_at, r.booking.id));
        rows
    }

    pub async fn list_waitlist(&self, slot_id: Ulid) -> Result<Vec<WaitlistInfo>, EngineError> {
        let ledger = self.slot_ledger(slot_id).await?;
        Ok(ledger
            .waitlist
            .into_iter()
            .map(|entry| {
                let (musician_name, musician_email) = self
                    .musicians
                    .get(&entry.musician_id)
                    .map(|m| (m.name.clone(), m.email.clone()))
                    .unwrap_or_default();
                WaitlistInfo { entry, musician_name, musician_email }
            })
            .collect())
    }

    /// Active dates of a market with every slot, its occupant and queue length.
    pub async fn schedule(&self, market_id: Ulid) -> Result<Vec<ScheduleRow>, EngineError> {
        let dates = self.list_performance_dates(market_id)?;
        let mut rows = Vec::new();
        for date in dates.into_iter().filter(|d| d.is_active) {
            let mut day = Vec::new();
            for handle in self.slot_handles_for_date(date.id) {
                let guard = handle.read().await;
                if guard.deleted {
                    continue;
                }
                let confirmed = guard.confirmed();
                day.push(ScheduleRow {
                    performance_date_id: date.id,
                    date: date.date,
                    time_slot_id: guard.id,
                    span: guard.span,
                    slot_order: guard.slot_order,
                    booking_id: confirmed.map(|b| b.id),
                    musician_id: confirmed.map(|b| b.musician_id),
                    musician_name: confirmed
                        .and_then(|b| self.musicians.get(&b.musician_id).map(|m| m.name.clone())),
                    waitlist_count: guard.waitlist.len(),
                });
            }
            day.sort_by_key(|r| (r.slot_order, r.span.start, r.time_slot_id));
            rows.extend(day);
        }
        Ok(rows)
    }

    /// Slot occupancy across active dates, for one market or all of them.
    pub async fn stats(&self, market_id: Option<Ulid>) -> Result<Stats, EngineError> {
        if let Some(id) = market_id
            && !self.markets.contains_key(&id)
        {
            return Err(EngineError::NotFound(id));
        }
        let date_ids: Vec<Ulid> = self
            .dates
            .iter()
            .filter(|d| d.is_active && market_id.is_none_or(|m| m == d.market_id))
            .map(|d| d.id)
            .collect();

        let mut stats = Stats { total_musicians: self.musicians.len(), ..Stats::default() };
        for date_id in date_ids {
            for handle in self.slot_handles_for_date(date_id) {
                let guard = handle.read().await;
                if guard.deleted {
                    continue;
                }
                stats.total_slots += 1;
                if guard.confirmed().is_some() {
                    stats.booked_slots += 1;
                }
                stats.total_waitlist += guard.waitlist.len();
            }
        }
        stats.available_slots = stats.total_slots - stats.booked_slots;
        Ok(stats)
    }

    pub async fn slot_context(&self, slot_id: Ulid) -> Option<SlotContext> {
        let (date_id, span) = {
            let handle = self.get_slot(&slot_id)?;
            let guard = handle.read().await;
            (guard.performance_date_id, guard.span)
        };
        let date = self.dates.get(&date_id).map(|d| d.value().clone())?;
        let market_name = self.markets.get(&date.market_id).map(|m| m.name.clone())?;
        Some(SlotContext { market_name, date: date.date, span })
    }

    fn slot_handles_for_date(&self, performance_date_id: Ulid) -> Vec<SharedSlotState> {
        let ids = self
            .slots_by_date
            .get(&performance_date_id)
            .map(|s| s.value().clone())
            .unwrap_or_default();
        ids.iter().filter_map(|id| self.get_slot(id)).collect()
    }
}

fn utc_month(ms: Ms) -> Option<u32> {
    chrono::DateTime::from_timestamp_millis(ms).map(|d| d.month())
}
