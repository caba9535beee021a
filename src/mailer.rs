//! Notification emails for committed booking events.
//!
//! The dispatcher subscribes to the engine's notify hub and turns each
//! booking event into an email for the affected musician. Delivery is
//! fire-and-forget: a failed send is recorded in the outbox and logged,
//! never propagated back to the transaction that produced the event.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::engine::{Engine, EngineError, DEFAULT_CANCEL_REASON};
use crate::model::{Event, Ms, MusicianContact, SlotContext};
use crate::observability::EMAILS_TOTAL;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailKind {
    BookingConfirmation,
    WaitlistJoined,
    Cancellation,
    WaitlistPromotion,
}

impl EmailKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EmailKind::BookingConfirmation => "booking_confirmation",
            EmailKind::WaitlistJoined => "waitlist",
            EmailKind::Cancellation => "cancellation",
            EmailKind::WaitlistPromotion => "waitlist_promotion",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub to_name: String,
    pub subject: String,
    pub body: String,
    pub kind: EmailKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailError(pub String);

impl std::fmt::Display for MailError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mail delivery failed: {}", self.0)
    }
}

impl std::error::Error for MailError {}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), MailError>;
}

/// Writes emails to the log instead of delivering them.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        tracing::info!(to = %email.to, subject = %email.subject, kind = email.kind.as_str(), "email sent");
        tracing::debug!("{}", email.body);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    Sent,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxRecord {
    pub at: Ms,
    pub to: String,
    pub subject: String,
    pub kind: EmailKind,
    pub status: DeliveryStatus,
}

/// Most recent delivery attempts, oldest dropped first.
pub struct Outbox {
    records: Mutex<VecDeque<OutboxRecord>>,
    capacity: usize,
}

impl Outbox {
    pub fn new(capacity: usize) -> Self {
        Self { records: Mutex::new(VecDeque::new()), capacity: capacity.max(1) }
    }

    pub async fn push(&self, record: OutboxRecord) {
        let mut records = self.records.lock().await;
        if records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    pub async fn records(&self) -> Vec<OutboxRecord> {
        self.records.lock().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

fn format_day(ms: Ms) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|d| d.format("%A, %B %-d, %Y").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn format_time(ms: Ms) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|d| d.format("%-I:%M %p").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn describe_slot(ctx: &SlotContext) -> String {
    format!(
        "{} on {}, {} - {} UTC",
        ctx.market_name,
        format_day(ctx.date),
        format_time(ctx.span.start),
        format_time(ctx.span.end)
    )
}

fn build_email(to: MusicianContact, kind: EmailKind, subject: &str, body: String) -> Email {
    Email { to: to.email, to_name: to.name, subject: subject.to_string(), body, kind }
}

/// The email a committed event calls for, if any.
pub async fn compose(engine: &Engine, event: &Event) -> Result<Option<Email>, EngineError> {
    let (musician_id, slot_id) = match event {
        Event::BookingConfirmed { promoted: false, musician_id, time_slot_id, .. }
        | Event::WaitlistJoined { musician_id, time_slot_id, .. }
        | Event::BookingCancelled { musician_id, time_slot_id, .. }
        | Event::WaitlistPromoted { musician_id, time_slot_id, .. } => (*musician_id, *time_slot_id),
        _ => return Ok(None),
    };
    let contact = engine.get_musician(musician_id)?.contact();
    let slot = engine
        .slot_context(slot_id)
        .await
        .ok_or(EngineError::NotFound(slot_id))?;
    let when = describe_slot(&slot);
    let name = contact.name.clone();

    let email = match event {
        Event::BookingConfirmed { .. } => build_email(
            contact,
            EmailKind::BookingConfirmation,
            "Performance Booking Confirmed",
            format!(
                "Hi {name},\n\nYou're confirmed to perform at {when}.\n\n\
                 Don't forget to upload your music sample, logo, and headshot photo!\n\
                 Your stipend will be paid on the day of your performance.\n"
            ),
        ),
        Event::WaitlistJoined { position, .. } => build_email(
            contact,
            EmailKind::WaitlistJoined,
            "Added to Waitlist",
            format!(
                "Hi {name},\n\nThat slot is taken, so you've been added to the waitlist for {when} \
                 at position {position}. We'll email you if it opens up.\n"
            ),
        ),
        Event::BookingCancelled { reason, .. } => {
            let reason = if reason.is_empty() { DEFAULT_CANCEL_REASON } else { reason.as_str() };
            build_email(
                contact,
                EmailKind::Cancellation,
                "Performance Cancelled",
                format!("Hi {name},\n\nYour performance at {when} has been cancelled. Reason: {reason}\n"),
            )
        }
        Event::WaitlistPromoted { .. } => build_email(
            contact,
            EmailKind::WaitlistPromotion,
            "You've Been Moved Off the Waitlist!",
            format!(
                "Hi {name},\n\nGreat news! A slot has opened up and you've been confirmed \
                 for {when}.\n"
            ),
        ),
        _ => return Ok(None),
    };
    Ok(Some(email))
}

/// Compose and send the email for one event, recording the attempt.
pub async fn dispatch(engine: &Engine, mailer: &dyn Mailer, outbox: &Outbox, event: &Event) {
    let email = match compose(engine, event).await {
        Ok(Some(email)) => email,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!("cannot compose notification: {e}");
            return;
        }
    };
    let status = match mailer.send(&email).await {
        Ok(()) => DeliveryStatus::Sent,
        Err(e) => {
            tracing::warn!(to = %email.to, subject = %email.subject, "{e}");
            DeliveryStatus::Failed(e.0)
        }
    };
    let label = if status == DeliveryStatus::Sent { "sent" } else { "failed" };
    metrics::counter!(EMAILS_TOTAL, "kind" => email.kind.as_str(), "status" => label).increment(1);
    outbox
        .push(OutboxRecord {
            at: crate::engine::now_ms(),
            to: email.to,
            subject: email.subject,
            kind: email.kind,
            status,
        })
        .await;
}

/// Subscribe to the engine's notify hub and deliver emails until the hub closes.
///
/// The subscription is taken before the task starts, so every event
/// committed after this call returns is seen.
pub fn spawn_dispatcher(engine: Arc<Engine>, mailer: Arc<dyn Mailer>, outbox: Arc<Outbox>) -> JoinHandle<()> {
    let mut rx = engine.notify.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => dispatch(&engine, mailer.as_ref(), &outbox, &event).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("notification dispatcher lagged, {n} events skipped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
