use ulid::Ulid;

use crate::media::MediaError;

#[derive(Debug)]
pub enum EngineError {
    Validation(String),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    DuplicateEmail(String),
    AlreadyCancelled(Ulid),
    HasBookings(Ulid),
    InvalidMedia(MediaError),
    LimitExceeded(&'static str),
    /// The booking transaction could not be committed; nothing was applied.
    BookingFailed(String),
    /// The cancellation transaction could not be committed; nothing was applied.
    CancelFailed(String),
    WalError(String),
}

impl EngineError {
    /// SQLSTATE reported to wire clients.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "22023",
            EngineError::NotFound(_) => "P0002",
            EngineError::AlreadyExists(_) | EngineError::DuplicateEmail(_) => "23505",
            EngineError::AlreadyCancelled(_) => "55000",
            EngineError::HasBookings(_) => "23503",
            EngineError::InvalidMedia(_) => "22023",
            EngineError::LimitExceeded(_) => "54000",
            EngineError::BookingFailed(_) | EngineError::CancelFailed(_) => "40000",
            EngineError::WalError(_) => "58030",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid request: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::DuplicateEmail(email) => {
                write!(f, "a musician with email {email} is already registered")
            }
            EngineError::AlreadyCancelled(id) => write!(f, "booking {id} is already cancelled"),
            EngineError::HasBookings(id) => {
                write!(f, "cannot delete time slot {id}: has bookings or waitlist entries")
            }
            EngineError::InvalidMedia(e) => write!(f, "invalid media: {e}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::BookingFailed(e) => write!(f, "booking failed: {e}"),
            EngineError::CancelFailed(e) => write!(f, "cancellation failed: {e}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<MediaError> for EngineError {
    fn from(e: MediaError) -> Self {
        EngineError::InvalidMedia(e)
    }
}
