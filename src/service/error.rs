use crate::model::Ms;
use crate::store::StoreError;

/// A booking request that breaks a business rule. Never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    MissingUser,
    MissingRoom,
    StartTooSoon { start: Ms, earliest: Ms },
    InvalidWindow { start: Ms, end: Ms },
    /// No local calendar day contains the instant.
    InvalidDay(Ms),
    RoomOccupied { room_id: String, by: String },
}

impl ValidationError {
    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            ValidationError::MissingUser => "missing_user",
            ValidationError::MissingRoom => "missing_room",
            ValidationError::StartTooSoon { .. } => "start_too_soon",
            ValidationError::InvalidWindow { .. } => "invalid_window",
            ValidationError::InvalidDay(_) => "invalid_day",
            ValidationError::RoomOccupied { .. } => "room_occupied",
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::MissingUser => write!(f, "user id is required"),
            ValidationError::MissingRoom => write!(f, "room id is required"),
            ValidationError::StartTooSoon { start, earliest } => {
                write!(f, "start {start} is too soon; earliest allowed is {earliest}")
            }
            ValidationError::InvalidWindow { start, end } => {
                write!(f, "window [{start}, {end}) is empty or inverted")
            }
            ValidationError::InvalidDay(ms) => write!(f, "no calendar day contains {ms}"),
            ValidationError::RoomOccupied { room_id, by } => {
                write!(f, "room {room_id} is already reserved by {by}")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug)]
pub enum ServiceError {
    /// The request is bad; surface to the caller.
    Validation(ValidationError),
    NotFound(String),
    /// The store failed; the request may succeed if retried.
    Persistence(StoreError),
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::Validation(e) => write!(f, "invalid reservation: {e}"),
            ServiceError::NotFound(id) => write!(f, "reservation not found: {id}"),
            ServiceError::Persistence(e) => write!(f, "persistence failed: {e}"),
        }
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServiceError::Validation(e) => Some(e),
            ServiceError::NotFound(_) => None,
            ServiceError::Persistence(e) => Some(e),
        }
    }
}

impl From<ValidationError> for ServiceError {
    fn from(e: ValidationError) -> Self {
        ServiceError::Validation(e)
    }
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => ServiceError::NotFound(id),
            other => ServiceError::Persistence(other),
        }
    }
}
