use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Unix milliseconds. The only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

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

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Lifecycle of a reservation. The integer codes are what stores and caches see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum ReservationStatus {
    Cancelled,
    Pending,
    Active,
    Ended,
}

impl ReservationStatus {
    pub const fn code(self) -> i8 {
        match self {
            ReservationStatus::Cancelled => -1,
            ReservationStatus::Pending => 0,
            ReservationStatus::Active => 1,
            ReservationStatus::Ended => 2,
        }
    }

    /// `Ended` and `Cancelled` never transition again.
    pub const fn is_terminal(self) -> bool {
        matches!(self, ReservationStatus::Ended | ReservationStatus::Cancelled)
    }

    pub const fn label(self) -> &'static str {
        match self {
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Pending => "pending",
            ReservationStatus::Active => "active",
            ReservationStatus::Ended => "ended",
        }
    }
}

impl From<ReservationStatus> for i8 {
    fn from(status: ReservationStatus) -> Self {
        status.code()
    }
}

impl TryFrom<i8> for ReservationStatus {
    type Error = UnknownStatus;

    fn try_from(code: i8) -> Result<Self, Self::Error> {
        match code {
            -1 => Ok(ReservationStatus::Cancelled),
            0 => Ok(ReservationStatus::Pending),
            1 => Ok(ReservationStatus::Active),
            2 => Ok(ReservationStatus::Ended),
            other => Err(UnknownStatus(other)),
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownStatus(pub i8);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown reservation status code: {}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

/// A booked room for a time window. `id` is assigned before the record reaches
/// the scheduler and never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRecord {
    pub id: String,
    pub room_id: String,
    pub user_id: String,
    pub start: Ms,
    pub end: Ms,
    pub status: ReservationStatus,
    pub comments: Option<String>,
    pub created_at: Ms,
    /// Client address recorded by the booking flow.
    pub ip: Option<String>,
}

impl ReservationRecord {
    /// Window as a span. Not validated: callers guarantee `end > start`.
    pub fn span(&self) -> Span {
        Span {
            start: self.start,
            end: self.end,
        }
    }

    pub fn same_reservation(&self, other: &ReservationRecord) -> bool {
        self.id == other.id
    }
}

/// Ordering for day listings: live reservations first, then terminal ones,
/// each group by start time.
pub fn display_order(a: &ReservationRecord, b: &ReservationRecord) -> Ordering {
    a.status
        .is_terminal()
        .cmp(&b.status.is_terminal())
        .then(a.start.cmp(&b.start))
}

/// Booking-flow input. `id: None` books a new reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRequest {
    pub id: Option<String>,
    pub room_id: String,
    pub user_id: String,
    pub start: Ms,
    pub end: Ms,
    pub status: ReservationStatus,
    pub comments: Option<String>,
    pub ip: Option<String>,
}

impl ReservationRequest {
    pub fn into_record(self, id: String, created_at: Ms) -> ReservationRecord {
        ReservationRecord {
            id,
            room_id: self.room_id,
            user_id: self.user_id,
            start: self.start,
            end: self.end,
            status: self.status,
            comments: self.comments,
            created_at,
            ip: self.ip,
        }
    }
}
