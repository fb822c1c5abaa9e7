use crate::model::{MINUTE_MS, Ms, ReservationRecord, ReservationRequest, ReservationStatus};

use super::ValidationError;

/// How far ahead of now a booking must start.
pub(crate) const MIN_LEAD_MS: Ms = MINUTE_MS;

pub(crate) fn validate_request(
    request: &ReservationRequest,
    now: Ms,
) -> Result<(), ValidationError> {
    if request.user_id.trim().is_empty() {
        return Err(ValidationError::MissingUser);
    }
    if request.room_id.trim().is_empty() {
        return Err(ValidationError::MissingRoom);
    }
    let earliest = now + MIN_LEAD_MS;
    if request.start < earliest {
        return Err(ValidationError::StartTooSoon {
            start: request.start,
            earliest,
        });
    }
    if request.end <= request.start {
        return Err(ValidationError::InvalidWindow {
            start: request.start,
            end: request.end,
        });
    }
    Ok(())
}

/// `others` are the room's records overlapping the candidate's window, as
/// returned by the store. Cancelled records and the candidate itself never
/// conflict.
pub(crate) fn check_no_conflict(
    candidate: &ReservationRecord,
    others: &[ReservationRecord],
) -> Result<(), ValidationError> {
    let span = candidate.span();
    for other in others {
        if other.same_reservation(candidate)
            || other.status == ReservationStatus::Cancelled
            || other.room_id != candidate.room_id
        {
            continue;
        }
        if other.span().overlaps(&span) {
            return Err(ValidationError::RoomOccupied {
                room_id: candidate.room_id.clone(),
                by: other.id.clone(),
            });
        }
    }
    Ok(())
}
