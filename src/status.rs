use crate::model::{Ms, ReservationRecord, ReservationStatus};

/// Status a reservation should have at `now`.
///
/// Cancellation is an explicit action, so a cancelled record stays cancelled.
/// Otherwise the answer depends only on where `now` falls relative to the
/// half-open window `[start, end)`.
pub fn derive_status(record: &ReservationRecord, now: Ms) -> ReservationStatus {
    if record.status == ReservationStatus::Cancelled {
        return ReservationStatus::Cancelled;
    }
    if now < record.start {
        ReservationStatus::Pending
    } else if now < record.end {
        ReservationStatus::Active
    } else {
        ReservationStatus::Ended
    }
}

/// Instant of the next transition out of `status`, if there is one.
pub fn next_wake(record: &ReservationRecord, status: ReservationStatus) -> Option<Ms> {
    match status {
        ReservationStatus::Pending => Some(record.start),
        ReservationStatus::Active => Some(record.end),
        ReservationStatus::Ended | ReservationStatus::Cancelled => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: Ms = 10_000;
    const END: Ms = 20_000;

    fn record(status: ReservationStatus) -> ReservationRecord {
        ReservationRecord {
            id: "r1".into(),
            room_id: "room".into(),
            user_id: "user".into(),
            start: START,
            end: END,
            status,
            comments: None,
            created_at: 0,
            ip: None,
        }
    }

    #[test]
    fn window_boundaries() {
        let r = record(ReservationStatus::Pending);
        assert_eq!(derive_status(&r, START - 1), ReservationStatus::Pending);
        assert_eq!(derive_status(&r, START), ReservationStatus::Active);
        assert_eq!(derive_status(&r, END - 1), ReservationStatus::Active);
        assert_eq!(derive_status(&r, END), ReservationStatus::Ended);
        assert_eq!(derive_status(&r, END + 1_000_000), ReservationStatus::Ended);
    }

    #[test]
    fn stored_status_does_not_matter_unless_cancelled() {
        for stored in [
            ReservationStatus::Pending,
            ReservationStatus::Active,
            ReservationStatus::Ended,
        ] {
            let r = record(stored);
            assert_eq!(derive_status(&r, START + 1), ReservationStatus::Active);
        }
    }

    #[test]
    fn cancelled_is_never_touched() {
        let r = record(ReservationStatus::Cancelled);
        for now in [0, START, END - 1, END, END * 10] {
            assert_eq!(derive_status(&r, now), ReservationStatus::Cancelled);
        }
    }

    #[test]
    fn derivation_is_stable_within_a_window() {
        let r = record(ReservationStatus::Pending);
        assert_eq!(derive_status(&r, 0), derive_status(&r, START - 1));
        assert_eq!(derive_status(&r, START + 5), derive_status(&r, START + 9_000));
        assert_eq!(derive_status(&r, END), derive_status(&r, END * 3));
        assert_eq!(derive_status(&r, START + 5), derive_status(&r, START + 5));
    }

    #[test]
    fn next_wake_follows_state_machine() {
        let r = record(ReservationStatus::Pending);
        assert_eq!(next_wake(&r, ReservationStatus::Pending), Some(START));
        assert_eq!(next_wake(&r, ReservationStatus::Active), Some(END));
        assert_eq!(next_wake(&r, ReservationStatus::Ended), None);
        assert_eq!(next_wake(&r, ReservationStatus::Cancelled), None);
    }
}
