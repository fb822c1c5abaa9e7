use crate::model::ReservationStatus;
use crate::store::StoreError;

#[derive(Debug)]
pub enum SchedulerError {
    /// Startup load of live reservations failed.
    Load(StoreError),
    /// A timer's status transition could not be persisted. The tracked
    /// snapshot keeps `from` until the next sweep retries.
    Persistence {
        id: String,
        from: ReservationStatus,
        to: ReservationStatus,
        source: StoreError,
    },
    /// A sweep's batch write failed; nothing was applied.
    Sweep { changed: usize, source: StoreError },
}

impl std::fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerError::Load(e) => write!(f, "failed to load live reservations: {e}"),
            SchedulerError::Persistence { id, from, to, source } => {
                write!(f, "failed to persist {id} {from} -> {to}: {source}")
            }
            SchedulerError::Sweep { changed, source } => {
                write!(f, "sweep failed to persist {changed} transitions: {source}")
            }
        }
    }
}

impl std::error::Error for SchedulerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SchedulerError::Load(e) => Some(e),
            SchedulerError::Persistence { source, .. } | SchedulerError::Sweep { source, .. } => {
                Some(source)
            }
        }
    }
}
