mod error;
mod validate;

pub use error::{ServiceError, ValidationError};

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::cache::{ReservationCache, day_bucket_key, day_span};
use crate::clock::Clock;
use crate::locks::KeyedLocks;
use crate::model::{Ms, ReservationRecord, ReservationRequest, ReservationStatus, display_order};
use crate::scheduler::{Scheduler, SchedulerError};
use crate::status::derive_status;
use crate::store::ReservationStore;

use validate::{check_no_conflict, validate_request};

/// Booking flow on top of the scheduler: validates requests, then fans each
/// accepted record out to the scheduler, the store and the day-bucket cache,
/// in that order.
///
/// A booking holds its room's lock from the overlap check until its writes
/// are done, and every write of an id happens under the scheduler's lock for
/// that id. Locks are always taken room first, then id.
pub struct ReservationService {
    scheduler: Arc<Scheduler>,
    room_locks: KeyedLocks,
    store: Arc<dyn ReservationStore>,
    cache: Arc<dyn ReservationCache>,
    clock: Arc<dyn Clock>,
    cache_ttl: Duration,
}

impl ReservationService {
    pub fn new(
        scheduler: Arc<Scheduler>,
        store: Arc<dyn ReservationStore>,
        cache: Arc<dyn ReservationCache>,
        clock: Arc<dyn Clock>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            scheduler,
            room_locks: KeyedLocks::new(),
            store,
            cache,
            clock,
            cache_ttl,
        }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Restore live reservations from the store into the scheduler.
    pub async fn initialize(&self) -> Result<usize, SchedulerError> {
        self.scheduler.initialize().await
    }

    /// Book, move, or cancel a reservation.
    ///
    /// Anything but a cancellation is validated first: user and room present,
    /// start at least a minute ahead, a non-empty window, and no overlap with
    /// another live reservation of the same room. A request without an id
    /// books a new reservation. The stored status of a booking is derived
    /// from its window; only `CANCELLED` is taken from the request.
    pub async fn reserve(
        &self,
        request: ReservationRequest,
    ) -> Result<ReservationRecord, ServiceError> {
        if request.status == ReservationStatus::Cancelled {
            return self.cancel_request(request).await;
        }

        validate_request(&request, self.clock.now_ms()).map_err(|e| self.rejected(e))?;
        let id = request.id.clone().unwrap_or_else(new_id);
        let _room = self.room_locks.lock(&request.room_id).await;
        let _held = self.scheduler.lock_reservation(&id).await;

        let now = self.clock.now_ms();
        let created_at = self
            .store
            .get_by_id(&id)
            .await?
            .map_or(now, |r| r.created_at);
        let mut record = request.into_record(id, created_at);
        record.status = derive_status(&record, now);
        let others = self
            .store
            .get_by_room_in_range(&record.room_id, record.span())
            .await?;
        check_no_conflict(&record, &others).map_err(|e| self.rejected(e))?;

        self.apply(&record).await?;
        info!(
            "reservation {} for room {} [{}, {}) is {}",
            record.id, record.room_id, record.start, record.end, record.status
        );
        Ok(record)
    }

    /// Cancel the stored record for the request's id, or store the request
    /// as a cancelled record when there is none.
    async fn cancel_request(
        &self,
        request: ReservationRequest,
    ) -> Result<ReservationRecord, ServiceError> {
        let id = request.id.clone().unwrap_or_else(new_id);
        let _held = self.scheduler.lock_reservation(&id).await;
        let record = match self.store.get_by_id(&id).await? {
            Some(mut stored) => {
                stored.status = ReservationStatus::Cancelled;
                stored
            }
            None => request.into_record(id, self.clock.now_ms()),
        };

        self.apply(&record).await?;
        info!("reservation {} for room {} cancelled", record.id, record.room_id);
        Ok(record)
    }

    /// Cancel a stored reservation, keeping everything but its status.
    pub async fn cancel(&self, id: &str) -> Result<ReservationRecord, ServiceError> {
        let Some(stored) = self.store.get_by_id(id).await? else {
            return Err(ServiceError::NotFound(id.to_string()));
        };
        self.reserve(ReservationRequest {
            id: Some(stored.id),
            room_id: stored.room_id,
            user_id: stored.user_id,
            start: stored.start,
            end: stored.end,
            status: ReservationStatus::Cancelled,
            comments: stored.comments,
            ip: stored.ip,
        })
        .await
    }

    /// All reservations starting on the local calendar day containing `ms`,
    /// live ones first. Served from the day bucket when it is cached, else
    /// loaded from the store and cached.
    pub async fn reservations_for_day(&self, ms: Ms) -> Result<Vec<ReservationRecord>, ServiceError> {
        let (Some(key), Some(day)) = (day_bucket_key(ms), day_span(ms)) else {
            return Err(ValidationError::InvalidDay(ms).into());
        };

        match self.cache.get(&key).await {
            Ok(Some(mut records)) => {
                records.sort_by(display_order);
                return Ok(records);
            }
            Ok(None) => debug!("day bucket {key} not cached"),
            Err(e) => warn!("day bucket {key} unreadable, using store: {e}"),
        }

        let mut records: Vec<ReservationRecord> = self
            .store
            .get_in_range(day)
            .await?
            .into_iter()
            .filter(|r| day.contains_instant(r.start))
            .collect();
        if let Err(e) = self.cache.put(&key, records.clone(), self.cache_ttl).await {
            warn!("failed to cache day bucket {key}: {e}");
        }
        records.sort_by(display_order);
        Ok(records)
    }

    /// Every reservation booked by `user_id`, live ones first. Always read
    /// from the store.
    pub async fn reservations_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ReservationRecord>, ServiceError> {
        let mut records = self.store.get_by_user(user_id).await?;
        records.sort_by(display_order);
        Ok(records)
    }

    /// Scheduler first, then the store, then the cache. A store failure is
    /// returned only after the cache has been tried. Caller holds the
    /// record's reservation lock.
    async fn apply(&self, record: &ReservationRecord) -> Result<(), ServiceError> {
        self.scheduler.add_or_update(record.clone());

        let persisted = self.store.add_or_update(record).await;
        if let Err(e) = &persisted {
            error!("failed to store reservation {}: {e}", record.id);
        }

        match day_bucket_key(record.start) {
            Some(key) => {
                if let Err(e) = self.cache.upsert(&key, record, self.cache_ttl).await {
                    warn!("cache update for reservation {} failed: {e}", record.id);
                }
            }
            None => warn!("no day bucket for reservation {}", record.id),
        }

        persisted.map_err(ServiceError::Persistence)
    }

    fn rejected(&self, e: ValidationError) -> ServiceError {
        warn!("reservation rejected: {e}");
        metrics::counter!(crate::observability::RESERVATIONS_REJECTED_TOTAL, "reason" => e.reason())
            .increment(1);
        e.into()
    }
}

fn new_id() -> String {
    Ulid::new().to_string()
}
