mod error;
mod firing;

pub use error::SchedulerError;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::AbortHandle;
use tracing::{debug, info};

use crate::cache::ReservationCache;
use crate::clock::Clock;
use crate::locks::{KeyGuard, KeyedLocks};
use crate::model::{Ms, ReservationRecord, ReservationStatus};
use crate::store::ReservationStore;

/// One pending wake-up. `generation` is unique per armed timer so a firing
/// can tell whether it is still the live timer of its entry.
struct Timer {
    generation: u64,
    deadline: Ms,
    handle: AbortHandle,
}

impl Timer {
    fn cancel(self) {
        self.handle.abort();
    }
}

/// Bookkeeping for one live reservation.
struct ScheduledEntry {
    /// Source of truth for what the next firing acts on.
    record: ReservationRecord,
    /// Changes on every bookkeeping swap; a firing that persisted against an
    /// older revision must not write its result back.
    revision: u64,
    timer: Option<Timer>,
}

/// Counts a timer task while it is still waiting for its deadline.
struct PendingTimer(Arc<AtomicUsize>);

impl PendingTimer {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::gauge!(crate::observability::TIMERS_PENDING).set(n as f64);
        Self(counter)
    }
}

impl Drop for PendingTimer {
    fn drop(&mut self) {
        let n = self.0.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::gauge!(crate::observability::TIMERS_PENDING).set(n as f64);
    }
}

/// Moves every non-terminal reservation through `PENDING -> ACTIVE -> ENDED`
/// at the instants its window opens and closes.
///
/// Each tracked id owns at most one timer. Every bookkeeping change for an id
/// (`add`, `update`, `add_or_update`, `delete`, and the commit step of a
/// firing) happens under that id's map entry, so "cancel old timer, arm new
/// timer, replace snapshot" is observed as one unit. Timers are tokio tasks;
/// all mutating methods must be called from within a tokio runtime.
///
/// A firing holds the id's reservation lock from reading the snapshot until
/// its store and cache writes are done. Callers that write the same id to the
/// store and cache hold it too (see [`Scheduler::lock_reservation`]), so the
/// last writer wins everywhere, not just in the entry table.
pub struct Scheduler {
    entries: DashMap<String, ScheduledEntry>,
    id_locks: KeyedLocks,
    store: Arc<dyn ReservationStore>,
    cache: Arc<dyn ReservationCache>,
    clock: Arc<dyn Clock>,
    cache_ttl: Duration,
    generations: AtomicU64,
    pending: Arc<AtomicUsize>,
    me: Weak<Scheduler>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        cache: Arc<dyn ReservationCache>,
        clock: Arc<dyn Clock>,
        cache_ttl: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            entries: DashMap::new(),
            id_locks: KeyedLocks::new(),
            store,
            cache,
            clock,
            cache_ttl,
            generations: AtomicU64::new(0),
            pending: Arc::new(AtomicUsize::new(0)),
            me: me.clone(),
        })
    }

    /// Load every `PENDING`/`ACTIVE` record from the store and schedule it.
    /// Call once at startup, before serving traffic.
    pub async fn initialize(&self) -> Result<usize, SchedulerError> {
        let records = self
            .store
            .get_by_statuses(&[ReservationStatus::Pending, ReservationStatus::Active])
            .await
            .map_err(SchedulerError::Load)?;
        let count = records.len();
        for record in records {
            self.add(record);
        }
        info!("restored {count} reservations into the scheduler");
        Ok(count)
    }

    /// Wait until no firing for `id` is persisting, and keep firings out
    /// until the guard is dropped.
    pub async fn lock_reservation(&self, id: &str) -> KeyGuard<'_> {
        self.id_locks.lock(id).await
    }

    /// Track `record` and wake at its start, replacing any entry for the id.
    /// A cancelled record is not tracked.
    pub fn add(&self, record: ReservationRecord) {
        self.upsert(record, "added");
    }

    /// Replace the tracked snapshot and re-arm at its start, whatever its
    /// status. A cancelled record stops being tracked. Returns false when the
    /// id is not tracked, in which case nothing happens.
    pub fn update(&self, record: ReservationRecord) -> bool {
        if record.status == ReservationStatus::Cancelled {
            return self.delete(&record.id);
        }
        match self.entries.get_mut(&record.id) {
            Some(mut slot) => {
                debug!("reservation {} updated, next wake at {}", record.id, record.start);
                self.install(&mut slot, record);
                true
            }
            None => {
                debug!("update for untracked reservation {} ignored", record.id);
                false
            }
        }
    }

    /// `add` when the id is untracked, `update` otherwise.
    pub fn add_or_update(&self, record: ReservationRecord) {
        self.upsert(record, "scheduled");
    }

    /// Stop tracking `id` and cancel its timer. Returns false if it was not
    /// tracked.
    pub fn delete(&self, id: &str) -> bool {
        let removed = self.entries.remove(id);
        metrics::gauge!(crate::observability::ENTRIES_TRACKED).set(self.entries.len() as f64);
        match removed {
            Some((_, entry)) => {
                if let Some(timer) = entry.timer {
                    timer.cancel();
                }
                debug!("reservation {id} no longer scheduled");
                true
            }
            None => {
                debug!("delete for untracked reservation {id} ignored");
                false
            }
        }
    }

    /// Snapshot currently tracked for `id`.
    pub fn get(&self, id: &str) -> Option<ReservationRecord> {
        self.entries.get(id).map(|e| e.record.clone())
    }

    /// Deadline of the timer currently armed for `id`.
    pub fn next_wake(&self, id: &str) -> Option<Ms> {
        self.entries
            .get(id)
            .and_then(|e| e.timer.as_ref().map(|t| t.deadline))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Timer tasks still sleeping towards their deadline.
    pub fn pending_timers(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Drop every entry and cancel every timer.
    pub fn shutdown(&self) {
        let ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.delete(&id);
        }
    }

    fn upsert(&self, record: ReservationRecord, verb: &str) {
        if record.status == ReservationStatus::Cancelled {
            self.delete(&record.id);
            return;
        }
        debug!("reservation {} {verb}, next wake at {}", record.id, record.start);
        match self.entries.entry(record.id.clone()) {
            Entry::Occupied(mut slot) => self.install(slot.get_mut(), record),
            Entry::Vacant(slot) => {
                let mut slot = slot.insert(ScheduledEntry {
                    record: record.clone(),
                    revision: 0,
                    timer: None,
                });
                self.install(&mut slot, record);
            }
        }
        metrics::gauge!(crate::observability::ENTRIES_TRACKED).set(self.entries.len() as f64);
    }

    /// Swap in a new snapshot and re-arm at its start. Caller holds the entry.
    fn install(&self, slot: &mut ScheduledEntry, record: ReservationRecord) {
        let deadline = record.start;
        slot.record = record;
        slot.revision = self.next_generation();
        self.arm(slot, deadline);
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Cancel the entry's timer, if any, and arm a new one for `deadline`.
    /// A deadline in the past fires as soon as the runtime gets to it.
    fn arm(&self, slot: &mut ScheduledEntry, deadline: Ms) {
        if let Some(old) = slot.timer.take() {
            old.cancel();
        }

        let generation = self.next_generation();
        let delay = Duration::from_millis((deadline - self.clock.now_ms()).max(0) as u64);
        let id = slot.record.id.clone();
        let me = self.me.clone();
        let pending = PendingTimer::new(self.pending.clone());

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            drop(pending);
            let Some(scheduler) = me.upgrade() else {
                return;
            };
            if let Err(e) = scheduler.fire(&id, generation).await {
                debug!("timer for {id} left status stale: {e}");
            }
        })
        .abort_handle();

        slot.timer = Some(Timer {
            generation,
            deadline,
            handle,
        });
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for entry in self.entries.iter() {
            if let Some(timer) = &entry.timer {
                timer.handle.abort();
            }
        }
    }
}
