use std::collections::HashMap;

use dashmap::mapref::entry::Entry;
use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::cache::day_bucket_key;
use crate::model::{ReservationRecord, ReservationStatus};
use crate::status::{derive_status, next_wake};

use super::{Scheduler, SchedulerError};

impl Scheduler {
    /// Firing protocol for the timer `generation` of `id`.
    ///
    /// 1. Take the reservation lock, then re-read the current entry; a
    ///    removed entry makes this a no-op.
    /// 2. Derive the status for now. A change is persisted first; on failure
    ///    the snapshot is left as it was and the error is returned.
    /// 3. Write the new status back (unless the entry was swapped meanwhile)
    ///    and arm the next wake-up, or evict once nothing is left to do.
    /// 4. Reflect the change in the day-bucket cache, but only if step 3
    ///    went through. A firing that lost to a newer snapshot writes nothing
    ///    else.
    ///
    /// A stale timer (one that lost a race with `update`) still acts on the
    /// current snapshot, so it can never apply a superseded window.
    pub(crate) async fn fire(
        &self,
        id: &str,
        generation: u64,
    ) -> Result<Option<ReservationStatus>, SchedulerError> {
        let _held = self.id_locks.lock(id).await;
        let now = self.clock.now_ms();
        let (snapshot, revision, live) = {
            let Some(mut slot) = self.entries.get_mut(id) else {
                debug!("timer for {id} fired after the reservation was unscheduled");
                metrics::counter!(crate::observability::STALE_FIRINGS_TOTAL).increment(1);
                return Ok(None);
            };
            let live = slot
                .timer
                .as_ref()
                .is_some_and(|t| t.generation == generation);
            if live {
                // This firing is the live timer; nothing is pending any more.
                slot.timer = None;
            }
            (slot.record.clone(), slot.revision, live)
        };

        let from = snapshot.status;
        let to = derive_status(&snapshot, now);
        if to == from && !live {
            debug!("stale timer for {id} found nothing to do");
            metrics::counter!(crate::observability::STALE_FIRINGS_TOTAL).increment(1);
            return Ok(None);
        }

        let mut updated = snapshot;
        updated.status = to;
        if to != from {
            if let Err(source) = self.store.update(&updated).await {
                error!("failed to persist reservation {id} {from} -> {to}: {source}");
                metrics::counter!(crate::observability::PERSIST_FAILURES_TOTAL).increment(1);
                return Err(SchedulerError::Persistence {
                    id: id.to_string(),
                    from,
                    to,
                    source,
                });
            }
            info!("reservation {id}: {from} -> {to}");
            metrics::counter!(crate::observability::TRANSITIONS_TOTAL, "status" => to.label())
                .increment(1);
        }

        if !self.commit(id, revision, &updated) {
            debug!("reservation {id} was rescheduled while its firing was persisting");
            return Ok(None);
        }
        if to != from {
            self.sync_cache(&updated).await;
        }
        Ok(Some(to))
    }

    /// Reconciliation sweep: re-derive every tracked entry, persist all
    /// changes in one batch, and re-arm entries left without a timer by an
    /// earlier failure. Returns the number of records whose status changed.
    ///
    /// Every id the sweep touches is locked for the whole pass, so the sweep
    /// and a firing or booking of the same id never interleave.
    pub async fn refresh(&self) -> Result<usize, SchedulerError> {
        let started = std::time::Instant::now();

        let due: Vec<String> = {
            let now = self.clock.now_ms();
            self.entries
                .iter()
                .filter(|slot| slot.timer.is_none() || derive_status(&slot.record, now) != slot.record.status)
                .map(|slot| slot.key().clone())
                .collect()
        };
        if due.is_empty() {
            metrics::histogram!(crate::observability::SWEEP_DURATION_SECONDS)
                .record(started.elapsed().as_secs_f64());
            return Ok(0);
        }
        let _held = self.id_locks.lock_all(&due).await;

        let now = self.clock.now_ms();
        let mut changed: Vec<(u64, ReservationRecord)> = Vec::new();
        let mut idle: Vec<(u64, ReservationRecord)> = Vec::new();
        for id in &due {
            let Some(slot) = self.entries.get(id) else {
                continue;
            };
            let to = derive_status(&slot.record, now);
            if to != slot.record.status {
                let mut record = slot.record.clone();
                record.status = to;
                changed.push((slot.revision, record));
            } else if slot.timer.is_none() {
                idle.push((slot.revision, slot.record.clone()));
            }
        }

        if !changed.is_empty() {
            let records: Vec<ReservationRecord> = changed.iter().map(|(_, r)| r.clone()).collect();
            if let Err(source) = self.store.batch_update(&records).await {
                error!("sweep failed to persist {} transitions: {source}", records.len());
                metrics::counter!(crate::observability::PERSIST_FAILURES_TOTAL).increment(1);
                return Err(SchedulerError::Sweep {
                    changed: records.len(),
                    source,
                });
            }
        }

        let mut by_day: HashMap<String, Vec<ReservationRecord>> = HashMap::new();
        let mut applied = 0;
        for (revision, record) in &changed {
            if !self.commit(&record.id, *revision, record) {
                debug!("reservation {} was rescheduled during the sweep", record.id);
                continue;
            }
            applied += 1;
            info!("reservation {}: reconciled to {}", record.id, record.status);
            metrics::counter!(crate::observability::TRANSITIONS_TOTAL, "status" => record.status.label())
                .increment(1);
            match day_bucket_key(record.start) {
                Some(key) => by_day.entry(key).or_default().push(record.clone()),
                None => warn!("no day bucket for reservation {}", record.id),
            }
        }
        for (revision, record) in &idle {
            self.commit(&record.id, *revision, record);
        }

        let results = join_all(
            by_day
                .iter()
                .map(|(key, records)| self.cache.upsert_many(key, records, self.cache_ttl)),
        )
        .await;
        for e in results.into_iter().filter_map(Result::err) {
            warn!("sweep cache update failed: {e}");
        }

        metrics::histogram!(crate::observability::SWEEP_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        Ok(applied)
    }

    /// Write `record.status` back into the entry and arm the next wake-up, or
    /// evict the entry once its status is terminal. Skipped (returns false)
    /// when the entry was removed or swapped since `revision` was read.
    fn commit(&self, id: &str, revision: u64, record: &ReservationRecord) -> bool {
        let committed = match self.entries.entry(id.to_string()) {
            Entry::Occupied(mut slot) if slot.get().revision == revision => {
                match next_wake(record, record.status) {
                    Some(deadline) => {
                        let entry = slot.get_mut();
                        entry.record.status = record.status;
                        entry.revision = self.next_generation();
                        self.arm(entry, deadline);
                    }
                    None => {
                        let (_, entry) = slot.remove_entry();
                        if let Some(timer) = entry.timer {
                            timer.cancel();
                        }
                        debug!("reservation {id} reached {} and is no longer scheduled", record.status);
                    }
                }
                true
            }
            _ => false,
        };
        // Entry lock is released here; `len` needs every shard.
        metrics::gauge!(crate::observability::ENTRIES_TRACKED).set(self.entries.len() as f64);
        committed
    }

    async fn sync_cache(&self, record: &ReservationRecord) {
        let Some(key) = day_bucket_key(record.start) else {
            warn!("no day bucket for reservation {}", record.id);
            return;
        };
        if let Err(e) = self.cache.upsert(&key, record, self.cache_ttl).await {
            warn!("cache update for reservation {} failed: {e}", record.id);
        }
    }
}
