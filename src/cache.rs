use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};
use dashmap::DashMap;

use crate::clock::Clock;
use crate::model::{Ms, ReservationRecord, Span};

/// Default lifetime of a day bucket.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_millis(86_400_000);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    Unavailable(String),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::Unavailable(e) => write!(f, "cache unavailable: {e}"),
        }
    }
}

impl std::error::Error for CacheError {}

/// Keyed set-per-key store of reservations. Records inside a set are
/// identified by `id`.
#[async_trait]
pub trait ReservationCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<ReservationRecord>>, CacheError>;

    /// Replace the whole set at `key`.
    async fn put(
        &self,
        key: &str,
        records: Vec<ReservationRecord>,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    /// Replace the record with the same id in the set at `key`, or add it.
    async fn upsert(
        &self,
        key: &str,
        record: &ReservationRecord,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    async fn upsert_many(
        &self,
        key: &str,
        records: &[ReservationRecord],
        ttl: Duration,
    ) -> Result<(), CacheError> {
        for record in records {
            self.upsert(key, record, ttl).await?;
        }
        Ok(())
    }
}

struct Bucket {
    records: Vec<ReservationRecord>,
    expires_at: Ms,
}

/// In-process cache with per-key expiry.
///
/// An upsert into a key with no live set is skipped rather than creating a
/// one-record set: a bucket is always either a full load from the store or
/// absent.
pub struct InMemoryCache {
    buckets: DashMap<String, Bucket>,
    clock: Arc<dyn Clock>,
}

impl InMemoryCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: DashMap::new(),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    fn expiry(&self, ttl: Duration) -> Ms {
        self.clock.now_ms().saturating_add(ttl.as_millis() as Ms)
    }
}

#[async_trait]
impl ReservationCache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<ReservationRecord>>, CacheError> {
        let now = self.clock.now_ms();
        let expired = match self.buckets.get(key) {
            None => return Ok(None),
            Some(bucket) if bucket.expires_at > now => return Ok(Some(bucket.records.clone())),
            Some(_) => true,
        };
        if expired {
            self.buckets.remove_if(key, |_, b| b.expires_at <= now);
        }
        Ok(None)
    }

    async fn put(
        &self,
        key: &str,
        records: Vec<ReservationRecord>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let expires_at = self.expiry(ttl);
        self.buckets.insert(key.to_string(), Bucket { records, expires_at });
        Ok(())
    }

    async fn upsert(
        &self,
        key: &str,
        record: &ReservationRecord,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let now = self.clock.now_ms();
        let Some(mut bucket) = self.buckets.get_mut(key) else {
            return Ok(());
        };
        if bucket.expires_at <= now {
            return Ok(());
        }
        match bucket.records.iter_mut().find(|r| r.same_reservation(record)) {
            Some(existing) => *existing = record.clone(),
            None => bucket.records.push(record.clone()),
        }
        bucket.expires_at = self.expiry(ttl);
        Ok(())
    }
}

// ── Day buckets ──────────────────────────────────────────

fn local_millis<Tz: TimeZone>(naive: NaiveDateTime, tz: &Tz) -> Ms {
    naive
        .and_local_timezone(tz.clone())
        .earliest()
        .map(|dt| dt.timestamp_millis())
        // Midnight skipped by a DST jump: fall back to the UTC reading.
        .unwrap_or_else(|| naive.and_utc().timestamp_millis())
}

fn calendar_day<Tz: TimeZone>(ms: Ms, tz: &Tz) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(ms).map(|utc| utc.with_timezone(tz).date_naive())
}

/// Cache key of the calendar day containing `ms` in `tz`:
/// `"{00:00:00 millis}_{23:59:59 millis}"`.
pub fn day_bucket_key_in<Tz: TimeZone>(ms: Ms, tz: &Tz) -> Option<String> {
    let day = calendar_day(ms, tz)?;
    let first = local_millis(day.and_hms_opt(0, 0, 0)?, tz);
    let last = local_millis(day.and_hms_opt(23, 59, 59)?, tz);
    Some(format!("{first}_{last}"))
}

/// [`day_bucket_key_in`] for the process's local time zone.
pub fn day_bucket_key(ms: Ms) -> Option<String> {
    day_bucket_key_in(ms, &Local)
}

/// Store range covering the calendar day containing `ms`: `[00:00, next 00:00)`.
pub fn day_span_in<Tz: TimeZone>(ms: Ms, tz: &Tz) -> Option<Span> {
    let day = calendar_day(ms, tz)?;
    let next = day.succ_opt()?;
    Some(Span::new(
        local_millis(day.and_hms_opt(0, 0, 0)?, tz),
        local_millis(next.and_hms_opt(0, 0, 0)?, tz),
    ))
}

pub fn day_span(ms: Ms) -> Option<Span> {
    day_span_in(ms, &Local)
}
