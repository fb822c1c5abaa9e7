use async_trait::async_trait;
use dashmap::DashMap;

use crate::model::{ReservationRecord, ReservationStatus, Span};

use super::{ReservationStore, StoreError};

/// `DashMap`-backed store. Also the index behind [`super::WalStore`].
pub struct InMemoryStore {
    records: DashMap<String, ReservationRecord>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<ReservationRecord> {
        self.records.get(id).map(|e| e.value().clone())
    }

    pub fn put(&self, record: ReservationRecord) {
        self.records.insert(record.id.clone(), record);
    }

    pub fn remove(&self, id: &str) -> Option<ReservationRecord> {
        self.records.remove(id).map(|(_, r)| r)
    }

    pub fn snapshot(&self) -> Vec<ReservationRecord> {
        self.records.iter().map(|e| e.value().clone()).collect()
    }

    fn collect(&self, keep: impl Fn(&ReservationRecord) -> bool) -> Vec<ReservationRecord> {
        let mut out: Vec<ReservationRecord> = self
            .records
            .iter()
            .filter(|e| keep(e.value()))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|r| r.start);
        out
    }

    /// Fail with `NotFound` for the first unknown id.
    pub(super) fn ensure_all_exist(&self, records: &[ReservationRecord]) -> Result<(), StoreError> {
        match records.iter().find(|r| !self.records.contains_key(&r.id)) {
            Some(missing) => Err(StoreError::NotFound(missing.id.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ReservationStore for InMemoryStore {
    async fn get_by_statuses(
        &self,
        statuses: &[ReservationStatus],
    ) -> Result<Vec<ReservationRecord>, StoreError> {
        Ok(self.collect(|r| statuses.contains(&r.status)))
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<ReservationRecord>, StoreError> {
        Ok(self.get(id))
    }

    async fn get_by_user(&self, user_id: &str) -> Result<Vec<ReservationRecord>, StoreError> {
        Ok(self.collect(|r| r.user_id == user_id))
    }

    async fn get_by_room_in_range(
        &self,
        room_id: &str,
        span: Span,
    ) -> Result<Vec<ReservationRecord>, StoreError> {
        Ok(self.collect(|r| r.room_id == room_id && r.span().overlaps(&span)))
    }

    async fn get_in_range(&self, span: Span) -> Result<Vec<ReservationRecord>, StoreError> {
        Ok(self.collect(|r| r.span().overlaps(&span)))
    }

    async fn add_or_update(&self, record: &ReservationRecord) -> Result<(), StoreError> {
        self.put(record.clone());
        Ok(())
    }

    async fn update(&self, record: &ReservationRecord) -> Result<(), StoreError> {
        match self.records.get_mut(&record.id) {
            Some(mut existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(record.id.clone())),
        }
    }

    async fn batch_update(&self, records: &[ReservationRecord]) -> Result<(), StoreError> {
        self.ensure_all_exist(records)?;
        for record in records {
            self.put(record.clone());
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.remove(id);
        Ok(())
    }
}
