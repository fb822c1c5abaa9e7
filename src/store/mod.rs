mod durable;
mod error;
mod memory;

pub use crate::wal::StoreEvent;
pub use durable::WalStore;
pub use error::StoreError;
pub use memory::InMemoryStore;

use async_trait::async_trait;

use crate::model::{ReservationRecord, ReservationStatus, Span};

/// Durable home of reservation records. The scheduler only reads
/// `get_by_statuses` at startup and writes status changes through
/// `update`/`batch_update`; the booking flow uses the rest.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn get_by_statuses(
        &self,
        statuses: &[ReservationStatus],
    ) -> Result<Vec<ReservationRecord>, StoreError>;

    async fn get_by_id(&self, id: &str) -> Result<Option<ReservationRecord>, StoreError>;

    /// Every record booked by `user_id`, earliest start first.
    async fn get_by_user(&self, user_id: &str) -> Result<Vec<ReservationRecord>, StoreError>;

    /// Records of `room_id` whose window overlaps `span`.
    async fn get_by_room_in_range(
        &self,
        room_id: &str,
        span: Span,
    ) -> Result<Vec<ReservationRecord>, StoreError>;

    /// Records whose window overlaps `span`.
    async fn get_in_range(&self, span: Span) -> Result<Vec<ReservationRecord>, StoreError>;

    async fn add_or_update(&self, record: &ReservationRecord) -> Result<(), StoreError>;

    /// Overwrite an existing record. `NotFound` if the id is unknown.
    async fn update(&self, record: &ReservationRecord) -> Result<(), StoreError>;

    /// All-or-nothing `update` of several records.
    async fn batch_update(&self, records: &[ReservationRecord]) -> Result<(), StoreError>;

    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}
