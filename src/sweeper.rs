use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::scheduler::Scheduler;
use crate::store::{StoreError, WalStore};

/// Background task that periodically re-derives every tracked reservation,
/// picking up transitions whose persistence failed.
pub async fn run_sweeper(scheduler: Arc<Scheduler>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    // The first tick completes immediately; initialize() just ran.
    interval.tick().await;
    loop {
        interval.tick().await;
        match scheduler.refresh().await {
            Ok(0) => debug!("sweep: nothing to reconcile"),
            Ok(n) => info!("sweep reconciled {n} reservations"),
            Err(e) => warn!("sweep failed, retrying next round: {e}"),
        }
    }
}

/// Background task that rewrites the reservation log once `threshold`
/// frames have accumulated since the last compaction.
pub async fn run_compactor(store: Arc<WalStore>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_due(&store, threshold).await {
            error!("log compaction failed: {e}");
        }
    }
}

/// Compact when due. Returns whether a compaction ran.
pub async fn compact_if_due(store: &WalStore, threshold: u64) -> Result<bool, StoreError> {
    let frames = store.frames_since_compact().await;
    if frames < threshold {
        return Ok(false);
    }
    store.compact().await?;
    info!("compacted reservation log after {frames} frames ({} records)", store.len());
    Ok(true)
}
