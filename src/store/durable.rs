use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::model::{ReservationRecord, ReservationStatus, Span};
use crate::wal::{EventBatch, ReservationLog, StoreEvent};

use super::{InMemoryStore, ReservationStore, StoreError};

fn apply_event(index: &InMemoryStore, event: &StoreEvent) {
    match event {
        StoreEvent::Upserted(record) => index.put(record.clone()),
        StoreEvent::Deleted { id } => {
            index.remove(id);
        }
    }
}

// ── Group-commit log channel ─────────────────────────────

enum LogCommand {
    Append {
        events: Vec<StoreEvent>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        response: oneshot::Sender<io::Result<()>>,
    },
    FramesSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Vec<StoreEvent>, oneshot::Sender<io::Result<()>>);

/// Background task that owns the log and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain all immediately available Appends (the batch window).
/// 3. Encode each Append on its own; one that cannot be encoded fails alone.
/// 4. One synced write for the rest, then apply them to the index in log
///    order and respond.
///
/// The index is only written here, so its contents always match the log order.
async fn log_writer_loop(
    mut log: ReservationLog,
    index: Arc<InMemoryStore>,
    mut rx: mpsc::Receiver<LogCommand>,
) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            LogCommand::Append { events, response } => {
                let mut batch = vec![(events, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(LogCommand::Append { events, response }) => {
                            batch.push((events, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty, commit batch
                    }
                }

                commit_batch(&mut log, &index, batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut log, &index, other);
                }
            }
            other => handle_non_append(&mut log, &index, other),
        }
    }
}

fn commit_batch(log: &mut ReservationLog, index: &InMemoryStore, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);

    let mut encoded = Vec::with_capacity(batch.len());
    let mut waiting = Vec::with_capacity(batch.len());
    for (events, tx) in batch {
        match EventBatch::encode(&events) {
            Ok(frames) => {
                encoded.push(frames);
                waiting.push((events, tx));
            }
            Err(e) => {
                warn!("refusing to log {} events: {e}", events.len());
                let _ = tx.send(Err(e));
            }
        }
    }
    if encoded.is_empty() {
        return;
    }

    let flush_start = std::time::Instant::now();
    let result = log.commit(&encoded);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    if result.is_ok() {
        for (events, _) in &waiting {
            for event in events {
                apply_event(index, event);
            }
        }
    }
    for (_, tx) in waiting {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(log: &mut ReservationLog, index: &InMemoryStore, cmd: LogCommand) {
    match cmd {
        LogCommand::Compact { response } => {
            let mut records = index.snapshot();
            records.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));
            let _ = response.send(log.rewrite(&records));
        }
        LogCommand::FramesSinceCompact { response } => {
            let _ = response.send(log.frames_since_rewrite());
        }
        LogCommand::Append { events, response } => {
            commit_batch(log, index, vec![(events, response)]);
        }
    }
}

/// Durable store: an in-memory index rebuilt from an append-only log on open.
/// Writes are acknowledged only after their batch is fsynced.
pub struct WalStore {
    index: Arc<InMemoryStore>,
    log_tx: mpsc::Sender<LogCommand>,
}

impl WalStore {
    /// Replay the log at `path` and start the writer task. Must run inside a
    /// tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let (log, replay) = ReservationLog::open(path)?;
        if replay.discarded > 0 {
            warn!(
                "dropped {} bytes of torn tail from {}",
                replay.discarded,
                path.display()
            );
        }
        let index = Arc::new(InMemoryStore::new());
        for event in &replay.events {
            apply_event(&index, event);
        }
        let (log_tx, log_rx) = mpsc::channel(4096);
        tokio::spawn(log_writer_loop(log, index.clone(), log_rx));
        tracing::info!(
            "opened reservation log {} ({} events, {} records)",
            path.display(),
            replay.events.len(),
            index.len()
        );
        Ok(Self { index, log_tx })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    async fn append(&self, events: Vec<StoreEvent>) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.log_tx
            .send(LogCommand::Append {
                events,
                response: tx,
            })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))
    }

    /// Rewrite the log with one entry per stored record.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.log_tx
            .send(LogCommand::Compact { response: tx })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))
    }

    /// Log frames a compaction would fold, counting those replayed on open.
    pub async fn frames_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .log_tx
            .send(LogCommand::FramesSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl ReservationStore for WalStore {
    async fn get_by_statuses(
        &self,
        statuses: &[ReservationStatus],
    ) -> Result<Vec<ReservationRecord>, StoreError> {
        self.index.get_by_statuses(statuses).await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<ReservationRecord>, StoreError> {
        Ok(self.index.get(id))
    }

    async fn get_by_user(&self, user_id: &str) -> Result<Vec<ReservationRecord>, StoreError> {
        self.index.get_by_user(user_id).await
    }

    async fn get_by_room_in_range(
        &self,
        room_id: &str,
        span: Span,
    ) -> Result<Vec<ReservationRecord>, StoreError> {
        self.index.get_by_room_in_range(room_id, span).await
    }

    async fn get_in_range(&self, span: Span) -> Result<Vec<ReservationRecord>, StoreError> {
        self.index.get_in_range(span).await
    }

    async fn add_or_update(&self, record: &ReservationRecord) -> Result<(), StoreError> {
        self.append(vec![StoreEvent::Upserted(record.clone())]).await
    }

    async fn update(&self, record: &ReservationRecord) -> Result<(), StoreError> {
        if !self.index.contains(&record.id) {
            return Err(StoreError::NotFound(record.id.clone()));
        }
        self.append(vec![StoreEvent::Upserted(record.clone())]).await
    }

    async fn batch_update(&self, records: &[ReservationRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        self.index.ensure_all_exist(records)?;
        let events = records.iter().cloned().map(StoreEvent::Upserted).collect();
        self.append(events).await
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        if !self.index.contains(id) {
            return Ok(());
        }
        self.append(vec![StoreEvent::Deleted { id: id.to_string() }]).await
    }
}
