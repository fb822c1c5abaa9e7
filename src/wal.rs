//! Append-only log of reservation changes behind [`crate::store::WalStore`].
//!
//! Frame layout: `[u32 le: payload len][bincode StoreEvent][u32 le: crc32 of payload]`.
//! A scan stops at the first frame that is short, fails its checksum, or does
//! not decode. Everything from that point on is a torn tail and is cut off
//! when the log is opened for writing, so new frames never land behind
//! garbage.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::model::ReservationRecord;

const LEN_BYTES: usize = 4;
const CRC_BYTES: usize = 4;

/// One durable change to the reservation table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreEvent {
    Upserted(ReservationRecord),
    Deleted { id: String },
}

impl StoreEvent {
    pub fn id(&self) -> &str {
        match self {
            StoreEvent::Upserted(record) => &record.id,
            StoreEvent::Deleted { id } => id,
        }
    }
}

/// What a scan of the log recovered.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<StoreEvent>,
    /// Length of the prefix made of whole, valid frames.
    pub valid_len: u64,
    /// Bytes after `valid_len` that were ignored.
    pub discarded: u64,
}

/// The events of one store call, framed up front. Encoding can fail for one
/// call without touching the others committed alongside it.
pub struct EventBatch {
    bytes: Vec<u8>,
    events: usize,
}

impl EventBatch {
    pub fn encode(events: &[StoreEvent]) -> io::Result<Self> {
        let mut bytes = Vec::new();
        for event in events {
            frame_into(&mut bytes, event)?;
        }
        Ok(Self {
            bytes,
            events: events.len(),
        })
    }
}

fn frame_into(out: &mut Vec<u8>, event: &StoreEvent) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("event for reservation {} is too large to log", event.id()),
        )
    })?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(())
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let raw = bytes.get(at..at.checked_add(LEN_BYTES)?)?;
    Some(u32::from_le_bytes(raw.try_into().ok()?))
}

/// Decode the frame at `at`, returning the event and the offset just past it.
fn decode_at(bytes: &[u8], at: usize) -> Option<(StoreEvent, usize)> {
    let len = read_u32(bytes, at)? as usize;
    let body = at.checked_add(LEN_BYTES)?;
    let crc_at = body.checked_add(len)?;
    let payload = bytes.get(body..crc_at)?;
    if read_u32(bytes, crc_at)? != crc32fast::hash(payload) {
        return None;
    }
    let event = bincode::deserialize(payload).ok()?;
    Some((event, crc_at + CRC_BYTES))
}

fn scan(bytes: &[u8]) -> Replay {
    let mut events = Vec::new();
    let mut at = 0;
    while let Some((event, next)) = decode_at(bytes, at) {
        events.push(event);
        at = next;
    }
    Replay {
        events,
        valid_len: at as u64,
        discarded: (bytes.len() - at) as u64,
    }
}

/// Writer side of the log. Owned by a single task; every commit is synced
/// before it returns.
pub struct ReservationLog {
    file: File,
    path: PathBuf,
    /// Bytes of whole frames on disk.
    len: u64,
    frames_since_rewrite: u64,
}

impl ReservationLog {
    /// Scan the log at `path`, cut off any torn tail, and open it for
    /// appending. Creates an empty log if there is none.
    pub fn open(path: &Path) -> io::Result<(Self, Replay)> {
        let replay = Self::read(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if replay.discarded > 0 {
            file.set_len(replay.valid_len)?;
            file.sync_all()?;
        }
        let log = Self {
            file,
            path: path.to_path_buf(),
            len: replay.valid_len,
            frames_since_rewrite: replay.events.len() as u64,
        };
        Ok((log, replay))
    }

    /// Scan the log at `path` without opening it for writing. A missing file
    /// reads as empty.
    pub fn read(path: &Path) -> io::Result<Replay> {
        match fs::read(path) {
            Ok(bytes) => Ok(scan(&bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Replay::default()),
            Err(e) => Err(e),
        }
    }

    /// Write `batches` back to back and sync once. On failure the file is cut
    /// back to where it was, so none of them survive a restart.
    pub fn commit(&mut self, batches: &[EventBatch]) -> io::Result<()> {
        let mut bytes = Vec::with_capacity(batches.iter().map(|b| b.bytes.len()).sum());
        for batch in batches {
            bytes.extend_from_slice(&batch.bytes);
        }
        let written = self
            .file
            .write_all(&bytes)
            .and_then(|()| self.file.sync_data());
        if let Err(e) = written {
            if let Err(undo) = self.file.set_len(self.len) {
                tracing::error!("could not roll back {}: {undo}", self.path.display());
            }
            return Err(e);
        }
        self.len += bytes.len() as u64;
        self.frames_since_rewrite += batches.iter().map(|b| b.events as u64).sum::<u64>();
        Ok(())
    }

    /// Replace the log with one `Upserted` frame per record: write a sibling
    /// temp file, sync it, and rename it over the log.
    pub fn rewrite(&mut self, records: &[ReservationRecord]) -> io::Result<()> {
        let mut bytes = Vec::new();
        for record in records {
            frame_into(&mut bytes, &StoreEvent::Upserted(record.clone()))?;
        }
        let tmp = self.path.with_extension("wal.tmp");
        {
            let mut out = File::create(&tmp)?;
            out.write_all(&bytes)?;
            out.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        #[cfg(unix)]
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            File::open(dir)?.sync_all()?;
        }
        self.file = OpenOptions::new().append(true).open(&self.path)?;
        self.len = bytes.len() as u64;
        self.frames_since_rewrite = 0;
        Ok(())
    }

    /// Frames in the log that a rewrite could fold, including those replayed
    /// on open.
    pub fn frames_since_rewrite(&self) -> u64 {
        self.frames_since_rewrite
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
