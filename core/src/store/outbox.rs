// Outbox — durable queue of commands the peer has not received yet
//
// Commands land here when the peer is unreachable or a direct send fails,
// and are replayed in enqueue order once it comes back. Each replayed entry
// is removed (and flushed to disk) right after its send succeeds, so a crash
// mid-flush never loses a command that was not sent.

use crate::message::protocol::abbrev;
use crate::transport::TransportError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Maximum commands held at once
pub const MAX_TOTAL_QUEUED: usize = 10_000;

const QUEUE_PREFIX: &[u8] = b"outbox_";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OutboxError {
    #[error("Outbox full ({0} commands)")]
    Full(usize),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sled::Error> for OutboxError {
    fn from(err: sled::Error) -> Self {
        OutboxError::Storage(err.to_string())
    }
}

impl From<bincode::Error> for OutboxError {
    fn from(err: bincode::Error) -> Self {
        OutboxError::Serialization(err.to_string())
    }
}

/// A queued command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Monotonic sequence number; queue order
    pub seq: u64,
    pub command: String,
    /// When this was queued (unix millis)
    pub enqueued_at: u64,
    /// Failed replay attempts so far
    pub attempts: u32,
}

/// Synchronous delivery of one command, used to replay the queue.
///
/// `Ok` means the datagram left the device, not that the peer processed it.
#[async_trait]
pub trait CommandSender: Send + Sync {
    async fn send_command_sync(&self, command: &str) -> Result<(), TransportError>;
}

/// Outcome of one flush pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Commands sent and removed during this pass
    pub delivered: usize,
    /// Commands still queued after the pass
    pub remaining: usize,
    /// Commands removed without being sent because they can never be encoded
    pub discarded: usize,
    /// The pass stopped on a failed send or a storage error
    pub stopped_early: bool,
    /// Another flush was already running; nothing was attempted
    pub skipped: bool,
    pub failure: Option<String>,
}

/// Storage backend for outbox
enum OutboxBackend {
    Memory {
        queue: Mutex<VecDeque<OutboxEntry>>,
        next_seq: AtomicU64,
    },
    Persistent {
        db: sled::Db,
        /// Cached record count, so enqueue and `pending_count` never scan
        len: AtomicUsize,
        /// Serializes the capacity check with the insert, and `clear`
        write: Mutex<()>,
    },
}

/// Durable FIFO command queue
pub struct Outbox {
    backend: OutboxBackend,
    capacity: usize,
    flushing: AtomicBool,
}

struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn entry_key(seq: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(QUEUE_PREFIX.len() + 8);
    key.extend_from_slice(QUEUE_PREFIX);
    // Big-endian so sled's lexicographic order is queue order
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

impl Outbox {
    /// Create a new in-memory outbox
    pub fn new() -> Self {
        Self {
            backend: OutboxBackend::Memory {
                queue: Mutex::new(VecDeque::new()),
                next_seq: AtomicU64::new(0),
            },
            capacity: MAX_TOTAL_QUEUED,
            flushing: AtomicBool::new(false),
        }
    }

    /// Create a persistent outbox with sled backend
    pub fn persistent(path: impl AsRef<Path>) -> Result<Self, OutboxError> {
        let db = sled::open(path)?;
        let len = db.scan_prefix(QUEUE_PREFIX).count();
        Ok(Self {
            backend: OutboxBackend::Persistent {
                db,
                len: AtomicUsize::new(len),
                write: Mutex::new(()),
            },
            capacity: MAX_TOTAL_QUEUED,
            flushing: AtomicBool::new(false),
        })
    }

    /// Override the queue limit
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, OutboxBackend::Persistent { .. })
    }

    /// Append a command to the end of the queue
    pub fn enqueue(&self, command: &str) -> Result<OutboxEntry, OutboxError> {
        let entry = match &self.backend {
            OutboxBackend::Memory { queue, next_seq } => {
                let mut queue = queue.lock();
                if queue.len() >= self.capacity {
                    return Err(OutboxError::Full(self.capacity));
                }
                let entry = OutboxEntry {
                    seq: next_seq.fetch_add(1, Ordering::SeqCst),
                    command: command.to_string(),
                    enqueued_at: now_millis(),
                    attempts: 0,
                };
                queue.push_back(entry.clone());
                entry
            }
            OutboxBackend::Persistent { db, len, write } => {
                let _write = write.lock();
                if len.load(Ordering::SeqCst) >= self.capacity {
                    return Err(OutboxError::Full(self.capacity));
                }
                // generate_id stays monotonic across restarts
                let entry = OutboxEntry {
                    seq: db.generate_id()?,
                    command: command.to_string(),
                    enqueued_at: now_millis(),
                    attempts: 0,
                };
                db.insert(entry_key(entry.seq), bincode::serialize(&entry)?)?;
                len.fetch_add(1, Ordering::SeqCst);
                db.flush()?;
                entry
            }
        };

        debug!("Queued offline: {}", abbrev(command));
        Ok(entry)
    }

    /// Number of commands waiting to be sent
    pub fn pending_count(&self) -> usize {
        match &self.backend {
            OutboxBackend::Memory { queue, .. } => queue.lock().len(),
            OutboxBackend::Persistent { len, .. } => len.load(Ordering::SeqCst),
        }
    }

    /// All queued entries in send order (without removing them)
    pub fn entries(&self) -> Vec<OutboxEntry> {
        match &self.backend {
            OutboxBackend::Memory { queue, .. } => queue.lock().iter().cloned().collect(),
            OutboxBackend::Persistent { db, .. } => db
                .scan_prefix(QUEUE_PREFIX)
                .filter_map(|result| result.ok())
                .filter_map(|(_, value)| bincode::deserialize(&value).ok())
                .collect(),
        }
    }

    /// Oldest queued entry.
    ///
    /// Undecodable records cannot ever be replayed; they are dropped with a
    /// warning so they do not wedge the queue.
    fn front(&self) -> Result<Option<OutboxEntry>, OutboxError> {
        match &self.backend {
            OutboxBackend::Memory { queue, .. } => Ok(queue.lock().front().cloned()),
            OutboxBackend::Persistent { db, len, .. } => {
                for result in db.scan_prefix(QUEUE_PREFIX) {
                    let (key, value) = result?;
                    match bincode::deserialize::<OutboxEntry>(&value) {
                        Ok(entry) => return Ok(Some(entry)),
                        Err(e) => {
                            warn!("Dropping unreadable outbox record: {}", e);
                            if db.remove(key)?.is_some() {
                                len.fetch_sub(1, Ordering::SeqCst);
                            }
                            db.flush()?;
                        }
                    }
                }
                Ok(None)
            }
        }
    }

    /// Remove an entry after it was delivered
    pub fn remove(&self, seq: u64) -> Result<bool, OutboxError> {
        match &self.backend {
            OutboxBackend::Memory { queue, .. } => {
                let mut queue = queue.lock();
                match queue.iter().position(|e| e.seq == seq) {
                    Some(pos) => {
                        queue.remove(pos);
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
            OutboxBackend::Persistent { db, len, .. } => {
                let removed = db.remove(entry_key(seq))?.is_some();
                if removed {
                    len.fetch_sub(1, Ordering::SeqCst);
                }
                db.flush()?;
                Ok(removed)
            }
        }
    }

    /// Increment the failed-attempt counter of an entry
    pub fn record_attempt(&self, seq: u64) -> Result<(), OutboxError> {
        match &self.backend {
            OutboxBackend::Memory { queue, .. } => {
                if let Some(entry) = queue.lock().iter_mut().find(|e| e.seq == seq) {
                    entry.attempts += 1;
                }
                Ok(())
            }
            OutboxBackend::Persistent { db, .. } => {
                db.update_and_fetch(entry_key(seq), |old| {
                    let old = old?;
                    match bincode::deserialize::<OutboxEntry>(old) {
                        Ok(mut entry) => {
                            entry.attempts += 1;
                            bincode::serialize(&entry).ok().or_else(|| Some(old.to_vec()))
                        }
                        Err(_) => Some(old.to_vec()),
                    }
                })?;
                db.flush()?;
                Ok(())
            }
        }
    }

    /// Drop every queued command (e.g. after a full server-side reset)
    pub fn clear(&self) -> Result<usize, OutboxError> {
        let removed = match &self.backend {
            OutboxBackend::Memory { queue, .. } => {
                let mut queue = queue.lock();
                let count = queue.len();
                queue.clear();
                count
            }
            OutboxBackend::Persistent { db, len, write } => {
                let _write = write.lock();
                let keys: Vec<_> = db
                    .scan_prefix(QUEUE_PREFIX)
                    .keys()
                    .filter_map(|k| k.ok())
                    .collect();
                let mut removed = 0;
                for key in &keys {
                    if db.remove(key)?.is_some() {
                        removed += 1;
                    }
                }
                len.fetch_sub(removed, Ordering::SeqCst);
                db.flush()?;
                removed
            }
        };
        info!("Outbox cleared ({} commands)", removed);
        Ok(removed)
    }

    /// Whether a flush pass is running right now
    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::SeqCst)
    }

    /// Replay queued commands in order through `sender`.
    ///
    /// Stops at the first failed send; that entry and everything after it
    /// stay queued. An entry that fails because it can never be encoded is
    /// removed instead, so it cannot hold back the rest of the queue. Commands enqueued while the pass runs are appended and may
    /// or may not be picked up by it. Only one pass runs at a time.
    pub async fn flush<S>(&self, sender: &S) -> FlushReport
    where
        S: CommandSender + ?Sized,
    {
        if self.flushing.swap(true, Ordering::SeqCst) {
            debug!("Flush already in progress, skipping");
            return FlushReport {
                remaining: self.pending_count(),
                skipped: true,
                ..FlushReport::default()
            };
        }
        let _guard = FlushGuard(&self.flushing);

        let mut report = FlushReport::default();
        info!("Flushing outbox — {} pending command(s)", self.pending_count());

        loop {
            let entry = match self.front() {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("Outbox read failed during flush: {}", e);
                    report.stopped_early = true;
                    report.failure = Some(e.to_string());
                    break;
                }
            };

            match sender.send_command_sync(&entry.command).await {
                Ok(()) => {
                    if let Err(e) = self.remove(entry.seq) {
                        // Sent but still queued: the peer may see it twice
                        warn!("Failed to remove flushed command: {}", e);
                        report.stopped_early = true;
                        report.failure = Some(e.to_string());
                        break;
                    }
                    report.delivered += 1;
                    debug!("✓ Flushed: {}", abbrev(&entry.command));
                }
                Err(e) if e.is_permanent() => {
                    warn!("Discarding unsendable command {}: {}", abbrev(&entry.command), e);
                    if let Err(err) = self.remove(entry.seq) {
                        report.stopped_early = true;
                        report.failure = Some(err.to_string());
                        break;
                    }
                    report.discarded += 1;
                }
                Err(e) => {
                    if let Err(err) = self.record_attempt(entry.seq) {
                        warn!("Failed to record attempt: {}", err);
                    }
                    warn!(
                        "Flush stopped at attempt {}: {} ({})",
                        entry.attempts + 1,
                        abbrev(&entry.command),
                        e
                    );
                    report.stopped_early = true;
                    report.failure = Some(e.to_string());
                    break;
                }
            }
        }

        report.remaining = self.pending_count();
        info!(
            "Flush done. Delivered: {}, discarded: {}, remaining: {}",
            report.delivered, report.discarded, report.remaining
        );
        report
    }
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new()
    }
}
