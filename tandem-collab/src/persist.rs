//! Per-pad write-behind persistence.
//!
//! ```text
//! Pad ──append_*()──► [ bounded mpsc ] ──► writer task ──spawn_blocking──► Storage
//!      (after the history lock is released; waits when full)
//! ```
//!
//! Writes are at-most-once: a failed append is logged and counted, never
//! retried. Memory stays authoritative for the life of the process.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::pad::{ChatEntry, PadId, RecordedDelta};
use crate::storage::{Storage, StoreError};

enum PersistCommand {
    Delta(Arc<RecordedDelta>),
    Chat(Arc<ChatEntry>),
    /// Answered once every earlier command has been handled.
    Flush(oneshot::Sender<()>),
}

/// Snapshot of a queue's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistStats {
    pub written: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct AtomicPersistStats {
    written: AtomicU64,
    failed: AtomicU64,
}

/// Handle to a pad's writer task. The task ends when the handle drops.
#[derive(Debug, Clone)]
pub struct PersistQueue {
    pad: PadId,
    tx: mpsc::Sender<PersistCommand>,
    stats: Arc<AtomicPersistStats>,
}

impl std::fmt::Debug for PersistCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistCommand::Delta(record) => write!(f, "Delta({})", record.revision),
            PersistCommand::Chat(entry) => write!(f, "Chat({})", entry.id),
            PersistCommand::Flush(_) => write!(f, "Flush"),
        }
    }
}

impl PersistQueue {
    /// Start the writer task for `pad`. Must be called inside a runtime.
    pub fn spawn(pad: PadId, storage: Arc<dyn Storage>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let stats = Arc::new(AtomicPersistStats::default());
        tokio::spawn(run(pad, storage, rx, stats.clone()));
        Self { pad, tx, stats }
    }

    pub async fn append_delta(&self, record: Arc<RecordedDelta>) {
        self.send(PersistCommand::Delta(record)).await;
    }

    pub async fn append_chat(&self, entry: Arc<ChatEntry>) {
        self.send(PersistCommand::Chat(entry)).await;
    }

    /// Wait until everything enqueued so far has reached storage (or failed).
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        self.send(PersistCommand::Flush(done_tx)).await;
        let _ = done_rx.await;
    }

    pub fn stats(&self) -> PersistStats {
        PersistStats {
            written: self.stats.written.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
        }
    }

    async fn send(&self, command: PersistCommand) {
        if let Err(e) = self.tx.send(command).await {
            log::error!("Persistence task for pad {} is gone, lost {:?}", self.pad, e.0);
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

async fn run(
    pad: PadId,
    storage: Arc<dyn Storage>,
    mut rx: mpsc::Receiver<PersistCommand>,
    stats: Arc<AtomicPersistStats>,
) {
    while let Some(command) = rx.recv().await {
        let storage = storage.clone();
        let (what, result) = match command {
            PersistCommand::Delta(record) => {
                let what = format!("revision {}", record.revision);
                let result =
                    tokio::task::spawn_blocking(move || storage.append_delta(pad, &record)).await;
                (what, result)
            }
            PersistCommand::Chat(entry) => {
                let what = format!("chat {}", entry.id);
                let result =
                    tokio::task::spawn_blocking(move || storage.append_chat(pad, &entry)).await;
                (what, result)
            }
            PersistCommand::Flush(done) => {
                let _ = done.send(());
                continue;
            }
        };

        match result.unwrap_or_else(|e| Err(StoreError::Io(e.to_string()))) {
            Ok(()) => {
                stats.written.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                log::error!("Failed to persist {what} of pad {pad}: {e}");
            }
        }
    }
    log::debug!("Persistence task for pad {pad} stopped");
}
