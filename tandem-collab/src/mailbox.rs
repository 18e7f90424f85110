//! Per-client bounded mailbox with drop-on-full fan-out.
//!
//! ```text
//! Pad / Registry ──offer()──┐            (never waits; drops when full)
//!                           ├─► [ bounded mpsc ] ─► delivery loop ─► socket
//! own Session ───deliver()──┘            (waits for room)
//! ```
//!
//! A pad fans out under its history lock, so a slow reader must never be
//! able to hold that lock: other parties only ever `offer`. A session may
//! block on its own mailbox with `deliver`, never on anyone else's.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::pad::{ChatEntry, Pad, PadId, RecordedDelta};
use crate::protocol::{AuthCode, UserInfo};
use crate::user::{SharedUser, UserId};

/// Everything that can be queued for a client's delivery loop.
#[derive(Debug, Clone)]
pub enum Event {
    /// Authentication succeeded.
    Welcome {
        user: SharedUser,
        session_id: Option<String>,
        pads: Vec<String>,
    },
    AuthError(AuthCode),
    PadCreated(String),
    /// Start a visit: push the pad's backlog.
    EnterPad(Arc<Pad>),
    LeavePad,
    Delta {
        pad: PadId,
        record: Arc<RecordedDelta>,
    },
    Chat {
        pad: PadId,
        entry: Arc<ChatEntry>,
    },
    UserInfo {
        pad: PadId,
        info: UserInfo,
    },
    UserLeave {
        pad: PadId,
        user: UserId,
    },
    /// A user's profile changed somewhere on the server.
    UserChanged(UserId),
    ChatRequest {
        from: u32,
        count: u32,
    },
    RevisionRequest(u32),
    DeltaDropped {
        revision: u32,
    },
    Close,
}

/// Snapshot of a mailbox's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MailboxStats {
    pub delivered: u64,
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct AtomicMailboxStats {
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Create a mailbox holding at most `capacity` pending events.
pub fn mailbox(capacity: usize) -> (MailboxSender, MailboxReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let sender = MailboxSender {
        tx,
        stats: Arc::new(AtomicMailboxStats::default()),
    };
    (sender, MailboxReceiver { rx })
}

/// Producer side of a mailbox.
#[derive(Debug, Clone)]
pub struct MailboxSender {
    tx: mpsc::Sender<Event>,
    stats: Arc<AtomicMailboxStats>,
}

impl MailboxSender {
    /// Enqueue without waiting. A full mailbox drops the event for this
    /// client only. Returns whether the event was queued.
    pub fn offer(&self, event: Event) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => {
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(event)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("Mailbox full, dropped {}", event.name());
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Enqueue, waiting for room. Returns false once the receiver is gone.
    pub async fn deliver(&self, event: Event) -> bool {
        let queued = self.tx.send(event).await.is_ok();
        if queued {
            self.stats.delivered.fetch_add(1, Ordering::Relaxed);
        }
        queued
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    pub fn stats(&self) -> MailboxStats {
        MailboxStats {
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Consumer side, owned by the delivery loop.
#[derive(Debug)]
pub struct MailboxReceiver {
    rx: mpsc::Receiver<Event>,
}

impl MailboxReceiver {
    /// Wait for the next event. `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Take a pending event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Event {
    fn name(&self) -> &'static str {
        match self {
            Event::Welcome { .. } => "welcome",
            Event::AuthError(_) => "auth error",
            Event::PadCreated(_) => "pad created",
            Event::EnterPad(_) => "enter pad",
            Event::LeavePad => "leave pad",
            Event::Delta { .. } => "delta",
            Event::Chat { .. } => "chat",
            Event::UserInfo { .. } => "user info",
            Event::UserLeave { .. } => "user leave",
            Event::UserChanged(_) => "user changed",
            Event::ChatRequest { .. } => "chat request",
            Event::RevisionRequest(_) => "revision request",
            Event::DeltaDropped { .. } => "delta dropped",
            Event::Close => "close",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offer_and_receive_in_order() {
        let (tx, mut rx) = mailbox(8);
        assert!(tx.offer(Event::RevisionRequest(1)));
        assert!(tx.offer(Event::RevisionRequest(2)));

        assert!(matches!(rx.recv().await, Some(Event::RevisionRequest(1))));
        assert!(matches!(rx.try_recv(), Some(Event::RevisionRequest(2))));
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_offer_drops_when_full() {
        let (tx, mut rx) = mailbox(2);
        assert!(tx.offer(Event::LeavePad));
        assert!(tx.offer(Event::LeavePad));
        assert!(!tx.offer(Event::Close));

        let stats = tx.stats();
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.dropped, 1);

        assert_eq!(rx.len(), 2);
        rx.recv().await;
        assert!(tx.offer(Event::Close));
    }

    #[tokio::test]
    async fn test_deliver_waits_for_room() {
        let (tx, mut rx) = mailbox(1);
        assert!(tx.offer(Event::LeavePad));

        let sender = tx.clone();
        let pending = tokio::spawn(async move { sender.deliver(Event::Close).await });
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        assert!(matches!(rx.recv().await, Some(Event::LeavePad)));
        assert!(pending.await.unwrap());
        assert!(matches!(rx.recv().await, Some(Event::Close)));
    }

    #[tokio::test]
    async fn test_closed_mailbox() {
        let (tx, rx) = mailbox(4);
        drop(rx);
        assert!(tx.is_closed());
        assert!(!tx.offer(Event::LeavePad));
        assert!(!tx.deliver(Event::Close).await);
        assert_eq!(tx.stats().dropped, 0);
    }

    #[test]
    fn test_capacity() {
        let (tx, _rx) = mailbox(200);
        assert_eq!(tx.capacity(), 200);
    }
}
