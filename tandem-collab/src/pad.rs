//! Pad: one shared document with its history, chat and members.
//!
//! ```text
//!             ┌──────────────── RwLock<History> ────────────────┐
//! revision    │  0        1          2          ...   head       │
//! deltas      │  -        d1         d2               dh         │
//! documents   │  s0 ─d1─► s1 ──d2──► s2 ──► ... ────► sh         │
//!             └─────────────────────────────────────────────────┘
//!   s0 = empty document, s(r) = compose(s(r-1), d(r))
//! ```
//!
//! Deltas and documents share one lock, so a reader never sees a delta
//! without its document. Every mutation rebases, composes, records and
//! fans out while holding the write lock, which gives every member the
//! deltas in revision order; fan-out only ever `offer`s. Persistence is
//! enqueued after the lock is released.
//!
//! History is append-only: moderation records compensating deltas.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tandem_core::{compose, invert, rebase, Delta, OtError, StyleMeta};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::client::{ClientHandle, ClientId, RemoteInfo};
use crate::mailbox::Event;
use crate::persist::{PersistQueue, PersistStats};
use crate::protocol::UserInfo;
use crate::user::{Permissions, SharedUser, User, UserId, SYSTEM_USER};

pub type PadId = u32;

/// A delta as recorded in history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedDelta {
    pub revision: u32,
    pub author: UserId,
    pub delta: Delta,
}

/// The full document at a revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub revision: u32,
    pub document: Delta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub id: u32,
    pub author: UserId,
    pub text: String,
}

/// Why a history mutation was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PadError {
    #[error(transparent)]
    Ot(#[from] OtError),
    #[error("base revision {base} is ahead of head revision {head}")]
    FutureRevision { base: u32, head: u32 },
    #[error("no revision {0}")]
    UnknownRevision(u32),
    #[error("delta changes nothing")]
    NoChange,
}

struct History {
    /// `deltas[r - 1]` is revision r.
    deltas: Vec<Arc<RecordedDelta>>,
    /// `snapshots[r]` is the document at revision r.
    snapshots: Vec<Arc<Snapshot>>,
}

impl History {
    fn new() -> Self {
        Self {
            deltas: Vec::new(),
            snapshots: vec![Arc::new(Snapshot {
                revision: 0,
                document: Delta::new(),
            })],
        }
    }

    fn head(&self) -> u32 {
        self.deltas.len() as u32
    }

    fn current(&self) -> &Arc<Snapshot> {
        &self.snapshots[self.snapshots.len() - 1]
    }

    fn snapshot(&self, revision: u32) -> Option<&Arc<Snapshot>> {
        self.snapshots.get(revision as usize)
    }

    fn delta(&self, revision: u32) -> Option<&Arc<RecordedDelta>> {
        revision
            .checked_sub(1)
            .and_then(|index| self.deltas.get(index as usize))
    }

    /// Bring `delta`, written against `base`, up to the head revision.
    fn rebase_from(&self, base: u32, mut delta: Delta) -> Result<Delta, OtError> {
        for recorded in &self.deltas[base as usize..] {
            delta = rebase(&delta, &recorded.delta)?;
        }
        Ok(delta)
    }

    /// Compose `delta` (against head) onto the current document and record it.
    fn record(&mut self, author: UserId, delta: Delta) -> Result<Arc<RecordedDelta>, OtError> {
        let document = compose(&self.current().document, &delta)?;
        Ok(self.push(author, delta, document))
    }

    fn push(&mut self, author: UserId, delta: Delta, document: Delta) -> Arc<RecordedDelta> {
        let revision = self.head() + 1;
        let record = Arc::new(RecordedDelta {
            revision,
            author,
            delta,
        });
        self.deltas.push(record.clone());
        self.snapshots.push(Arc::new(Snapshot { revision, document }));
        record
    }

    fn inverse_of(&self, revision: u32) -> Result<Delta, PadError> {
        let recorded = self
            .delta(revision)
            .ok_or(PadError::UnknownRevision(revision))?;
        let before = self
            .snapshot(revision - 1)
            .ok_or(PadError::UnknownRevision(revision))?;
        Ok(invert(&recorded.delta, &before.document)?)
    }
}

struct ChatLog {
    entries: Vec<Arc<ChatEntry>>,
    next_id: u32,
}

struct Member {
    handle: Arc<ClientHandle>,
    user: SharedUser,
}

/// A shared document.
pub struct Pad {
    id: PadId,
    name: String,
    history: RwLock<History>,
    chat: RwLock<ChatLog>,
    members: RwLock<HashMap<ClientId, Member>>,
    persist: PersistQueue,
}

impl std::fmt::Debug for Pad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pad")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Pad {
    /// An empty pad at revision 0.
    pub fn new(id: PadId, name: impl Into<String>, persist: PersistQueue) -> Self {
        Self {
            id,
            name: name.into(),
            history: RwLock::new(History::new()),
            chat: RwLock::new(ChatLog {
                entries: Vec::new(),
                next_id: 1,
            }),
            members: RwLock::new(HashMap::new()),
            persist,
        }
    }

    /// Rebuild a pad by replaying persisted history.
    ///
    /// A missing revision, or one that does not compose onto its
    /// predecessor, is replaced by an identity delta from [`SYSTEM_USER`] so
    /// revision numbers and the snapshot chain stay intact. A record that
    /// would open a gap wider than the number of stored records is dropped.
    pub fn hydrate(
        id: PadId,
        name: impl Into<String>,
        deltas: Vec<RecordedDelta>,
        chat: Vec<ChatEntry>,
        persist: PersistQueue,
    ) -> Self {
        let name = name.into();
        let mut history = History::new();
        let max_gap = u32::try_from(deltas.len()).unwrap_or(u32::MAX);

        for stored in deltas {
            if stored.revision <= history.head() {
                log::warn!(
                    "Pad '{name}': skipping duplicate revision {}",
                    stored.revision
                );
                continue;
            }
            if stored.revision - history.head() > max_gap {
                log::warn!(
                    "Pad '{name}': skipping out-of-range revision {} (head {})",
                    stored.revision,
                    history.head()
                );
                continue;
            }
            while history.head() + 1 < stored.revision {
                log::warn!(
                    "Pad '{name}': revision {} missing from storage",
                    history.head() + 1
                );
                fill_gap(&mut history);
            }
            if let Err(e) = history.record(stored.author, stored.delta) {
                log::warn!("Pad '{name}': revision {} is corrupt: {e}", stored.revision);
                fill_gap(&mut history);
            }
        }

        let mut entries: Vec<Arc<ChatEntry>> = chat.into_iter().map(Arc::new).collect();
        entries.sort_by_key(|entry| entry.id);
        entries.dedup_by_key(|entry| entry.id);
        let next_id = entries.last().map_or(1, |entry| entry.id + 1);

        log::info!(
            "Hydrated pad '{name}' at revision {} with {} chat lines",
            history.head(),
            entries.len()
        );

        Self {
            id,
            name,
            history: RwLock::new(history),
            chat: RwLock::new(ChatLog { entries, next_id }),
            members: RwLock::new(HashMap::new()),
            persist,
        }
    }

    pub fn id(&self) -> PadId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // ─── History ──────────────────────────────────────────────────────

    pub async fn revision(&self) -> u32 {
        self.history.read().await.head()
    }

    /// The document at the head revision.
    pub async fn document(&self) -> Arc<Snapshot> {
        self.history.read().await.current().clone()
    }

    pub async fn document_at(&self, revision: u32) -> Option<Arc<Snapshot>> {
        self.history.read().await.snapshot(revision).cloned()
    }

    pub async fn delta_at(&self, revision: u32) -> Option<Arc<RecordedDelta>> {
        self.history.read().await.delta(revision).cloned()
    }

    /// Every snapshot from revision 0 to head.
    pub async fn snapshots(&self) -> Vec<Arc<Snapshot>> {
        self.history.read().await.snapshots.clone()
    }

    /// Record `delta`, written against `base_revision`, as the next revision.
    ///
    /// A delta that covers only a prefix of the base document is extended
    /// with a plain retain over the rest. A delta that changes nothing is
    /// refused and leaves history untouched.
    pub async fn submit_delta(
        &self,
        author: UserId,
        base_revision: u32,
        mut delta: Delta,
    ) -> Result<Arc<RecordedDelta>, PadError> {
        if delta.is_identity() {
            return Err(PadError::NoChange);
        }
        let record = {
            let mut history = self.history.write().await;
            let head = history.head();
            let base = history
                .snapshot(base_revision)
                .ok_or(PadError::FutureRevision {
                    base: base_revision,
                    head,
                })?;

            let base_len = base.document.target_len();
            let span = delta.base_len();
            if span > base_len {
                return Err(OtError::LengthMismatch {
                    operation: "submit",
                    left: span,
                    right: base_len,
                }
                .into());
            }
            delta.retain(base_len - span, StyleMeta::EMPTY);

            let rebased = history.rebase_from(base_revision, delta)?;
            let record = history.record(author, rebased)?;
            self.fan_out_delta(&record).await;
            record
        };
        self.persist.append_delta(record.clone()).await;
        Ok(record)
    }

    /// Undo one revision by recording its rebased inverse.
    pub async fn invert_delta(
        &self,
        by: UserId,
        revision: u32,
    ) -> Result<Arc<RecordedDelta>, PadError> {
        let record = {
            let mut history = self.history.write().await;
            let inverse = history.inverse_of(revision)?;
            let rebased = history.rebase_from(revision, inverse)?;
            let record = history.record(by, rebased)?;
            self.fan_out_delta(&record).await;
            record
        };
        self.persist.append_delta(record.clone()).await;
        Ok(record)
    }

    /// Undo every revision authored by `target` as one new revision.
    ///
    /// Returns `None` when `target` authored nothing.
    pub async fn invert_user_delta(
        &self,
        by: UserId,
        target: UserId,
    ) -> Result<Option<Arc<RecordedDelta>>, PadError> {
        let record = {
            let mut history = self.history.write().await;

            // `undo` always applies to the document at the current step.
            let mut undo: Option<Delta> = None;
            for recorded in &history.deltas {
                undo = if recorded.author == target {
                    let inverse = history.inverse_of(recorded.revision)?;
                    Some(match undo {
                        Some(later) => compose(&inverse, &later)?,
                        None => inverse,
                    })
                } else {
                    match undo {
                        Some(pending) => Some(rebase(&pending, &recorded.delta)?),
                        None => None,
                    }
                };
            }
            let Some(undo) = undo else {
                return Ok(None);
            };

            let record = history.record(by, undo)?;
            self.fan_out_delta(&record).await;
            record
        };
        self.persist.append_delta(record.clone()).await;
        Ok(Some(record))
    }

    /// Bring the document back to how it was at `revision`, as one new
    /// revision. A no-op for the head revision or beyond.
    pub async fn restore_revision(
        &self,
        by: UserId,
        revision: u32,
    ) -> Result<Option<Arc<RecordedDelta>>, PadError> {
        let record = {
            let mut history = self.history.write().await;
            let head = history.head();
            if revision >= head {
                return Ok(None);
            }

            let mut rollback = history.inverse_of(head)?;
            for step in (revision + 1..head).rev() {
                rollback = compose(&rollback, &history.inverse_of(step)?)?;
            }

            let record = history.record(by, rollback)?;
            self.fan_out_delta(&record).await;
            record
        };
        self.persist.append_delta(record.clone()).await;
        Ok(Some(record))
    }

    async fn fan_out_delta(&self, record: &Arc<RecordedDelta>) {
        let members = self.members.read().await;
        for member in members.values() {
            member.handle.mailbox.offer(Event::Delta {
                pad: self.id,
                record: record.clone(),
            });
        }
    }

    // ─── Chat ─────────────────────────────────────────────────────────

    /// Append a chat line from `user` and send it to everyone but `sender`.
    ///
    /// Blank messages are ignored.
    pub async fn send_chat(
        &self,
        sender: ClientId,
        user: &User,
        text: &str,
    ) -> Option<Arc<ChatEntry>> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let entry = {
            let mut chat = self.chat.write().await;
            let entry = Arc::new(ChatEntry {
                id: chat.next_id,
                author: user.id,
                text: user.chat_line(text),
            });
            chat.next_id += 1;
            chat.entries.push(entry.clone());

            let members = self.members.read().await;
            for (id, member) in members.iter() {
                if *id != sender {
                    member.handle.mailbox.offer(Event::Chat {
                        pad: self.id,
                        entry: entry.clone(),
                    });
                }
            }
            entry
        };
        self.persist.append_chat(entry.clone()).await;
        Some(entry)
    }

    /// The last `count` chat lines, oldest first.
    pub async fn recent_chat(&self, count: usize) -> Vec<Arc<ChatEntry>> {
        let chat = self.chat.read().await;
        let start = chat.entries.len().saturating_sub(count);
        chat.entries[start..].to_vec()
    }

    /// Chat lines with ids `end - count + 1 ..= end`.
    pub async fn chat_range(&self, end: u32, count: u32) -> Vec<Arc<ChatEntry>> {
        let first = end.saturating_sub(count).saturating_add(1);
        let chat = self.chat.read().await;
        let start = chat.entries.partition_point(|entry| entry.id < first);
        let stop = chat.entries.partition_point(|entry| entry.id <= end);
        chat.entries[start..stop.max(start)].to_vec()
    }

    pub async fn last_chat_id(&self) -> u32 {
        self.chat.read().await.next_id - 1
    }

    // ─── Members ──────────────────────────────────────────────────────

    /// Add a client and announce it to the other members.
    pub async fn join(&self, handle: Arc<ClientHandle>, user: SharedUser) {
        let described = user.read().clone();
        let mut members = self.members.write().await;
        for member in members.values() {
            let reveal = member.user.read().can(Permissions::MOD);
            let info = UserInfo::describe(&described, true, reveal.then_some(&handle.remote));
            member.handle.mailbox.offer(Event::UserInfo { pad: self.id, info });
        }
        log::debug!(
            "Client {} ({}) joined pad '{}'",
            handle.id,
            described.nickname,
            self.name
        );
        members.insert(handle.id, Member { handle, user });
    }

    /// Remove a client and tell the remaining members.
    pub async fn leave(&self, client: ClientId) {
        let mut members = self.members.write().await;
        let Some(left) = members.remove(&client) else {
            return;
        };
        let user = left.user.read().id;
        for member in members.values() {
            member.handle.mailbox.offer(Event::UserLeave { pad: self.id, user });
        }
        log::debug!("Client {client} left pad '{}'", self.name);
    }

    /// Everyone in the pad, with where they connect from.
    pub async fn online(&self) -> Vec<(User, RemoteInfo)> {
        self.members
            .read()
            .await
            .values()
            .map(|member| (member.user.read().clone(), member.handle.remote.clone()))
            .collect()
    }

    pub async fn is_online(&self, user: UserId) -> bool {
        self.members
            .read()
            .await
            .values()
            .any(|member| member.user.read().id == user)
    }

    pub async fn member_count(&self) -> usize {
        self.members.read().await.len()
    }

    // ─── Persistence ──────────────────────────────────────────────────

    /// Wait for every write enqueued so far.
    pub async fn flush(&self) {
        self.persist.flush().await;
    }

    pub fn persist_stats(&self) -> PersistStats {
        self.persist.stats()
    }
}

fn fill_gap(history: &mut History) {
    let document = history.current().document.clone();
    let identity = Delta::identity(document.target_len());
    history.push(SYSTEM_USER, identity, document);
}
