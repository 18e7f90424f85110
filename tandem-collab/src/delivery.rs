//! Outbound half of a connection: drains the mailbox into batches.
//!
//! ```text
//! mailbox ──recv()──► first event ──try_recv()*──► batch ──► OutboundSink
//!    ▲                     │
//!    └──── heartbeat ◄─────┘ (while idle)
//! ```
//!
//! While the client is in a pad, a per-visit context filters out chat and
//! deltas it has already seen and describes each author once before their
//! first chat line or delta.

use std::collections::HashSet;
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::mailbox::{Event, MailboxReceiver};
use crate::pad::{Pad, PadId};
use crate::protocol::{ProtocolError, ServerMessage, UserInfo};
use crate::registry::Registry;
use crate::user::{Permissions, SharedUser, UserId, SYSTEM_USER};

/// Where outbound batches go.
pub trait OutboundSink: Send {
    fn send_batch(
        &mut self,
        batch: Vec<ServerMessage>,
    ) -> impl Future<Output = Result<(), ProtocolError>> + Send;

    /// Keep an idle connection alive.
    fn heartbeat(&mut self) -> impl Future<Output = Result<(), ProtocolError>> + Send;
}

/// An in-process sink: every batch becomes a channel message.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Vec<ServerMessage>>,
}

impl ChannelSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Vec<ServerMessage>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl OutboundSink for ChannelSink {
    async fn send_batch(&mut self, batch: Vec<ServerMessage>) -> Result<(), ProtocolError> {
        self.tx
            .send(batch)
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    async fn heartbeat(&mut self) -> Result<(), ProtocolError> {
        if self.tx.is_closed() {
            Err(ProtocolError::ConnectionClosed)
        } else {
            Ok(())
        }
    }
}

/// What a client has been shown during one pad visit.
struct Visit {
    pad: Arc<Pad>,
    max_chat_id: u32,
    max_delta_id: u32,
    described: HashSet<UserId>,
}

/// Turns mailbox events into protocol messages for one client.
pub struct Delivery {
    registry: Arc<Registry>,
    viewer: Option<SharedUser>,
    visit: Option<Visit>,
}

impl Delivery {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            viewer: None,
            visit: None,
        }
    }

    /// Run until `Close`, until every mailbox sender is gone, or until the
    /// sink fails.
    pub async fn run<S: OutboundSink>(
        mut self,
        mut mailbox: MailboxReceiver,
        mut sink: S,
        heartbeat: Duration,
    ) -> Result<(), ProtocolError> {
        let mut ticker = interval_at(Instant::now() + heartbeat, heartbeat);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let mut batch = Vec::new();
            let mut closing = false;

            while batch.is_empty() && !closing {
                tokio::select! {
                    event = mailbox.recv() => match event {
                        Some(event) => closing = self.process(event, &mut batch).await.is_break(),
                        None => return Ok(()),
                    },
                    _ = ticker.tick() => sink.heartbeat().await?,
                }
            }

            while !closing {
                let Some(event) = mailbox.try_recv() else {
                    break;
                };
                closing = self.process(event, &mut batch).await.is_break();
            }

            if !batch.is_empty() {
                sink.send_batch(batch).await?;
            }
            if closing {
                return Ok(());
            }
        }
    }

    /// Translate one event, appending any output to `batch`.
    pub async fn process(&mut self, event: Event, batch: &mut Vec<ServerMessage>) -> ControlFlow<()> {
        match event {
            Event::Welcome {
                user,
                session_id,
                pads,
            } => {
                let auth = {
                    let user = user.read();
                    ServerMessage::Auth {
                        user_id: user.id,
                        nickname: user.nickname.clone(),
                        color: user.color,
                        perms: user.perms.bits(),
                        session_id,
                    }
                };
                batch.push(auth);
                batch.push(ServerMessage::PadList { names: pads });
                self.viewer = Some(user);
            }
            Event::AuthError(code) => batch.push(ServerMessage::AuthError { code }),
            Event::PadCreated(name) => batch.push(ServerMessage::PadList { names: vec![name] }),
            Event::EnterPad(pad) => self.enter(pad, batch).await,
            Event::LeavePad => self.visit = None,
            Event::Delta { pad, record } => {
                let registry = self.registry.clone();
                if let Some(visit) = self.visit_of(pad) {
                    if record.revision > visit.max_delta_id {
                        visit.max_delta_id = record.revision;
                        describe(&registry, visit, record.author, batch).await;
                        for author in record.delta.authors() {
                            describe(&registry, visit, author, batch).await;
                        }
                        batch.push(ServerMessage::Delta {
                            id: record.revision,
                            user_id: record.author,
                            ops: record.delta.clone(),
                        });
                    }
                }
            }
            Event::Chat { pad, entry } => {
                let registry = self.registry.clone();
                if let Some(visit) = self.visit_of(pad) {
                    if entry.id > visit.max_chat_id {
                        visit.max_chat_id = entry.id;
                        describe(&registry, visit, entry.author, batch).await;
                        batch.push(ServerMessage::Chat {
                            id: entry.id,
                            user_id: entry.author,
                            text: entry.text.clone(),
                        });
                    }
                }
            }
            Event::UserInfo { pad, info } => {
                if let Some(visit) = self.visit_of(pad) {
                    visit.described.insert(info.id);
                    batch.push(ServerMessage::UserInfo(info));
                }
            }
            Event::UserLeave { pad, user } => {
                if self.visit_of(pad).is_some() {
                    batch.push(ServerMessage::UserLeave { id: user });
                }
            }
            Event::UserChanged(id) => {
                let Some(visit) = self.visit.as_ref() else {
                    return ControlFlow::Continue(());
                };
                if !visit.described.contains(&id) {
                    return ControlFlow::Continue(());
                }
                if let Some(user) = self.registry.user(id).await {
                    let online = visit.pad.is_online(id).await;
                    let info = UserInfo::describe(&user.read(), online, None);
                    batch.push(ServerMessage::UserInfo(info));
                }
            }
            Event::ChatRequest { from, count } => {
                let registry = self.registry.clone();
                if let Some(visit) = self.visit.as_mut() {
                    let entries = visit.pad.chat_range(from, count).await;
                    for entry in entries {
                        describe(&registry, visit, entry.author, batch).await;
                        batch.push(ServerMessage::Chat {
                            id: entry.id,
                            user_id: entry.author,
                            text: entry.text.clone(),
                        });
                    }
                }
            }
            Event::RevisionRequest(revision) => {
                let registry = self.registry.clone();
                if let Some(visit) = self.visit.as_mut() {
                    let pad = visit.pad.clone();
                    if let Some(snapshot) = pad.document_at(revision).await {
                        for author in snapshot.document.authors().collect::<Vec<_>>() {
                            describe(&registry, visit, author, batch).await;
                        }
                        batch.push(ServerMessage::Document {
                            revision: snapshot.revision,
                            ops: snapshot.document.clone(),
                        });
                        if let Some(next) = pad.delta_at(revision + 1).await {
                            describe(&registry, visit, next.author, batch).await;
                            batch.push(ServerMessage::Delta {
                                id: next.revision,
                                user_id: next.author,
                                ops: next.delta.clone(),
                            });
                        }
                    }
                }
            }
            Event::DeltaDropped { revision } => batch.push(ServerMessage::DeltaDropped { revision }),
            Event::Close => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    /// Start a visit and push the pad's backlog: who is online, recent
    /// chat, then the current document.
    async fn enter(&mut self, pad: Arc<Pad>, batch: &mut Vec<ServerMessage>) {
        let reveal = self
            .viewer
            .as_ref()
            .is_some_and(|viewer| viewer.read().can(Permissions::MOD));
        let mut visit = Visit {
            pad: pad.clone(),
            max_chat_id: 0,
            max_delta_id: 0,
            described: HashSet::new(),
        };

        for (user, remote) in pad.online().await {
            if visit.described.insert(user.id) {
                let info = UserInfo::describe(&user, true, reveal.then_some(&remote));
                batch.push(ServerMessage::UserInfo(info));
            }
        }

        for entry in pad.recent_chat(self.registry.config().chat_backlog).await {
            describe(&self.registry, &mut visit, entry.author, batch).await;
            visit.max_chat_id = entry.id;
            batch.push(ServerMessage::Chat {
                id: entry.id,
                user_id: entry.author,
                text: entry.text.clone(),
            });
        }

        let snapshot = pad.document().await;
        for author in snapshot.document.authors().collect::<Vec<_>>() {
            describe(&self.registry, &mut visit, author, batch).await;
        }
        visit.max_delta_id = snapshot.revision;
        batch.push(ServerMessage::Document {
            revision: snapshot.revision,
            ops: snapshot.document.clone(),
        });

        self.visit = Some(visit);
    }

    /// The current visit, if it is to `pad`.
    fn visit_of(&mut self, pad: PadId) -> Option<&mut Visit> {
        self.visit.as_mut().filter(|visit| visit.pad.id() == pad)
    }
}

/// Send `UserInfo` for `id` unless this visit already has.
async fn describe(registry: &Registry, visit: &mut Visit, id: UserId, batch: &mut Vec<ServerMessage>) {
    if id == SYSTEM_USER || visit.described.contains(&id) {
        return;
    }
    let Some(user) = registry.user(id).await else {
        return;
    };
    let online = visit.pad.is_online(id).await;
    let info = UserInfo::describe(&user.read(), online, None);
    visit.described.insert(id);
    batch.push(ServerMessage::UserInfo(info));
}
