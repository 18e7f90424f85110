//! Per-connection session state machine.
//!
//! ```text
//!                 Login / Register / GuestLogin / SessionResume
//! Unauthenticated ─────────────────────────────────────────────► Authenticated
//!        ▲                                                          │    ▲
//!        └──────────────────────── Logout ──────────────────────────┤    │ LeavePad
//!                                                         EnterPad  ▼    │
//!                                                                  InPad ─┘
//! ```
//!
//! The session owns the inbound side of a connection: it applies client
//! requests to pads and the registry and enqueues control events on its
//! own mailbox. Messages that fail a permission check are ignored.

use std::sync::Arc;

use tandem_core::{sanitize, Op};

use crate::client::{ClientHandle, ClientId, RemoteInfo};
use crate::mailbox::{mailbox, Event, MailboxReceiver};
use crate::pad::Pad;
use crate::protocol::{AdminChanges, AuthCode, ClientMessage, ProfileChanges};
use crate::registry::Registry;
use crate::storage::{is_valid_email, UserUpdate};
use crate::user::{Permissions, SharedUser, User, UserId};

/// Where a session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    InPad,
}

/// Inbound half of one client connection.
pub struct Session {
    registry: Arc<Registry>,
    handle: Arc<ClientHandle>,
    user: Option<SharedUser>,
    session_id: Option<String>,
    pad: Option<Arc<Pad>>,
}

impl Session {
    /// Register a new client. The receiver feeds its delivery loop.
    pub async fn connect(registry: Arc<Registry>, remote: RemoteInfo) -> (Self, MailboxReceiver) {
        let (tx, rx) = mailbox(registry.config().mailbox_capacity);
        let handle = Arc::new(ClientHandle::new(tx, remote));
        registry.register_client(handle.clone()).await;
        log::info!("Client {} connected from {}", handle.id, handle.remote.ip);

        let session = Self {
            registry,
            handle,
            user: None,
            session_id: None,
            pad: None,
        };
        (session, rx)
    }

    pub fn id(&self) -> ClientId {
        self.handle.id
    }

    pub fn handle(&self) -> &Arc<ClientHandle> {
        &self.handle
    }

    pub fn state(&self) -> SessionState {
        match (&self.user, &self.pad) {
            (None, _) => SessionState::Unauthenticated,
            (Some(_), None) => SessionState::Authenticated,
            (Some(_), Some(_)) => SessionState::InPad,
        }
    }

    /// A copy of the logged-in user.
    pub fn user(&self) -> Option<User> {
        self.user.as_ref().map(|user| user.read().clone())
    }

    pub fn pad(&self) -> Option<&Arc<Pad>> {
        self.pad.as_ref()
    }

    /// Apply one inbound frame, in order.
    pub async fn handle_batch(&mut self, batch: Vec<ClientMessage>) {
        for message in batch {
            self.handle_message(message).await;
        }
    }

    pub async fn handle_message(&mut self, message: ClientMessage) {
        match message {
            ClientMessage::Login { email, password } => {
                self.logout().await;
                let result = self.registry.login(&email, &password).await;
                self.authenticate(result, true).await;
            }
            ClientMessage::Register {
                email,
                password,
                nickname,
            } => {
                self.logout().await;
                let result = self.registry.register(&email, &password, &nickname).await;
                self.authenticate(result, true).await;
            }
            ClientMessage::GuestLogin => {
                self.logout().await;
                let guest = self.registry.create_guest().await;
                self.authenticate(Ok(guest), true).await;
            }
            ClientMessage::SessionResume { session_id } => {
                self.logout().await;
                match self.registry.resume_session(&session_id).await {
                    Some(user) => {
                        self.session_id = Some(session_id);
                        self.authenticate(Ok(user), false).await;
                    }
                    None => self.authenticate(Err(AuthCode::InvalidSession), false).await,
                }
            }
            ClientMessage::Logout => {
                self.logout().await;
                if let Some(id) = self.session_id.take() {
                    self.registry.end_session(&id).await;
                }
            }
            ClientMessage::EditUser { changes } => self.edit_user(changes).await,
            ClientMessage::EnterPad { name } => self.enter_pad(&name).await,
            ClientMessage::LeavePad => self.leave_pad(true).await,
            ClientMessage::Delta { base_revision, ops } => {
                self.submit_delta(base_revision, ops).await
            }
            ClientMessage::Chat { text } => {
                if let Some((user, pad)) = self.require(Permissions::CHAT) {
                    pad.send_chat(self.handle.id, &user, &text).await;
                }
            }
            ClientMessage::ChatRequest { from, count } => {
                if self.pad.is_some() {
                    self.deliver(Event::ChatRequest { from, count }).await;
                }
            }
            ClientMessage::RevisionRequest { revision } => {
                if self.pad.is_some() {
                    self.deliver(Event::RevisionRequest(revision)).await;
                }
            }
            ClientMessage::AdminUser { target, changes } => self.admin_user(target, changes).await,
            ClientMessage::InvertDelta { revision } => {
                if let Some((user, pad)) = self.require(Permissions::MOD) {
                    if let Err(e) = pad.invert_delta(user.id, revision).await {
                        log::warn!("Invert of revision {revision} on '{}' failed: {e}", pad.name());
                    }
                }
            }
            ClientMessage::InvertUserDelta { user_id } => {
                if let Some((user, pad)) = self.require(Permissions::MOD) {
                    if let Err(e) = pad.invert_user_delta(user.id, user_id).await {
                        log::warn!("Invert of user {user_id} on '{}' failed: {e}", pad.name());
                    }
                }
            }
            ClientMessage::RestoreRevision { revision } => {
                if let Some((user, pad)) = self.require(Permissions::MOD) {
                    if let Err(e) = pad.restore_revision(user.id, revision).await {
                        log::warn!("Restore of revision {revision} on '{}' failed: {e}", pad.name());
                    }
                }
            }
        }
    }

    /// Tear down after the socket closed.
    pub async fn close(mut self) {
        self.leave_pad(false).await;
        self.registry.remove_client(self.handle.id).await;
        self.deliver(Event::Close).await;
        log::info!("Client {} disconnected", self.handle.id);
    }

    // ─── Authentication ───────────────────────────────────────────────

    async fn authenticate(&mut self, result: Result<SharedUser, AuthCode>, mint_session: bool) {
        let user = match result {
            Ok(user) => user,
            Err(code) => {
                log::debug!("Client {} failed to authenticate: {code:?}", self.handle.id);
                self.deliver(Event::AuthError(code)).await;
                return;
            }
        };

        let session_id = if mint_session {
            let id = self.registry.create_session(user.clone()).await;
            self.session_id = Some(id.clone());
            Some(id)
        } else {
            None
        };
        let pads = self.registry.pad_names().await;
        self.user = Some(user.clone());
        self.deliver(Event::Welcome {
            user,
            session_id,
            pads,
        })
        .await;
    }

    async fn logout(&mut self) {
        self.leave_pad(true).await;
        self.user = None;
    }

    // ─── Pads ─────────────────────────────────────────────────────────

    async fn enter_pad(&mut self, name: &str) {
        let Some(user) = self.user.clone() else {
            log::debug!("Client {} entered a pad before logging in", self.handle.id);
            return;
        };
        let Some(pad) = self.registry.pad(name).await else {
            log::debug!("Client {} asked for invalid pad name {name:?}", self.handle.id);
            return;
        };

        self.leave_pad(true).await;
        // Join before queueing the backlog: anything recorded in between is
        // already part of the document the delivery loop will read.
        pad.join(self.handle.clone(), user).await;
        self.deliver(Event::EnterPad(pad.clone())).await;
        self.pad = Some(pad);
    }

    async fn leave_pad(&mut self, notify: bool) {
        if let Some(pad) = self.pad.take() {
            pad.leave(self.handle.id).await;
            if notify {
                self.deliver(Event::LeavePad).await;
            }
        }
    }

    async fn submit_delta(&mut self, base_revision: u32, ops: Vec<Op>) {
        let Some((user, pad)) = self.require(Permissions::WRITE) else {
            return;
        };
        let delta = sanitize(ops, user.id, user.can(Permissions::WHITEWASH));
        match pad.submit_delta(user.id, base_revision, delta).await {
            Ok(record) => log::debug!(
                "Pad '{}' revision {} by user {}",
                pad.name(),
                record.revision,
                user.id
            ),
            Err(e) => {
                log::warn!(
                    "Dropped delta from user {} on pad '{}' (base {base_revision}): {e}",
                    user.id,
                    pad.name()
                );
                let revision = pad.revision().await;
                self.deliver(Event::DeltaDropped { revision }).await;
            }
        }
    }

    // ─── Profiles ─────────────────────────────────────────────────────

    async fn edit_user(&mut self, changes: ProfileChanges) {
        let Some(shared) = self.user.clone() else {
            return;
        };
        let (id, is_guest) = {
            let user = shared.read();
            (user.id, user.is_guest())
        };

        let mut announce = false;
        if let Some(nickname) = changes.nickname {
            let nickname = nickname.trim();
            if !nickname.is_empty() {
                shared.write().nickname = nickname.to_string();
                self.registry
                    .persist_user(id, UserUpdate::Nickname(nickname.to_string()))
                    .await;
                announce = true;
            }
        }
        if let Some(color) = changes.color {
            shared.write().color = color;
            self.registry.persist_user(id, UserUpdate::Color(color)).await;
            announce = true;
        }
        if is_guest {
            if changes.email.is_some() || changes.password.is_some() {
                log::debug!("Guest {id} tried to set credentials");
            }
        } else {
            if let Some(email) = changes.email.as_deref().map(str::trim) {
                if is_valid_email(email) {
                    self.registry
                        .persist_user(id, UserUpdate::Email(email.to_string()))
                        .await;
                } else {
                    log::debug!("User {id} sent an unusable email");
                }
            }
            if let Some(password) = changes.password {
                self.registry.persist_user(id, UserUpdate::Password(password)).await;
            }
        }

        if announce {
            self.registry
                .broadcast(Event::UserChanged(id), Some(self.handle.id))
                .await;
        }
    }

    async fn admin_user(&mut self, target: UserId, changes: AdminChanges) {
        let Some(caller) = self.user() else {
            return;
        };
        let Some(shared) = self.registry.user(target).await else {
            log::debug!("User {} edited unknown user {target}", caller.id);
            return;
        };
        let current = shared.read().clone();

        let admin = caller.can(Permissions::ADMIN);
        let moderates = admin || (caller.can(Permissions::MOD) && !current.can(Permissions::ADMIN));
        let edit_profile = moderates || (caller.can(Permissions::NOT_GUEST) && current.is_guest());

        let mut announce = false;
        if edit_profile {
            if let Some(nickname) = changes.nickname {
                let nickname = nickname.trim();
                if !nickname.is_empty() {
                    shared.write().nickname = nickname.to_string();
                    self.registry
                        .persist_user(target, UserUpdate::Nickname(nickname.to_string()))
                        .await;
                    announce = true;
                }
            }
            if let Some(color) = changes.color {
                shared.write().color = color;
                self.registry.persist_user(target, UserUpdate::Color(color)).await;
                announce = true;
            }
        }
        if moderates {
            if let Some(bits) = changes.perms {
                let mut perms = Permissions::from_bits_truncate(bits) - Permissions::NOT_GUEST;
                perms |= current.perms & Permissions::NOT_GUEST;
                if !admin {
                    perms.remove(Permissions::ADMIN);
                }
                shared.write().perms = perms;
                self.registry.persist_user(target, UserUpdate::Perms(perms)).await;
                announce = true;
            }
        }
        if admin {
            if let Some(email) = changes.email.as_deref().map(str::trim) {
                if is_valid_email(email) {
                    self.registry
                        .persist_user(target, UserUpdate::Email(email.to_string()))
                        .await;
                } else {
                    log::debug!("User {} sent an unusable email for user {target}", caller.id);
                }
            }
            if let Some(password) = changes.password {
                self.registry.persist_user(target, UserUpdate::Password(password)).await;
            }
        }

        if announce {
            log::info!("User {} edited user {target}", caller.id);
            self.registry.broadcast(Event::UserChanged(target), None).await;
        } else {
            log::debug!("User {} made no permitted change to user {target}", caller.id);
        }
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    /// The current user and pad, if the user holds `perms` and is in a pad.
    fn require(&self, perms: Permissions) -> Option<(User, Arc<Pad>)> {
        let user = self.user()?;
        let pad = self.pad.clone()?;
        if user.can(perms) {
            Some((user, pad))
        } else {
            log::debug!(
                "User {} lacks {perms:?} on pad '{}', message ignored",
                user.id,
                pad.name()
            );
            None
        }
    }

    async fn deliver(&self, event: Event) {
        self.handle.mailbox.deliver(event).await;
    }
}
