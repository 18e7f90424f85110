//! Process-wide directories: pads by name, users by id, live clients and
//! resumable sessions.
//!
//! Each map has its own lock; pads carry their own locks for history and
//! chat, so contention stays per document.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::client::{ClientHandle, ClientId};
use crate::config::ServerConfig;
use crate::mailbox::Event;
use crate::pad::Pad;
use crate::persist::PersistQueue;
use crate::protocol::AuthCode;
use crate::storage::{is_valid_email, Storage, StoreError, UserUpdate};
use crate::user::{shared, Permissions, SharedUser, User, UserId};

struct SessionEntry {
    user: SharedUser,
    created: Instant,
}

/// Shared state of one server.
pub struct Registry {
    config: ServerConfig,
    storage: Arc<dyn Storage>,
    pads: RwLock<HashMap<String, Arc<Pad>>>,
    next_pad_id: AtomicU32,
    users: RwLock<HashMap<UserId, SharedUser>>,
    next_user_id: AtomicU32,
    clients: RwLock<HashMap<ClientId, Arc<ClientHandle>>>,
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl Registry {
    /// Load users and hydrate every stored pad.
    pub async fn open(
        config: ServerConfig,
        storage: Arc<dyn Storage>,
    ) -> Result<Arc<Self>, StoreError> {
        let stored_users = storage.load_users()?;
        let max_user = stored_users.iter().map(|user| user.id).max().unwrap_or(0);
        let users: HashMap<UserId, SharedUser> = stored_users
            .into_iter()
            .map(|user| (user.id, shared(user)))
            .collect();

        let mut pads = HashMap::new();
        let mut max_pad = 0;
        for (id, name) in storage.load_pads()? {
            let deltas = storage.load_deltas(id)?;
            let chat = storage.load_chat(id)?;
            let persist = PersistQueue::spawn(id, storage.clone(), config.persist_queue_capacity);
            let pad = Pad::hydrate(id, name.clone(), deltas, chat, persist);
            pads.insert(name, Arc::new(pad));
            max_pad = max_pad.max(id);
        }

        log::info!("Registry loaded {} users and {} pads", users.len(), pads.len());

        Ok(Arc::new(Self {
            config,
            storage,
            pads: RwLock::new(pads),
            next_pad_id: AtomicU32::new(max_pad + 1),
            users: RwLock::new(users),
            next_user_id: AtomicU32::new(max_user + 1),
            clients: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
        }))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Run a storage call on the blocking pool.
    async fn blocking<T, F>(&self, call: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Storage) -> Result<T, StoreError> + Send + 'static,
    {
        let storage = self.storage.clone();
        tokio::task::spawn_blocking(move || call(storage.as_ref()))
            .await
            .unwrap_or_else(|e| Err(StoreError::Io(e.to_string())))
    }

    // ─── Pads ─────────────────────────────────────────────────────────

    /// The pad called `name`, created on first use. `None` for an invalid
    /// name.
    pub async fn pad(&self, name: &str) -> Option<Arc<Pad>> {
        let name = validate_pad_name(name)?;

        // Fast path: read lock
        {
            let pads = self.pads.read().await;
            if let Some(pad) = pads.get(name) {
                return Some(pad.clone());
            }
        }

        let pad = {
            let mut pads = self.pads.write().await;
            // Double-check after acquiring write lock
            if let Some(pad) = pads.get(name) {
                return Some(pad.clone());
            }

            let id = self.next_pad_id.fetch_add(1, Ordering::Relaxed);
            let stored = name.to_string();
            if let Err(e) = self
                .blocking(move |storage| storage.insert_pad(id, &stored))
                .await
            {
                log::error!("Failed to store pad '{name}': {e}");
            }
            let persist =
                PersistQueue::spawn(id, self.storage.clone(), self.config.persist_queue_capacity);
            let pad = Arc::new(Pad::new(id, name, persist));
            pads.insert(name.to_string(), pad.clone());
            pad
        };

        log::info!("Created pad '{name}' ({})", pad.id());
        self.broadcast(Event::PadCreated(name.to_string()), None).await;
        Some(pad)
    }

    /// Look up a pad without creating it.
    pub async fn existing_pad(&self, name: &str) -> Option<Arc<Pad>> {
        self.pads.read().await.get(name.trim()).cloned()
    }

    /// All pad names, sorted.
    pub async fn pad_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pads.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    // ─── Users ────────────────────────────────────────────────────────

    pub async fn user(&self, id: UserId) -> Option<SharedUser> {
        self.users.read().await.get(&id).cloned()
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<SharedUser, AuthCode> {
        let email = email.trim().to_string();
        let password = password.to_string();
        match self
            .blocking(move |storage| storage.login(&email, &password))
            .await
        {
            Ok(Some(id)) => self.user(id).await.ok_or_else(|| {
                log::error!("User {id} has credentials but no profile");
                AuthCode::Internal
            }),
            Ok(None) => Err(AuthCode::InvalidCredentials),
            Err(e) => {
                log::error!("Login lookup failed: {e}");
                Err(AuthCode::Internal)
            }
        }
    }

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        nickname: &str,
    ) -> Result<SharedUser, AuthCode> {
        let email = email.trim();
        if !is_valid_email(email) {
            return Err(AuthCode::InvalidEmail);
        }
        if password.is_empty() {
            return Err(AuthCode::InvalidCredentials);
        }

        let id = self.next_user_id.fetch_add(1, Ordering::Relaxed);
        let nickname = match nickname.trim() {
            "" => format!("user-{id}"),
            trimmed => trimmed.to_string(),
        };
        let user = User::new(id, nickname, self.config.user_perms | Permissions::NOT_GUEST);

        let (stored_email, stored_password, record) =
            (email.to_string(), password.to_string(), user.clone());
        let registered = self
            .blocking(move |storage| storage.register(&stored_email, &stored_password, &record))
            .await;
        match registered {
            Ok(true) => {
                log::info!("Registered user {id} ({})", user.nickname);
                let user = shared(user);
                self.users.write().await.insert(id, user.clone());
                Ok(user)
            }
            Ok(false) => Err(AuthCode::InvalidEmail),
            Err(e) => {
                log::error!("Failed to register {email}: {e}");
                Err(AuthCode::Internal)
            }
        }
    }

    pub async fn create_guest(&self) -> SharedUser {
        let id = self.next_user_id.fetch_add(1, Ordering::Relaxed);
        let user = User::guest(id, self.config.guest_perms);
        let record = user.clone();
        if let Err(e) = self
            .blocking(move |storage| storage.register_guest(&record))
            .await
        {
            log::error!("Failed to store guest {id}: {e}");
        }
        let user = shared(user);
        self.users.write().await.insert(id, user.clone());
        user
    }

    /// Persist one field change. Errors are logged and reported as false.
    pub async fn persist_user(&self, id: UserId, update: UserUpdate) -> bool {
        match self
            .blocking(move |storage| storage.update_user(id, &update))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                log::error!("Failed to update user {id}: {e}");
                false
            }
        }
    }

    // ─── Sessions ─────────────────────────────────────────────────────

    /// Mint a session id for `user`. Expired sessions are swept first.
    pub async fn create_session(&self, user: SharedUser) -> String {
        let id = Uuid::new_v4().simple().to_string();
        let ttl = self.config.session_ttl;
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| entry.created.elapsed() <= ttl);
        if sessions.len() < before {
            log::debug!("Swept {} expired sessions", before - sessions.len());
        }
        sessions.insert(
            id.clone(),
            SessionEntry {
                user,
                created: Instant::now(),
            },
        );
        id
    }

    /// The user behind a live session id. Expired sessions are removed.
    pub async fn resume_session(&self, id: &str) -> Option<SharedUser> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get(id)?;
        if entry.created.elapsed() > self.config.session_ttl {
            sessions.remove(id);
            return None;
        }
        Some(entry.user.clone())
    }

    pub async fn end_session(&self, id: &str) {
        self.sessions.write().await.remove(id);
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    // ─── Clients ──────────────────────────────────────────────────────

    pub async fn register_client(&self, handle: Arc<ClientHandle>) {
        self.clients.write().await.insert(handle.id, handle);
    }

    pub async fn remove_client(&self, id: ClientId) {
        self.clients.write().await.remove(&id);
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Offer `event` to every live client except `except`.
    pub async fn broadcast(&self, event: Event, except: Option<ClientId>) {
        let clients = self.clients.read().await;
        for (id, client) in clients.iter() {
            if Some(*id) != except {
                client.mailbox.offer(event.clone());
            }
        }
    }
}

/// Trimmed pad name, or `None` when empty or path-like.
pub fn validate_pad_name(name: &str) -> Option<&str> {
    let name = name.trim();
    if name.is_empty() || name.contains('/') || name.contains('.') {
        None
    } else {
        Some(name)
    }
}
