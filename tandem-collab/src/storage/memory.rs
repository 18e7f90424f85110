//! Process-local storage backend.
//!
//! Used by tests and by `tandem-server --memory`. Holds everything behind
//! one mutex; contention is irrelevant at the volumes it serves.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;

use super::{Credential, Storage, StoreError, UserUpdate};
use crate::pad::{ChatEntry, PadId, RecordedDelta};
use crate::user::{User, UserId};

#[derive(Default)]
struct Inner {
    users: BTreeMap<UserId, User>,
    /// email → credential
    credentials: HashMap<String, Credential>,
    pads: BTreeMap<PadId, String>,
    chat: HashMap<PadId, BTreeMap<u32, ChatEntry>>,
    deltas: HashMap<PadId, BTreeMap<u32, RecordedDelta>>,
}

impl Inner {
    fn email_of(&self, id: UserId) -> Option<String> {
        self.credentials
            .iter()
            .find(|(_, credential)| credential.user == id)
            .map(|(email, _)| email.clone())
    }
}

/// In-memory [`Storage`].
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStore {
    fn load_users(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.inner.lock().users.values().cloned().collect())
    }

    fn load_pads(&self) -> Result<Vec<(PadId, String)>, StoreError> {
        Ok(self
            .inner
            .lock()
            .pads
            .iter()
            .map(|(id, name)| (*id, name.clone()))
            .collect())
    }

    fn login(&self, email: &str, password: &str) -> Result<Option<UserId>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .credentials
            .get(email)
            .filter(|credential| credential.verify(password))
            .map(|credential| credential.user))
    }

    fn register(&self, email: &str, password: &str, user: &User) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        if inner.credentials.contains_key(email) {
            return Ok(false);
        }
        inner
            .credentials
            .insert(email.to_string(), Credential::new(user.id, password));
        inner.users.insert(user.id, user.clone());
        Ok(true)
    }

    fn register_guest(&self, user: &User) -> Result<(), StoreError> {
        self.inner.lock().users.insert(user.id, user.clone());
        Ok(())
    }

    fn update_user(&self, id: UserId, update: &UserUpdate) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        let user = inner.users.get_mut(&id).ok_or(StoreError::UnknownUser(id))?;
        match update {
            UserUpdate::Nickname(nickname) => user.nickname = nickname.clone(),
            UserUpdate::Color(color) => user.color = *color,
            UserUpdate::Perms(perms) => user.perms = *perms,
            UserUpdate::Email(email) => {
                if inner.credentials.contains_key(email) {
                    return Err(StoreError::EmailTaken(email.clone()));
                }
                let old = inner.email_of(id).ok_or(StoreError::UnknownUser(id))?;
                if let Some(credential) = inner.credentials.remove(&old) {
                    inner.credentials.insert(email.clone(), credential);
                }
            }
            UserUpdate::Password(password) => {
                let email = inner.email_of(id).ok_or(StoreError::UnknownUser(id))?;
                if let Some(credential) = inner.credentials.get_mut(&email) {
                    *credential = credential.with_password(password);
                }
            }
        }
        Ok(())
    }

    fn insert_pad(&self, id: PadId, name: &str) -> Result<(), StoreError> {
        self.inner.lock().pads.insert(id, name.to_string());
        Ok(())
    }

    fn append_chat(&self, pad: PadId, entry: &ChatEntry) -> Result<(), StoreError> {
        self.inner
            .lock()
            .chat
            .entry(pad)
            .or_default()
            .insert(entry.id, entry.clone());
        Ok(())
    }

    fn append_delta(&self, pad: PadId, record: &RecordedDelta) -> Result<(), StoreError> {
        self.inner
            .lock()
            .deltas
            .entry(pad)
            .or_default()
            .insert(record.revision, record.clone());
        Ok(())
    }

    fn load_chat(&self, pad: PadId) -> Result<Vec<ChatEntry>, StoreError> {
        Ok(self
            .inner
            .lock()
            .chat
            .get(&pad)
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default())
    }

    fn load_deltas(&self, pad: PadId) -> Result<Vec<RecordedDelta>, StoreError> {
        Ok(self
            .inner
            .lock()
            .deltas
            .get(&pad)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }
}
