//! Durable storage contract and its backends.
//!
//! ```text
//! ┌──────────────┐ append_delta / append_chat ┌───────────────────────┐
//! │ PersistQueue │ ─────────────────────────► │ Arc<dyn Storage>      │
//! │ (per pad)    │                            │  ├─ MemoryStore       │
//! └──────────────┘                            │  └─ RocksStore        │
//! ┌──────────────┐ load_* / login / register  │      users, emails,   │
//! │ Registry     │ ─────────────────────────► │      pads, chat,      │
//! └──────────────┘                            │      deltas (LZ4)     │
//!                                             └───────────────────────┘
//! ```
//!
//! The contract is synchronous. Once the server runs, every call goes
//! through `spawn_blocking`; only the startup loads in `Registry::open`
//! run inline.

pub mod credentials;
pub mod memory;
pub mod rocks;

use std::sync::Arc;

use thiserror::Error;

use crate::config::ServerConfig;
use crate::pad::{ChatEntry, PadId, RecordedDelta};
use crate::user::{Permissions, User, UserId};

pub use credentials::Credential;
pub use memory::MemoryStore;
pub use rocks::{RocksStore, StoreConfig};

/// Storage errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
    #[error("compression error: {0}")]
    Compression(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("unknown user {0}")]
    UnknownUser(UserId),
    #[error("email already registered: {0}")]
    EmailTaken(String),
}

/// A single field change on a stored user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserUpdate {
    Nickname(String),
    Color(u32),
    Perms(Permissions),
    Email(String),
    Password(String),
}

/// Durable home of users, pads, chat and history.
pub trait Storage: Send + Sync {
    fn load_users(&self) -> Result<Vec<User>, StoreError>;

    /// All pads as `(id, name)`, sorted by id.
    fn load_pads(&self) -> Result<Vec<(PadId, String)>, StoreError>;

    /// The user owning `email`, if `password` matches.
    fn login(&self, email: &str, password: &str) -> Result<Option<UserId>, StoreError>;

    /// Store a new account. Returns false when `email` is already taken.
    fn register(&self, email: &str, password: &str, user: &User) -> Result<bool, StoreError>;

    fn register_guest(&self, user: &User) -> Result<(), StoreError>;

    fn update_user(&self, id: UserId, update: &UserUpdate) -> Result<(), StoreError>;

    fn insert_pad(&self, id: PadId, name: &str) -> Result<(), StoreError>;

    fn append_chat(&self, pad: PadId, entry: &ChatEntry) -> Result<(), StoreError>;

    fn append_delta(&self, pad: PadId, record: &RecordedDelta) -> Result<(), StoreError>;

    /// A pad's chat, sorted by id.
    fn load_chat(&self, pad: PadId) -> Result<Vec<ChatEntry>, StoreError>;

    /// A pad's history, sorted by revision.
    fn load_deltas(&self, pad: PadId) -> Result<Vec<RecordedDelta>, StoreError>;
}

/// Open the backend selected by `config`: RocksDB when a storage path is
/// set, otherwise process memory.
pub fn open_storage(config: &ServerConfig) -> Result<Arc<dyn Storage>, StoreError> {
    match &config.storage_path {
        Some(path) => {
            let store = RocksStore::open(StoreConfig {
                path: path.clone(),
                ..StoreConfig::default()
            })?;
            log::info!("Opened RocksDB store at {}", path.display());
            Ok(Arc::new(store))
        }
        None => {
            log::info!("Using in-memory store; nothing will survive a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Cheap shape check; deliverability is not our concern.
pub fn is_valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_shape() {
        assert!(is_valid_email("a@b.c"));
        assert!(!is_valid_email("plain"));
        assert!(!is_valid_email("@b.c"));
        assert!(!is_valid_email("a@"));
        assert!(!is_valid_email("a@b@c"));
        assert!(!is_valid_email("a b@c"));
    }

    #[test]
    fn test_open_storage_in_memory() {
        let store = open_storage(&ServerConfig::for_testing()).unwrap();
        assert!(store.load_pads().unwrap().is_empty());
    }

    #[test]
    fn test_open_storage_rocks() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            storage_path: Some(dir.path().join("db")),
            ..ServerConfig::for_testing()
        };
        let store = open_storage(&config).unwrap();
        store.insert_pad(1, "alpha").unwrap();
        assert_eq!(store.load_pads().unwrap(), vec![(1, "alpha".to_string())]);
    }
}
