//! RocksDB-backed storage.
//!
//! Column families:
//! - `users` : id (u32 BE) → user record (bincode)
//! - `emails`: email → salted credential (bincode)
//! - `pads`  : id (u32 BE) → pad name (UTF-8)
//! - `chat`  : pad id ++ chat id (u32 BE each) → chat entry (bincode, LZ4)
//! - `deltas`: pad id ++ revision (u32 BE each) → recorded delta (bincode, LZ4)
//!
//! Big-endian keys make a forward prefix scan return a pad's chat and
//! history already sorted.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    Direction, IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{Credential, Storage, StoreError, UserUpdate};
use crate::pad::{ChatEntry, PadId, RecordedDelta};
use crate::user::{User, UserId};

const CF_USERS: &str = "users";
const CF_EMAILS: &str = "emails";
const CF_PADS: &str = "pads";
const CF_CHAT: &str = "chat";
const CF_DELTAS: &str = "deltas";

const COLUMN_FAMILIES: &[&str] = &[CF_USERS, CF_EMAILS, CF_PADS, CF_CHAT, CF_DELTAS];

/// RocksDB tuning.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync every write (default: false)
    pub sync_writes: bool,
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 32MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("tandem_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 512,
            write_buffer_size: 32 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Small caches for tests.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// What the `users` family holds per user.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserRecord {
    user: User,
    /// None for guests.
    email: Option<String>,
}

/// RocksDB implementation of [`Storage`].
pub struct RocksStore {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
    /// Serializes read-check-write sequences on the `emails` family.
    accounts: Mutex<()>,
}

impl RocksStore {
    /// Open the database, creating it and its column families if missing.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(num_cpus());

        let cache = Cache::new_lru_cache(config.block_cache_size);
        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config, &cache)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        Ok(Self {
            db,
            config,
            accounts: Mutex::new(()),
        })
    }

    fn cf_options(name: &str, config: &StoreConfig, cache: &Cache) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        block_opts.set_block_cache(cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        block_opts.set_block_size(16 * 1024);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_CHAT | CF_DELTAS => {
                // Values are already LZ4 framed; scanned by pad prefix.
                opts.set_compression_type(DBCompressionType::None);
                opts.set_max_write_buffer_number(4);
                opts.set_prefix_extractor(rocksdb::SliceTransform::create_fixed_prefix(4));
            }
            _ => {
                opts.set_compression_type(DBCompressionType::Lz4);
                opts.set_max_write_buffer_number(2);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
        }
        opts
    }

    /// Force memtables to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family '{name}' not found")))
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;
        Ok(())
    }

    fn load_record(&self, id: UserId) -> Result<UserRecord, StoreError> {
        let cf = self.cf(CF_USERS)?;
        match self.db.get_cf(&cf, id.to_be_bytes())? {
            Some(bytes) => decode(&bytes),
            None => Err(StoreError::UnknownUser(id)),
        }
    }

    fn load_credential(&self, email: &str) -> Result<Option<Credential>, StoreError> {
        let cf = self.cf(CF_EMAILS)?;
        self.db
            .get_cf(&cf, email.as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn put(&self, name: &str, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let cf = self.cf(name)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf, key, value);
        self.write(batch)
    }

    /// Every value under `pad`'s prefix, in key order. Values that fail to
    /// decode are logged and skipped so hydration can fill the hole.
    fn scan_pad<T: DeserializeOwned>(&self, name: &str, pad: PadId) -> Result<Vec<T>, StoreError> {
        let cf = self.cf(name)?;
        let prefix = pad.to_be_bytes();
        let start = pad_key(pad, 0);

        let mut values = Vec::new();
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&start, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if key.len() != 8 || key[..4] != prefix {
                break;
            }
            match unpack(&value) {
                Ok(decoded) => values.push(decoded),
                Err(e) => {
                    let id = u32::from_be_bytes([key[4], key[5], key[6], key[7]]);
                    log::warn!("Skipping unreadable {name} entry {id} of pad {pad}: {e}");
                }
            }
        }
        Ok(values)
    }
}

impl Storage for RocksStore {
    fn load_users(&self) -> Result<Vec<User>, StoreError> {
        let cf = self.cf(CF_USERS)?;
        let mut users = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            let record: UserRecord = decode(&value)?;
            users.push(record.user);
        }
        Ok(users)
    }

    fn load_pads(&self) -> Result<Vec<(PadId, String)>, StoreError> {
        let cf = self.cf(CF_PADS)?;
        let mut pads = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, value) = item?;
            let id = key
                .as_ref()
                .try_into()
                .map(u32::from_be_bytes)
                .map_err(|_| StoreError::Deserialization("invalid pad key".into()))?;
            let name = String::from_utf8(value.to_vec())
                .map_err(|e| StoreError::Deserialization(e.to_string()))?;
            pads.push((id, name));
        }
        Ok(pads)
    }

    fn login(&self, email: &str, password: &str) -> Result<Option<UserId>, StoreError> {
        Ok(self
            .load_credential(email)?
            .filter(|credential| credential.verify(password))
            .map(|credential| credential.user))
    }

    fn register(&self, email: &str, password: &str, user: &User) -> Result<bool, StoreError> {
        let _guard = self.accounts.lock();
        if self.load_credential(email)?.is_some() {
            return Ok(false);
        }

        let record = UserRecord {
            user: user.clone(),
            email: Some(email.to_string()),
        };
        let cf_users = self.cf(CF_USERS)?;
        let cf_emails = self.cf(CF_EMAILS)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_users, user.id.to_be_bytes(), encode(&record)?);
        batch.put_cf(&cf_emails, email.as_bytes(), encode(&Credential::new(user.id, password))?);
        self.write(batch)?;
        Ok(true)
    }

    fn register_guest(&self, user: &User) -> Result<(), StoreError> {
        let record = UserRecord {
            user: user.clone(),
            email: None,
        };
        self.put(CF_USERS, &user.id.to_be_bytes(), &encode(&record)?)
    }

    fn update_user(&self, id: UserId, update: &UserUpdate) -> Result<(), StoreError> {
        let _guard = self.accounts.lock();
        let mut record = self.load_record(id)?;
        let cf_users = self.cf(CF_USERS)?;
        let cf_emails = self.cf(CF_EMAILS)?;
        let mut batch = WriteBatch::default();

        match update {
            UserUpdate::Nickname(nickname) => record.user.nickname = nickname.clone(),
            UserUpdate::Color(color) => record.user.color = *color,
            UserUpdate::Perms(perms) => record.user.perms = *perms,
            UserUpdate::Email(email) => {
                if self.load_credential(email)?.is_some() {
                    return Err(StoreError::EmailTaken(email.clone()));
                }
                let old = record.email.clone().ok_or(StoreError::UnknownUser(id))?;
                let credential = self
                    .load_credential(&old)?
                    .ok_or(StoreError::UnknownUser(id))?;
                batch.delete_cf(&cf_emails, old.as_bytes());
                batch.put_cf(&cf_emails, email.as_bytes(), encode(&credential)?);
                record.email = Some(email.clone());
            }
            UserUpdate::Password(password) => {
                let email = record.email.clone().ok_or(StoreError::UnknownUser(id))?;
                let credential = self
                    .load_credential(&email)?
                    .ok_or(StoreError::UnknownUser(id))?;
                batch.put_cf(&cf_emails, email.as_bytes(), encode(&credential.with_password(password))?);
            }
        }

        batch.put_cf(&cf_users, id.to_be_bytes(), encode(&record)?);
        self.write(batch)
    }

    fn insert_pad(&self, id: PadId, name: &str) -> Result<(), StoreError> {
        self.put(CF_PADS, &id.to_be_bytes(), name.as_bytes())
    }

    fn append_chat(&self, pad: PadId, entry: &ChatEntry) -> Result<(), StoreError> {
        self.put(CF_CHAT, &pad_key(pad, entry.id), &pack(entry)?)
    }

    fn append_delta(&self, pad: PadId, record: &RecordedDelta) -> Result<(), StoreError> {
        self.put(CF_DELTAS, &pad_key(pad, record.revision), &pack(record)?)
    }

    fn load_chat(&self, pad: PadId) -> Result<Vec<ChatEntry>, StoreError> {
        self.scan_pad(CF_CHAT, pad)
    }

    fn load_deltas(&self, pad: PadId) -> Result<Vec<RecordedDelta>, StoreError> {
        self.scan_pad(CF_DELTAS, pad)
    }
}

/// pad id (4 bytes BE) + entry id (4 bytes BE)
fn pad_key(pad: PadId, id: u32) -> [u8; 8] {
    let mut key = [0u8; 8];
    key[..4].copy_from_slice(&pad.to_be_bytes());
    key[4..].copy_from_slice(&id.to_be_bytes());
    key
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| StoreError::Deserialization(e.to_string()))?;
    Ok(value)
}

fn pack<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    Ok(lz4_flex::compress_prepend_size(&encode(value)?))
}

fn unpack<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    let raw = lz4_flex::decompress_size_prepended(bytes)
        .map_err(|e| StoreError::Compression(e.to_string()))?;
    decode(&raw)
}

fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}
