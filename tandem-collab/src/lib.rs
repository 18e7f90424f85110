//! # tandem-collab: real-time collaboration server for tandem pads
//!
//! Hosts named plain-text pads over WebSocket. Each pad keeps an ordered
//! delta history; concurrent edits are rebased onto the head with the
//! operational-transform engine in `tandem-core`.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   WebSocket    ┌──────────────────────────────┐
//! │ client      │ ◄────────────► │ server (one task per socket) │
//! └─────────────┘  bincode batch └──────┬─────────────────┬─────┘
//!                                       │ Session         │ Delivery
//!                                       ▼                 ▲ mailbox
//!                                ┌─────────────┐   offer()│
//!                                │  Registry   │──────────┤
//!                                │ pads/users  │          │
//!                                └──────┬──────┘          │
//!                                       ▼                 │
//!                                ┌─────────────┐──────────┘
//!                                │    Pad      │ history + chat + members
//!                                └──────┬──────┘
//!                                       │ PersistQueue (per pad)
//!                                       ▼
//!                                ┌─────────────┐
//!                                │  Storage    │ RocksDB / memory
//!                                └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: wire messages and batch framing
//! - [`mailbox`]: bounded per-client event queues with a drop-on-full fan-out path
//! - [`pad`]: delta history, snapshots, chat and membership of one pad
//! - [`persist`]: ordered background writes per pad
//! - [`registry`]: pads, users, clients and sessions
//! - [`session`]: per-connection request handling
//! - [`delivery`]: mailbox-to-socket batching
//! - [`server`]: WebSocket gateway
//! - [`storage`]: durable users, pads, chat and deltas

pub mod client;
pub mod config;
pub mod delivery;
pub mod mailbox;
pub mod pad;
pub mod persist;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod storage;
pub mod user;

// Re-exports for convenience
pub use client::{ClientHandle, ClientId, RemoteInfo};
pub use config::ServerConfig;
pub use delivery::{ChannelSink, Delivery, OutboundSink};
pub use mailbox::{mailbox, Event, MailboxReceiver, MailboxSender, MailboxStats};
pub use pad::{ChatEntry, Pad, PadError, PadId, RecordedDelta, Snapshot};
pub use persist::{PersistQueue, PersistStats};
pub use protocol::{
    decode_batch, encode_batch, AdminChanges, AuthCode, ClientMessage, ProfileChanges,
    ProtocolError, ServerMessage, UserInfo,
};
pub use registry::Registry;
pub use server::{CollabServer, GatewayError};
pub use session::{Session, SessionState};
pub use storage::{
    open_storage, MemoryStore, RocksStore, Storage, StoreConfig, StoreError, UserUpdate,
};
pub use user::{Permissions, SharedUser, User, UserId, SYSTEM_USER};
