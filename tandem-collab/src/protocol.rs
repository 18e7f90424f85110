//! Wire protocol between editor clients and the server.
//!
//! Every WebSocket binary frame carries one batch of messages:
//! ```text
//! client ──► server   Vec<ClientMessage>   (bincode, standard config)
//! server ──► client   Vec<ServerMessage>
//! ```
//!
//! Both enums are closed; adding a message is a protocol change.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tandem_core::{Delta, Op};
use thiserror::Error;

use crate::client::RemoteInfo;
use crate::user::{User, UserId};

/// Requests sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    Login {
        email: String,
        password: String,
    },
    Register {
        email: String,
        password: String,
        nickname: String,
    },
    GuestLogin,
    SessionResume {
        session_id: String,
    },
    Logout,
    EditUser {
        changes: ProfileChanges,
    },
    EnterPad {
        name: String,
    },
    LeavePad,
    Delta {
        base_revision: u32,
        ops: Vec<Op>,
    },
    Chat {
        text: String,
    },
    /// Chat lines `from - count + 1 ..= from`.
    ChatRequest {
        from: u32,
        count: u32,
    },
    RevisionRequest {
        revision: u32,
    },
    AdminUser {
        target: UserId,
        changes: AdminChanges,
    },
    InvertDelta {
        revision: u32,
    },
    InvertUserDelta {
        user_id: UserId,
    },
    RestoreRevision {
        revision: u32,
    },
}

/// Fields a user may change on their own profile. Absent fields are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileChanges {
    pub nickname: Option<String>,
    pub color: Option<u32>,
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Fields a privileged user may change on another user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminChanges {
    pub nickname: Option<String>,
    pub color: Option<u32>,
    /// Raw permission bits.
    pub perms: Option<u32>,
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Messages pushed to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    Auth {
        user_id: UserId,
        nickname: String,
        color: u32,
        perms: u32,
        /// Present only when a new session was minted.
        session_id: Option<String>,
    },
    AuthError {
        code: AuthCode,
    },
    PadList {
        names: Vec<String>,
    },
    UserInfo(UserInfo),
    UserLeave {
        id: UserId,
    },
    Chat {
        id: u32,
        user_id: UserId,
        text: String,
    },
    Delta {
        id: u32,
        user_id: UserId,
        ops: Delta,
    },
    Document {
        revision: u32,
        ops: Delta,
    },
    /// The last submitted delta was rejected; the client must resync from
    /// `revision`.
    DeltaDropped {
        revision: u32,
    },
}

/// Outcome codes for authentication requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum AuthCode {
    Success = 0,
    InvalidCredentials = 1,
    /// Malformed or already registered email.
    InvalidEmail = 2,
    Internal = 3,
    /// Unknown or expired session id.
    InvalidSession = 4,
}

impl AuthCode {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Description of a user as shown to other clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: UserId,
    pub nickname: String,
    pub color: u32,
    pub perms: u32,
    pub online: bool,
    /// Only sent to moderators.
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl UserInfo {
    /// Describe `user`, revealing `remote` only when one is given.
    pub fn describe(user: &User, online: bool, remote: Option<&RemoteInfo>) -> Self {
        Self {
            id: user.id,
            nickname: user.nickname.clone(),
            color: user.color,
            perms: user.perms.bits(),
            online,
            ip: remote.map(|r| r.ip.clone()),
            user_agent: remote.map(|r| r.user_agent.clone()),
        }
    }
}

/// Protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Encode one frame's worth of messages.
pub fn encode_batch<T: Serialize>(batch: &[T]) -> Result<Vec<u8>, ProtocolError> {
    bincode::serde::encode_to_vec(batch, bincode::config::standard())
        .map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Decode one frame into its messages. Trailing bytes are an error.
pub fn decode_batch<T: DeserializeOwned>(bytes: &[u8]) -> Result<Vec<T>, ProtocolError> {
    let (batch, read): (Vec<T>, usize) =
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Decode(e.to_string()))?;
    if read != bytes.len() {
        return Err(ProtocolError::Decode(format!(
            "{} trailing bytes after batch",
            bytes.len() - read
        )));
    }
    Ok(batch)
}
