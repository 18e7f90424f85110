//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::user::Permissions;

/// Tunables shared by the registry, pads, sessions and the gateway.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Pending events per client before fan-out starts dropping
    pub mailbox_capacity: usize,
    /// Pending writes per pad before producers wait
    pub persist_queue_capacity: usize,
    pub heartbeat_interval: Duration,
    /// Chat lines pushed on entering a pad
    pub chat_backlog: usize,
    pub session_ttl: Duration,
    /// Take the client ip from `X-Forwarded-For` (behind a reverse proxy)
    pub trust_forwarded_for: bool,
    /// Largest inbound frame accepted, in bytes
    pub max_message_size: usize,
    pub user_perms: Permissions,
    pub guest_perms: Permissions,
    /// RocksDB directory (None = in-memory only)
    pub storage_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            mailbox_capacity: 200,
            persist_queue_capacity: 200,
            heartbeat_interval: Duration::from_secs(54),
            chat_backlog: 50,
            session_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            trust_forwarded_for: false,
            max_message_size: 1024 * 1024,
            user_perms: Permissions::USER_DEFAULT,
            guest_perms: Permissions::GUEST_DEFAULT,
            storage_path: None,
        }
    }
}

impl ServerConfig {
    /// Small queues and a short heartbeat for tests.
    pub fn for_testing() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            mailbox_capacity: 64,
            persist_queue_capacity: 16,
            heartbeat_interval: Duration::from_secs(5),
            ..Self::default()
        }
    }
}
