//! Server-side view of a connected client.

use uuid::Uuid;

use crate::mailbox::MailboxSender;

/// Stable identity of one connection, used to key pad membership.
pub type ClientId = Uuid;

/// Where a connection comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteInfo {
    pub ip: String,
    pub user_agent: String,
}

impl RemoteInfo {
    pub fn new(ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            user_agent: user_agent.into(),
        }
    }
}

/// What pads and the registry hold on to for a live client: its id, its
/// mailbox and its origin.
#[derive(Debug)]
pub struct ClientHandle {
    pub id: ClientId,
    pub mailbox: MailboxSender,
    pub remote: RemoteInfo,
}

impl ClientHandle {
    pub fn new(mailbox: MailboxSender, remote: RemoteInfo) -> Self {
        Self {
            id: Uuid::new_v4(),
            mailbox,
            remote,
        }
    }
}
