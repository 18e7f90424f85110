//! Users and permission bits.
//!
//! Users are loaded from storage at startup and cached by id in the
//! [`Registry`](crate::registry::Registry). Every live reference goes
//! through a [`SharedUser`], so a profile or permission edit is visible to
//! all of that user's sessions and pad memberships at once.

use std::sync::Arc;

use bitflags::bitflags;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use tandem_core::UserId;

/// Author id of entries the server records on nobody's behalf.
pub const SYSTEM_USER: UserId = 0;

bitflags! {
    /// Capabilities granted to a user.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Permissions: u32 {
        /// Registered account (absent for guests).
        const NOT_GUEST = 1;
        const CHAT = 2;
        const WRITE = 4;
        const EDIT = 8;
        /// May attribute retained text to other users.
        const WHITEWASH = 16;
        const MOD = 32;
        const ADMIN = 64;
    }
}

impl Permissions {
    /// Default grant for registered users.
    pub const USER_DEFAULT: Permissions = Permissions::NOT_GUEST
        .union(Permissions::CHAT)
        .union(Permissions::WRITE)
        .union(Permissions::EDIT);

    /// Default grant for guests.
    pub const GUEST_DEFAULT: Permissions = Permissions::CHAT.union(Permissions::WRITE);
}

/// A user as cached in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub nickname: String,
    /// 0xRRGGBB
    pub color: u32,
    pub perms: Permissions,
}

impl User {
    pub fn new(id: UserId, nickname: impl Into<String>, perms: Permissions) -> Self {
        Self {
            id,
            nickname: nickname.into(),
            color: random_color(),
            perms,
        }
    }

    /// A fresh guest named `guest-<id>`.
    pub fn guest(id: UserId, perms: Permissions) -> Self {
        Self::new(id, format!("guest-{id}"), perms - Permissions::NOT_GUEST)
    }

    pub fn is_guest(&self) -> bool {
        !self.perms.contains(Permissions::NOT_GUEST)
    }

    pub fn can(&self, perms: Permissions) -> bool {
        self.perms.contains(perms)
    }

    /// How chat lines from this user are prefixed.
    pub fn chat_line(&self, text: &str) -> String {
        if self.is_guest() {
            format!("{} (guest): {text}", self.nickname)
        } else {
            format!("{}: {text}", self.nickname)
        }
    }
}

/// A cached user shared by every session logged in as it.
pub type SharedUser = Arc<RwLock<User>>;

pub fn shared(user: User) -> SharedUser {
    Arc::new(RwLock::new(user))
}

/// A random 24-bit color.
pub fn random_color() -> u32 {
    (Uuid::new_v4().as_u128() & 0x00FF_FFFF) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guest_profile() {
        let guest = User::guest(7, Permissions::GUEST_DEFAULT | Permissions::NOT_GUEST);
        assert_eq!(guest.nickname, "guest-7");
        assert!(guest.is_guest());
        assert!(guest.can(Permissions::CHAT | Permissions::WRITE));
        assert!(guest.color <= 0x00FF_FFFF);
    }

    #[test]
    fn test_chat_line_marks_guests() {
        let alice = User::new(1, "alice", Permissions::USER_DEFAULT);
        let guest = User::guest(2, Permissions::GUEST_DEFAULT);
        assert_eq!(alice.chat_line("hi"), "alice: hi");
        assert_eq!(guest.chat_line("hi"), "guest-2 (guest): hi");
    }

    #[test]
    fn test_permission_bits() {
        assert_eq!(Permissions::USER_DEFAULT.bits(), 15);
        assert_eq!(Permissions::GUEST_DEFAULT.bits(), 6);
        assert_eq!(Permissions::all().bits(), 127);
        assert_eq!(Permissions::from_bits_truncate(0xFF).bits(), 127);
    }
}
