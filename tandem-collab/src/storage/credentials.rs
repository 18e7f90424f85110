//! Salted password digests.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::user::UserId;

/// A stored login: owning user plus SHA-256 of `salt ++ password`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub user: UserId,
    salt: [u8; 16],
    digest: [u8; 32],
}

impl Credential {
    pub fn new(user: UserId, password: &str) -> Self {
        let salt = *Uuid::new_v4().as_bytes();
        Self {
            user,
            salt,
            digest: digest(&salt, password),
        }
    }

    /// Same owner, new password and salt.
    pub fn with_password(&self, password: &str) -> Self {
        Self::new(self.user, password)
    }

    pub fn verify(&self, password: &str) -> bool {
        let candidate = digest(&self.salt, password);
        // Constant-time comparison.
        candidate
            .iter()
            .zip(self.digest.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

fn digest(salt: &[u8; 16], password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize().into()
}
