//! Peer public key lookup.
//!
//! The deployed relay exposes key lookup over HTTP (see
//! `hushwire_proto::endpoint::public_key_path`); this trait is the seam so
//! the core client does not carry an HTTP stack. Hosts plug in their own
//! fetcher; tests use [`MemoryDirectory`].

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use hushwire_core::conversation::UserId;
use thiserror::Error;
use tokio::sync::Mutex;

/// Peer key lookup failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("key directory: {reason}")]
pub struct DirectoryError {
    /// What went wrong.
    pub reason: String,
}

/// Source of peer public keys.
#[async_trait]
pub trait PeerKeyDirectory: Send + Sync + 'static {
    /// Fetch the hex-encoded X25519 public key of `user`.
    async fn fetch_public_key(&self, user: UserId) -> Result<String, DirectoryError>;
}

/// In-memory directory for tests and fixed-roster deployments.
///
/// Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    keys: Arc<Mutex<HashMap<UserId, String>>>,
}

impl MemoryDirectory {
    /// Empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a user's public key.
    pub async fn insert(&self, user: UserId, public_key_hex: impl Into<String>) {
        self.keys.lock().await.insert(user, public_key_hex.into());
    }

    /// Remove a user's public key, simulating a vanished account.
    pub async fn remove(&self, user: UserId) {
        self.keys.lock().await.remove(&user);
    }
}

#[async_trait]
impl PeerKeyDirectory for MemoryDirectory {
    async fn fetch_public_key(&self, user: UserId) -> Result<String, DirectoryError> {
        self.keys.lock().await.get(&user).cloned().ok_or_else(|| DirectoryError {
            reason: format!("no public key registered for user {user}"),
        })
    }
}
