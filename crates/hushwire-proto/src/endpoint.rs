//! Connection and lookup endpoints.
//!
//! `base` is the server origin without a trailing slash, e.g.
//! `wss://relay.example.org` for sockets. Tokens are passed as query
//! parameters because the deployed relay authenticates WebSocket upgrades
//! that way.

use serde::{Deserialize, Serialize};

/// URL of the per-conversation message channel between two accounts.
pub fn conversation_url(base: &str, sender: u64, receiver: u64, token: &str) -> String {
    format!("{base}/ws/chat/{sender}/{receiver}/?token={token}")
}

/// URL of the account-wide presence and notification channel.
pub fn global_url(base: &str, token: &str) -> String {
    format!("{base}/ws/global/?token={token}")
}

/// Path of the public-key lookup for `user_id`, relative to the HTTP origin.
pub fn public_key_path(user_id: u64) -> String {
    format!("/auth/user/{user_id}/public_key/")
}

/// Response body of the public-key lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyResponse {
    /// Hex-encoded X25519 public key (64 characters).
    pub public_key: String,
}
