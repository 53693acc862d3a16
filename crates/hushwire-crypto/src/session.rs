//! Per-peer shared secrets and per-message key derivation.
//!
//! Two accounts share one static Diffie-Hellman secret. Each message then
//! gets its own AES key by hashing that secret together with a fresh
//! ephemeral public key that rides along with the ciphertext.

use std::fmt;

use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::identity::{IdentityKeyPair, KEY_SIZE};

/// The static Diffie-Hellman secret shared by two accounts.
#[derive(Clone)]
pub struct SharedSecret {
    bytes: [u8; KEY_SIZE],
}

impl SharedSecret {
    /// Raw secret bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret([redacted])")
    }
}

/// Symmetric key for exactly one message.
#[derive(Clone)]
pub struct MessageKey {
    key: [u8; KEY_SIZE],
}

impl MessageKey {
    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

impl Drop for MessageKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl fmt::Debug for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MessageKey([redacted])")
    }
}

/// Establish the static shared secret with a peer.
///
/// Commutative: both sides derive the same 32 bytes from their own private
/// key and the other's public key.
pub fn establish(local: &IdentityKeyPair, peer: &PublicKey) -> SharedSecret {
    let dh = local.diffie_hellman(peer);
    SharedSecret { bytes: dh.to_bytes() }
}

/// Generate the public half of a fresh per-message ephemeral pair.
///
/// The private half is dropped immediately: key derivation hashes only the
/// public half into the static shared secret, so the ephemeral pair adds no
/// secret entropy (see the crate-level security notes).
pub fn ephemeral_public_key(seed: [u8; KEY_SIZE]) -> PublicKey {
    PublicKey::from(&StaticSecret::from(seed))
}

/// Derive the single-message AES key.
///
/// SHA-256 over the 32-byte shared secret followed by the 32-byte ephemeral
/// public key. Both peers derive the same key because the ephemeral public
/// key is transmitted with the ciphertext.
pub fn derive_message_key(secret: &SharedSecret, ephemeral_public: &PublicKey) -> MessageKey {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(ephemeral_public.as_bytes());
    let digest = hasher.finalize();

    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&digest);
    MessageKey { key }
}
