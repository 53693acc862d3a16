//! Hushwire Cryptographic Primitives
//!
//! Building blocks for end-to-end encryption between chat peers: long-term
//! X25519 identity pairs, per-peer shared secrets, per-message key
//! derivation, and the AES-256-CBC message layer.
//!
//! All functions here are pure and deterministic. Callers provide random
//! bytes (key seeds, IVs) so tests can replay exact scenarios.
//!
//! # Key Lifecycle
//!
//! ```text
//! Identity Key Pair (X25519, long-term, one per account)
//!         │
//!         ▼  Diffie-Hellman with the peer's public key
//! Shared Secret (32 bytes, static per peer pair)
//!         │
//!         ▼  SHA-256(shared secret ∥ ephemeral public key)
//! Message Key (32 bytes, one per message)
//!         │
//!         ▼  AES-256-CBC + PKCS#7, caller-supplied 16-byte IV
//! Hex Ciphertext
//! ```
//!
//! # Security
//!
//! - **No forward secrecy.** The per-message ephemeral public key travels in
//!   the clear and contributes no secret entropy: anyone holding the static
//!   shared secret can derive every message key from wire traffic alone.
//!   Message secrecy rests entirely on both long-term private keys staying
//!   private. This matches the deployed wire format and is kept as-is;
//!   see `ephemeral_key_adds_no_secret_entropy` in the tests.
//! - **No authentication tag.** CBC mode detects tampering only when the
//!   padding happens to break; [`decrypt`] failures must be treated as
//!   suspect data, not proof of integrity elsewhere.
//! - Key material ([`SharedSecret`], [`MessageKey`]) is zeroed on drop and
//!   redacted from `Debug` output.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod cipher;
mod error;
mod identity;
mod session;

pub use cipher::{IV_SIZE, decrypt, encrypt, iv_from_hex};
pub use error::CryptoError;
pub use identity::{
    IdentityKeyPair, KEY_SIZE, public_key_from_hex, validate_key_pair, validate_public_key,
};
pub use session::{MessageKey, SharedSecret, derive_message_key, ephemeral_public_key, establish};
pub use x25519_dalek::PublicKey;
