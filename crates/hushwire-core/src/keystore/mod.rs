//! Durable string storage for key material.
//!
//! The host application owns real persistence (browser-style local
//! storage, an OS keychain, a file), so this is a trait seam with an
//! in-memory implementation for tests, plus the naming layer that binds
//! entries to account identities.

mod memory;
mod vault;

pub use memory::MemoryKeyStore;
use thiserror::Error;
pub use vault::{IdentityVault, VaultError};

/// Errors from key-value persistence.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyStoreError {
    /// No value stored under the requested name
    #[error("key not found: {name}")]
    KeyNotFound {
        /// Entry name that was requested
        name: String,
    },

    /// Backend failure (I/O, permissions, serialization)
    #[error("key store backend: {reason}")]
    Backend {
        /// Backend diagnostics
        reason: String,
    },
}

/// Key-value store for key material.
///
/// Must be cheaply cloneable (handles are shared across tasks) and
/// synchronous; implementations typically share internal state via `Arc`,
/// so clones all see the same entries.
pub trait KeyStore: Clone + Send + Sync + 'static {
    /// Value stored under `name`, or `None` if absent.
    fn get(&self, name: &str) -> Result<Option<String>, KeyStoreError>;

    /// Store `value` under `name`, replacing any previous value.
    fn set(&self, name: &str, value: &str) -> Result<(), KeyStoreError>;

    /// Remove the value under `name`. Removing an absent name is a no-op.
    fn remove(&self, name: &str) -> Result<(), KeyStoreError>;
}
