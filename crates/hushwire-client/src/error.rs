//! Client-level error type.

use hushwire_core::{
    coordinator::SyncError,
    keystore::{KeyStoreError, VaultError},
};
use thiserror::Error;

/// Errors surfaced by [`ChatClient`](crate::ChatClient) calls.
///
/// Channel and key-directory failures are reported through events and
/// logs rather than return values; only storage and coordinator problems
/// reach the caller directly.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Key store access failed
    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),

    /// Stored identity material is missing or corrupt
    #[error(transparent)]
    Vault(#[from] VaultError),

    /// The coordinator rejected an event
    #[error(transparent)]
    Sync(#[from] SyncError),
}
