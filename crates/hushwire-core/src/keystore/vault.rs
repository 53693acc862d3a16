//! Identity-scoped naming over the key store.
//!
//! Entry layout, shared with the deployed clients:
//! - `private_key_<identity>` / `public_key_<identity>`: hex halves of the
//!   account's long-term X25519 pair
//! - `peer_key_<identity>_<peer>`: last public key fetched for a peer,
//!   kept to detect key changes between sessions

use hushwire_crypto::{CryptoError, IdentityKeyPair, public_key_from_hex};
use thiserror::Error;

use super::{KeyStore, KeyStoreError};
use crate::conversation::UserId;

/// Errors from loading or storing identity material.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VaultError {
    /// Store access failed or an entry was missing
    #[error(transparent)]
    Store(#[from] KeyStoreError),

    /// Stored material decoded but is corrupt or inconsistent
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Naming layer binding key material to one account identity.
#[derive(Debug, Clone)]
pub struct IdentityVault<S> {
    store: S,
    identity: String,
}

impl<S: KeyStore> IdentityVault<S> {
    /// Vault for `identity` backed by `store`.
    pub fn new(store: S, identity: impl Into<String>) -> Self {
        Self { store, identity: identity.into() }
    }

    /// Persist both halves of the account's key pair.
    pub fn store_key_pair(&self, pair: &IdentityKeyPair) -> Result<(), KeyStoreError> {
        self.store.set(&self.private_name(), &pair.private_hex())?;
        self.store.set(&self.public_name(), &pair.public_hex())
    }

    /// Load the persisted key pair.
    ///
    /// # Errors
    /// - [`VaultError::Store`] with [`KeyStoreError::KeyNotFound`] when
    ///   either half is missing (a fresh account)
    /// - [`VaultError::Crypto`] when the stored halves are corrupt or do
    ///   not belong together
    pub fn load_key_pair(&self) -> Result<IdentityKeyPair, VaultError> {
        let private_hex = self.require(&self.private_name())?;
        let public_hex = self.require(&self.public_name())?;

        let pair = IdentityKeyPair::from_private_hex(&private_hex)?;
        let stored_public = public_key_from_hex(&public_hex)?;
        if *pair.public() != stored_public {
            return Err(CryptoError::InvalidKeyPair {
                reason: "stored public key does not match the private key".to_string(),
            }
            .into());
        }
        Ok(pair)
    }

    /// Last public key fetched for `peer`, if any.
    pub fn remembered_peer_key(&self, peer: UserId) -> Result<Option<String>, KeyStoreError> {
        self.store.get(&self.peer_name(peer))
    }

    /// Remember the public key fetched for `peer`.
    pub fn remember_peer_key(&self, peer: UserId, public_key_hex: &str) -> Result<(), KeyStoreError> {
        self.store.set(&self.peer_name(peer), public_key_hex)
    }

    fn require(&self, name: &str) -> Result<String, KeyStoreError> {
        self.store.get(name)?.ok_or_else(|| KeyStoreError::KeyNotFound { name: name.to_string() })
    }

    fn private_name(&self) -> String {
        format!("private_key_{}", self.identity)
    }

    fn public_name(&self) -> String {
        format!("public_key_{}", self.identity)
    }

    fn peer_name(&self, peer: UserId) -> String {
        format!("peer_key_{}_{peer}", self.identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::MemoryKeyStore;

    fn vault() -> IdentityVault<MemoryKeyStore> {
        IdentityVault::new(MemoryKeyStore::new(), "7")
    }

    #[test]
    fn store_then_load_round_trips() {
        let vault = vault();
        let pair = IdentityKeyPair::generate([1; 32]);

        vault.store_key_pair(&pair).unwrap();
        let loaded = vault.load_key_pair().unwrap();

        assert_eq!(loaded.public_hex(), pair.public_hex());
        assert_eq!(loaded.private_hex(), pair.private_hex());
    }

    #[test]
    fn entries_use_identity_scoped_names() {
        let store = MemoryKeyStore::new();
        let vault = IdentityVault::new(store.clone(), "7");
        let pair = IdentityKeyPair::generate([1; 32]);

        vault.store_key_pair(&pair).unwrap();

        assert_eq!(store.get("private_key_7").unwrap(), Some(pair.private_hex()));
        assert_eq!(store.get("public_key_7").unwrap(), Some(pair.public_hex()));
    }

    #[test]
    fn missing_pair_reads_as_key_not_found() {
        let result = vault().load_key_pair();

        assert!(matches!(
            result,
            Err(VaultError::Store(KeyStoreError::KeyNotFound { .. }))
        ));
    }

    #[test]
    fn mismatched_halves_read_as_invalid_pair() {
        let store = MemoryKeyStore::new();
        let vault = IdentityVault::new(store.clone(), "7");
        let pair = IdentityKeyPair::generate([1; 32]);
        let other = IdentityKeyPair::generate([2; 32]);

        vault.store_key_pair(&pair).unwrap();
        store.set("public_key_7", &other.public_hex()).unwrap();

        assert!(matches!(
            vault.load_key_pair(),
            Err(VaultError::Crypto(CryptoError::InvalidKeyPair { .. }))
        ));
    }

    #[test]
    fn corrupt_private_hex_reads_as_invalid_pair() {
        let store = MemoryKeyStore::new();
        let vault = IdentityVault::new(store.clone(), "7");

        store.set("private_key_7", "zz").unwrap();
        store.set("public_key_7", "aa").unwrap();

        assert!(matches!(vault.load_key_pair(), Err(VaultError::Crypto(_))));
    }

    #[test]
    fn peer_keys_are_remembered_per_peer() {
        let vault = vault();

        assert_eq!(vault.remembered_peer_key(UserId(3)).unwrap(), None);

        vault.remember_peer_key(UserId(3), "aabb").unwrap();

        assert_eq!(vault.remembered_peer_key(UserId(3)).unwrap(), Some("aabb".to_string()));
        assert_eq!(vault.remembered_peer_key(UserId(4)).unwrap(), None);
    }
}
