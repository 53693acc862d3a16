//! In-memory key store.
//!
//! Reference implementation for tests and throwaway sessions. Nothing
//! survives process exit.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use super::{KeyStore, KeyStoreError};

/// Key store backed by a shared in-memory map.
///
/// Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryKeyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for MemoryKeyStore {
    /// # Panics
    /// Panics if the internal mutex is poisoned (a previous panic while
    /// holding the lock).
    #[allow(clippy::expect_used)]
    fn get(&self, name: &str) -> Result<Option<String>, KeyStoreError> {
        let entries = self.entries.lock().expect("Mutex poisoned");
        Ok(entries.get(name).cloned())
    }

    /// # Panics
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    fn set(&self, name: &str, value: &str) -> Result<(), KeyStoreError> {
        let mut entries = self.entries.lock().expect("Mutex poisoned");
        entries.insert(name.to_string(), value.to_string());
        Ok(())
    }

    /// # Panics
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    fn remove(&self, name: &str) -> Result<(), KeyStoreError> {
        let mut entries = self.entries.lock().expect("Mutex poisoned");
        entries.remove(name);
        Ok(())
    }
}
