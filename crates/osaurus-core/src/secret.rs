//! Secret persistence seam.
//!
//! The runtime persists small state documents (whitelists, revocations, the
//! master key, per-plugin config) in named secret slots. A slot is addressed
//! by `(service, account)`; in production the slot lives in the OS keychain,
//! in tests it lives in memory.

use std::collections::HashMap;
use std::sync::RwLock;

/// Errors from secret store operations.
#[derive(Debug, thiserror::Error)]
pub enum SecretStoreError {
    /// Reading a secret slot failed.
    #[error("secret read failed for {service}/{account}: {message}")]
    SecretReadFailed {
        /// Slot service name.
        service: String,
        /// Slot account name.
        account: String,
        /// Backend error description.
        message: String,
    },

    /// Writing or deleting a secret slot failed.
    #[error("secret write failed for {service}/{account}: {message}")]
    SecretWriteFailed {
        /// Slot service name.
        service: String,
        /// Slot account name.
        account: String,
        /// Backend error description.
        message: String,
    },
}

impl SecretStoreError {
    /// Build a read failure for a slot.
    #[must_use]
    pub fn read(service: &str, account: &str, message: impl Into<String>) -> Self {
        Self::SecretReadFailed {
            service: service.to_string(),
            account: account.to_string(),
            message: message.into(),
        }
    }

    /// Build a write failure for a slot.
    #[must_use]
    pub fn write(service: &str, account: &str, message: impl Into<String>) -> Self {
        Self::SecretWriteFailed {
            service: service.to_string(),
            account: account.to_string(),
            message: message.into(),
        }
    }
}

/// Key-value secret persistence keyed by `(service, account)`.
///
/// Implementations must be safe for concurrent use; the stores built on top
/// serialise their own writes and only require the backend to be atomic per
/// slot.
pub trait SecretStore: Send + Sync {
    /// Read a slot. Returns `Ok(None)` if the slot has never been written.
    ///
    /// # Errors
    ///
    /// Returns [`SecretStoreError::SecretReadFailed`] if the backend fails.
    fn get(&self, service: &str, account: &str) -> Result<Option<Vec<u8>>, SecretStoreError>;

    /// Write a slot, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`SecretStoreError::SecretWriteFailed`] if the backend fails.
    fn set(&self, service: &str, account: &str, value: &[u8]) -> Result<(), SecretStoreError>;

    /// Delete a slot. Deleting a missing slot is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`SecretStoreError::SecretWriteFailed`] if the backend fails.
    fn delete(&self, service: &str, account: &str) -> Result<(), SecretStoreError>;
}

/// OS keychain-backed secret store.
///
/// Each slot maps to one keyring entry. The keychain already serialises
/// access per entry, so no extra locking is needed here.
#[derive(Debug, Default)]
pub struct KeyringSecretStore;

impl KeyringSecretStore {
    /// Create a keychain-backed store.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn entry(service: &str, account: &str) -> Result<keyring::Entry, keyring::Error> {
        keyring::Entry::new(service, account)
    }
}

impl SecretStore for KeyringSecretStore {
    fn get(&self, service: &str, account: &str) -> Result<Option<Vec<u8>>, SecretStoreError> {
        let entry = Self::entry(service, account)
            .map_err(|e| SecretStoreError::read(service, account, e.to_string()))?;
        match entry.get_secret() {
            Ok(bytes) => Ok(Some(bytes)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(SecretStoreError::read(service, account, e.to_string())),
        }
    }

    fn set(&self, service: &str, account: &str, value: &[u8]) -> Result<(), SecretStoreError> {
        let entry = Self::entry(service, account)
            .map_err(|e| SecretStoreError::write(service, account, e.to_string()))?;
        entry
            .set_secret(value)
            .map_err(|e| SecretStoreError::write(service, account, e.to_string()))
    }

    fn delete(&self, service: &str, account: &str) -> Result<(), SecretStoreError> {
        let entry = Self::entry(service, account)
            .map_err(|e| SecretStoreError::write(service, account, e.to_string()))?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(SecretStoreError::write(service, account, e.to_string())),
        }
    }
}

/// In-memory secret store for tests.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    slots: RwLock<HashMap<(String, String), Vec<u8>>>,
}

impl MemorySecretStore {
    /// Create an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of populated slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.read().map(|slots| slots.len()).unwrap_or(0)
    }

    /// Whether the store holds no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, service: &str, account: &str) -> Result<Option<Vec<u8>>, SecretStoreError> {
        let slots = self
            .slots
            .read()
            .map_err(|e| SecretStoreError::read(service, account, e.to_string()))?;
        Ok(slots.get(&(service.to_string(), account.to_string())).cloned())
    }

    fn set(&self, service: &str, account: &str, value: &[u8]) -> Result<(), SecretStoreError> {
        let mut slots = self
            .slots
            .write()
            .map_err(|e| SecretStoreError::write(service, account, e.to_string()))?;
        slots.insert((service.to_string(), account.to_string()), value.to_vec());
        Ok(())
    }

    fn delete(&self, service: &str, account: &str) -> Result<(), SecretStoreError> {
        let mut slots = self
            .slots
            .write()
            .map_err(|e| SecretStoreError::write(service, account, e.to_string()))?;
        slots.remove(&(service.to_string(), account.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemorySecretStore::new();
        assert!(store.get("svc", "acct").unwrap().is_none());

        store.set("svc", "acct", b"hello").unwrap();
        assert_eq!(store.get("svc", "acct").unwrap().unwrap(), b"hello");

        store.set("svc", "acct", b"replaced").unwrap();
        assert_eq!(store.get("svc", "acct").unwrap().unwrap(), b"replaced");
    }

    #[test]
    fn test_memory_store_delete() {
        let store = MemorySecretStore::new();
        store.set("svc", "acct", b"value").unwrap();
        store.delete("svc", "acct").unwrap();
        assert!(store.get("svc", "acct").unwrap().is_none());

        // Deleting a missing slot is fine.
        store.delete("svc", "missing").unwrap();
    }

    #[test]
    fn test_memory_store_slots_are_independent() {
        let store = MemorySecretStore::new();
        store.set("svc-a", "acct", b"a").unwrap();
        store.set("svc-b", "acct", b"b").unwrap();

        assert_eq!(store.get("svc-a", "acct").unwrap().unwrap(), b"a");
        assert_eq!(store.get("svc-b", "acct").unwrap().unwrap(), b"b");
        assert_eq!(store.len(), 2);
    }
}
