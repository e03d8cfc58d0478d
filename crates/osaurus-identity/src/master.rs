//! Master key lifecycle.
//!
//! The master secret is 32 random bytes generated once at account setup and
//! persisted in an OS-provided secret slot. It is never handed out: callers
//! pass a closure to [`MasterKeyStore::with_key`], the bytes are loaded into
//! a zeroizing buffer, and the buffer is wiped when the closure returns.

use std::sync::Arc;

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use osaurus_core::{slots, SecretStore};
use osaurus_crypto::{derive_agent_address, derive_address, sign_as_agent, Address, SIGNATURE_LEN};

use crate::error::{IdentityError, IdentityResult};

/// Access to the device master secret.
pub struct MasterKeyStore {
    store: Arc<dyn SecretStore>,
}

impl MasterKeyStore {
    /// Create a master key store over the given secret backend.
    #[must_use]
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    /// Whether a master key exists on this device.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Secret`] if the backend read fails.
    pub fn exists(&self) -> IdentityResult<bool> {
        Ok(self
            .store
            .get(slots::IDENTITY_SERVICE, slots::IDENTITY_MASTER_ACCOUNT)?
            .is_some())
    }

    /// Generate and persist a master key if none exists.
    ///
    /// Returns `true` if a new key was generated. Idempotent: an existing
    /// key is never overwritten.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::RandomFailed`] if the OS RNG fails, or
    /// [`IdentityError::Secret`] if persistence fails.
    pub fn generate_if_missing(&self) -> IdentityResult<bool> {
        if self.exists()? {
            return Ok(false);
        }
        let mut key = Zeroizing::new([0u8; 32]);
        OsRng
            .try_fill_bytes(&mut *key)
            .map_err(|e| IdentityError::RandomFailed(e.to_string()))?;
        self.store
            .set(slots::IDENTITY_SERVICE, slots::IDENTITY_MASTER_ACCOUNT, &*key)?;
        tracing::info!("Generated device master key");
        Ok(true)
    }

    /// Run `f` with the master key bytes.
    ///
    /// The key is loaded into a zeroizing buffer for exactly the duration of
    /// the closure and overwritten on scope exit.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::NoAccount`] if no master key exists, or
    /// [`IdentityError::Secret`] if the backend read fails.
    pub fn with_key<T>(&self, f: impl FnOnce(&[u8; 32]) -> T) -> IdentityResult<T> {
        let raw = self
            .store
            .get(slots::IDENTITY_SERVICE, slots::IDENTITY_MASTER_ACCOUNT)?
            .ok_or(IdentityError::NoAccount)?;
        let raw = Zeroizing::new(raw);
        if raw.len() != 32 {
            return Err(IdentityError::Serialization(format!(
                "master key slot holds {} bytes, expected 32",
                raw.len()
            )));
        }
        let mut key = Zeroizing::new([0u8; 32]);
        key.copy_from_slice(&raw);
        Ok(f(&key))
    }

    /// The master address.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::NoAccount`] if no master key exists.
    pub fn master_address(&self) -> IdentityResult<Address> {
        self.with_key(|key| derive_address(key))?.map_err(Into::into)
    }

    /// The derived address for agent `index`.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::NoAccount`] if no master key exists.
    pub fn agent_address(&self, index: u32) -> IdentityResult<Address> {
        self.with_key(|key| derive_agent_address(key, index))?
            .map_err(Into::into)
    }

    /// Sign access-key claims as agent `index`.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::NoAccount`] if no master key exists, or a
    /// crypto error if signing fails.
    pub fn sign_as_agent(
        &self,
        payload: &[u8],
        index: u32,
    ) -> IdentityResult<[u8; SIGNATURE_LEN]> {
        self.with_key(|key| sign_as_agent(payload, key, index))?
            .map_err(Into::into)
    }

    /// Remove the master key from the device.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Secret`] if the backend delete fails.
    pub fn delete(&self) -> IdentityResult<()> {
        self.store
            .delete(slots::IDENTITY_SERVICE, slots::IDENTITY_MASTER_ACCOUNT)?;
        Ok(())
    }
}

impl std::fmt::Debug for MasterKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKeyStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osaurus_core::MemorySecretStore;

    fn store() -> MasterKeyStore {
        MasterKeyStore::new(Arc::new(MemorySecretStore::new()))
    }

    #[test]
    fn test_generate_is_idempotent() {
        let master = store();
        assert!(!master.exists().unwrap());

        assert!(master.generate_if_missing().unwrap());
        assert!(master.exists().unwrap());
        let addr = master.master_address().unwrap();

        // Second call must not rotate the key.
        assert!(!master.generate_if_missing().unwrap());
        assert_eq!(master.master_address().unwrap(), addr);
    }

    #[test]
    fn test_missing_key_is_no_account() {
        let master = store();
        assert!(matches!(
            master.master_address(),
            Err(IdentityError::NoAccount)
        ));
    }

    #[test]
    fn test_agent_addresses_are_stable_and_distinct() {
        let master = store();
        master.generate_if_missing().unwrap();

        let a0 = master.agent_address(0).unwrap();
        let a1 = master.agent_address(1).unwrap();
        assert_ne!(a0, a1);
        assert_eq!(master.agent_address(0).unwrap(), a0);
        assert_ne!(a0, master.master_address().unwrap());
    }

    #[test]
    fn test_delete_removes_account() {
        let master = store();
        master.generate_if_missing().unwrap();
        master.delete().unwrap();
        assert!(!master.exists().unwrap());
    }
}
