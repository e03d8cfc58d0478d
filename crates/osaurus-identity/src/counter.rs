//! Per-device replay counter.
//!
//! Every access key carries a counter; this store remembers the highest
//! counter admitted from each signer and only admits strictly larger values.
//! The high-water marks are strictly non-decreasing: a relay-driven
//! [`CounterStore::sync_to`] can raise one but never lower it.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use osaurus_core::{slots, SecretStore, SecretStoreError};
use osaurus_crypto::Address;

use crate::error::{IdentityError, IdentityResult};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct CounterData {
    /// Highest admitted counter per lowercase signer address.
    #[serde(default)]
    highest: BTreeMap<String, u64>,
}

/// The persistent per-signer counter store.
pub struct CounterStore {
    store: Arc<dyn SecretStore>,
    data: RwLock<CounterData>,
}

impl CounterStore {
    /// Load counters from their secret slot, or start empty.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Secret`] if the backend read fails, or
    /// [`IdentityError::Serialization`] if the stored document is corrupt.
    pub fn load(store: Arc<dyn SecretStore>) -> IdentityResult<Self> {
        let data = match store.get(slots::COUNTER_SERVICE, slots::COUNTER_ACCOUNT)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| IdentityError::Serialization(e.to_string()))?,
            None => CounterData::default(),
        };
        Ok(Self {
            store,
            data: RwLock::new(data),
        })
    }

    fn persist(&self, data: &CounterData) -> IdentityResult<()> {
        let bytes = serde_json::to_vec(data)
            .map_err(|e| IdentityError::Serialization(e.to_string()))?;
        self.store
            .set(slots::COUNTER_SERVICE, slots::COUNTER_ACCOUNT, &bytes)?;
        Ok(())
    }

    fn write_lock(&self) -> IdentityResult<std::sync::RwLockWriteGuard<'_, CounterData>> {
        self.data.write().map_err(|e| {
            IdentityError::Secret(SecretStoreError::write(
                slots::COUNTER_SERVICE,
                slots::COUNTER_ACCOUNT,
                e.to_string(),
            ))
        })
    }

    /// Admit `counter` from `address` iff it strictly exceeds the highest
    /// counter already seen, recording it on success.
    ///
    /// The check and the record happen under one lock so two concurrent
    /// requests cannot both be admitted with the same counter.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Secret`] if persistence fails.
    pub fn observe(&self, address: &Address, counter: u64) -> IdentityResult<bool> {
        let mut data = self.write_lock()?;
        let entry = data.highest.entry(address.to_lowercase_hex()).or_insert(0);
        let admitted = counter > *entry;
        if admitted {
            *entry = counter;
            self.persist(&data)?;
        }
        Ok(admitted)
    }

    /// Raise the high-water mark for `address` to at least `counter`.
    ///
    /// Strictly non-decreasing: a sync below the current mark is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Secret`] if persistence fails.
    pub fn sync_to(&self, address: &Address, counter: u64) -> IdentityResult<()> {
        let mut data = self.write_lock()?;
        let entry = data.highest.entry(address.to_lowercase_hex()).or_insert(0);
        if counter > *entry {
            *entry = counter;
            self.persist(&data)?;
        }
        Ok(())
    }

    /// The highest counter admitted from `address`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Secret`] if the lock is poisoned.
    pub fn highest(&self, address: &Address) -> IdentityResult<Option<u64>> {
        let data = self.data.read().map_err(|e| {
            IdentityError::Secret(SecretStoreError::read(
                slots::COUNTER_SERVICE,
                slots::COUNTER_ACCOUNT,
                e.to_string(),
            ))
        })?;
        Ok(data.highest.get(&address.to_lowercase_hex()).copied())
    }
}

impl std::fmt::Debug for CounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CounterStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osaurus_core::MemorySecretStore;

    fn addr(byte: u8) -> Address {
        Address::from_bytes([byte; 20])
    }

    fn store() -> CounterStore {
        CounterStore::load(Arc::new(MemorySecretStore::new())).unwrap()
    }

    #[test]
    fn test_strict_monotonicity() {
        let counters = store();
        let signer = addr(1);

        assert!(counters.observe(&signer, 1).unwrap());
        assert!(counters.observe(&signer, 2).unwrap());
        // Equal or lower counters are replays.
        assert!(!counters.observe(&signer, 2).unwrap());
        assert!(!counters.observe(&signer, 1).unwrap());
        assert!(counters.observe(&signer, 10).unwrap());
    }

    #[test]
    fn test_zero_counter_is_never_admitted() {
        let counters = store();
        assert!(!counters.observe(&addr(1), 0).unwrap());
    }

    #[test]
    fn test_signers_are_independent() {
        let counters = store();
        assert!(counters.observe(&addr(1), 5).unwrap());
        assert!(counters.observe(&addr(2), 1).unwrap());
    }

    #[test]
    fn test_sync_never_lowers() {
        let counters = store();
        let signer = addr(1);

        counters.sync_to(&signer, 10).unwrap();
        counters.sync_to(&signer, 3).unwrap();
        assert_eq!(counters.highest(&signer).unwrap(), Some(10));

        // A later key must still beat the synced mark.
        assert!(!counters.observe(&signer, 10).unwrap());
        assert!(counters.observe(&signer, 11).unwrap());
    }

    #[test]
    fn test_counters_survive_reload() {
        let backend = Arc::new(MemorySecretStore::new());
        {
            let counters = CounterStore::load(backend.clone()).unwrap();
            counters.observe(&addr(1), 42).unwrap();
        }
        let reloaded = CounterStore::load(backend).unwrap();
        assert_eq!(reloaded.highest(&addr(1)).unwrap(), Some(42));
        assert!(!reloaded.observe(&addr(1), 42).unwrap());
    }
}
