//! Revocation state.
//!
//! Two structures, persisted together as one JSON document: the set of
//! individually revoked keys (`"<lowercase-address>:<nonce>"`) and the
//! per-address counter thresholds set by bulk revocation. Thresholds are
//! monotonic: `revoke_all_before` only ever raises them.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::info;

use osaurus_core::{slots, SecretStore, SecretStoreError};
use osaurus_crypto::Address;

use crate::error::{IdentityError, IdentityResult};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct RevocationData {
    /// Individually revoked keys, `"<lowercase-address>:<nonce>"`.
    #[serde(default)]
    revoked_keys: BTreeSet<String>,
    /// Per-address counter thresholds; keys with `counter <= threshold` are
    /// revoked in bulk.
    #[serde(default)]
    counter_thresholds: BTreeMap<String, u64>,
}

impl RevocationData {
    fn key_for(address: &Address, nonce: &str) -> String {
        format!("{}:{nonce}", address.to_lowercase_hex())
    }

    fn is_revoked(&self, address: &Address, nonce: &str, counter: u64) -> bool {
        if self.revoked_keys.contains(&Self::key_for(address, nonce)) {
            return true;
        }
        self.counter_thresholds
            .get(&address.to_lowercase_hex())
            .is_some_and(|threshold| counter <= *threshold)
    }
}

/// An immutable, cheaply copyable view of revocation state.
///
/// Taken once per request and handed to the validator so no store lock is
/// held while the request is processed.
#[derive(Debug, Clone)]
pub struct RevocationSnapshot(Arc<RevocationData>);

impl RevocationSnapshot {
    /// An empty snapshot (nothing revoked).
    #[must_use]
    pub fn empty() -> Self {
        Self(Arc::new(RevocationData::default()))
    }

    /// Whether a key is revoked, individually or by counter threshold.
    #[must_use]
    pub fn is_revoked(&self, address: &Address, nonce: &str, counter: u64) -> bool {
        self.0.is_revoked(address, nonce, counter)
    }
}

/// The persistent revocation store.
pub struct RevocationStore {
    store: Arc<dyn SecretStore>,
    data: RwLock<Arc<RevocationData>>,
}

impl RevocationStore {
    /// Load revocation state from its secret slot, or start empty.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Secret`] if the backend read fails, or
    /// [`IdentityError::Serialization`] if the stored document is corrupt.
    pub fn load(store: Arc<dyn SecretStore>) -> IdentityResult<Self> {
        let data = match store.get(slots::REVOCATION_SERVICE, slots::REVOCATION_ACCOUNT)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| IdentityError::Serialization(e.to_string()))?,
            None => RevocationData::default(),
        };
        Ok(Self {
            store,
            data: RwLock::new(Arc::new(data)),
        })
    }

    fn persist(&self, data: &RevocationData) -> IdentityResult<()> {
        let bytes = serde_json::to_vec(data)
            .map_err(|e| IdentityError::Serialization(e.to_string()))?;
        self.store
            .set(slots::REVOCATION_SERVICE, slots::REVOCATION_ACCOUNT, &bytes)?;
        Ok(())
    }

    fn mutate(
        &self,
        apply: impl FnOnce(&mut RevocationData) -> bool,
    ) -> IdentityResult<()> {
        let mut guard = self.data.write().map_err(|e| {
            IdentityError::Secret(SecretStoreError::write(
                slots::REVOCATION_SERVICE,
                slots::REVOCATION_ACCOUNT,
                e.to_string(),
            ))
        })?;
        let mut next = (**guard).clone();
        if apply(&mut next) {
            self.persist(&next)?;
            *guard = Arc::new(next);
        }
        Ok(())
    }

    /// Revoke one key by `(address, nonce)`.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Secret`] if persistence fails.
    pub fn revoke_key(&self, address: &Address, nonce: &str) -> IdentityResult<()> {
        self.mutate(|data| {
            let inserted = data.revoked_keys.insert(RevocationData::key_for(address, nonce));
            if inserted {
                info!(address = %address, nonce, "Revoked access key");
            }
            inserted
        })
    }

    /// Bulk-revoke every key from `address` whose counter is `<= threshold`.
    ///
    /// Monotonic: an existing higher threshold is never lowered.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Secret`] if persistence fails.
    pub fn revoke_all_before(&self, address: &Address, threshold: u64) -> IdentityResult<()> {
        self.mutate(|data| {
            let entry = data
                .counter_thresholds
                .entry(address.to_lowercase_hex())
                .or_insert(0);
            if threshold > *entry {
                *entry = threshold;
                info!(address = %address, threshold, "Raised revocation threshold");
                true
            } else {
                false
            }
        })
    }

    /// Whether a key is revoked, individually or by counter threshold.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Secret`] if the lock is poisoned.
    pub fn is_revoked(
        &self,
        address: &Address,
        nonce: &str,
        counter: u64,
    ) -> IdentityResult<bool> {
        Ok(self.snapshot()?.is_revoked(address, nonce, counter))
    }

    /// The current counter threshold for an address, if any.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Secret`] if the lock is poisoned.
    pub fn threshold(&self, address: &Address) -> IdentityResult<Option<u64>> {
        let guard = self.read_lock()?;
        Ok(guard.counter_thresholds.get(&address.to_lowercase_hex()).copied())
    }

    /// Take an immutable snapshot for per-request validation.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Secret`] if the lock is poisoned.
    pub fn snapshot(&self) -> IdentityResult<RevocationSnapshot> {
        Ok(RevocationSnapshot(Arc::clone(&*self.read_lock()?)))
    }

    fn read_lock(&self) -> IdentityResult<std::sync::RwLockReadGuard<'_, Arc<RevocationData>>> {
        self.data.read().map_err(|e| {
            IdentityError::Secret(SecretStoreError::read(
                slots::REVOCATION_SERVICE,
                slots::REVOCATION_ACCOUNT,
                e.to_string(),
            ))
        })
    }
}

impl std::fmt::Debug for RevocationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevocationStore").finish_non_exhaustive()
    }
}
