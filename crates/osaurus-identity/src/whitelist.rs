//! Signer whitelists.
//!
//! Two named sets persisted as one JSON document in a single secret slot:
//! the master whitelist and per-agent overrides. Every stored address is
//! lowercase; lookups therefore never depend on checksum casing.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use osaurus_core::{slots, SecretStore, SecretStoreError};
use osaurus_crypto::Address;

use crate::error::{IdentityError, IdentityResult};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct WhitelistData {
    /// Addresses trusted for every agent.
    #[serde(default)]
    master: BTreeSet<String>,
    /// Per-agent additions, keyed by the agent's lowercase address.
    #[serde(default)]
    per_agent: BTreeMap<String, BTreeSet<String>>,
}

/// The persistent whitelist store.
///
/// Reads take a shared lock; mutations take the exclusive lock, apply the
/// change, and write the whole document back before returning, so a
/// successful call is durable.
pub struct WhitelistStore {
    store: Arc<dyn SecretStore>,
    data: RwLock<WhitelistData>,
}

impl WhitelistStore {
    /// Load the whitelist from its secret slot, or start empty if the slot
    /// has never been written.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Secret`] if the backend read fails, or
    /// [`IdentityError::Serialization`] if the stored document is corrupt.
    pub fn load(store: Arc<dyn SecretStore>) -> IdentityResult<Self> {
        let data = match store.get(slots::WHITELIST_SERVICE, slots::WHITELIST_ACCOUNT)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| IdentityError::Serialization(e.to_string()))?,
            None => WhitelistData::default(),
        };
        Ok(Self {
            store,
            data: RwLock::new(data),
        })
    }

    fn persist(&self, data: &WhitelistData) -> Result<(), IdentityError> {
        let bytes = serde_json::to_vec(data)
            .map_err(|e| IdentityError::Serialization(e.to_string()))?;
        self.store
            .set(slots::WHITELIST_SERVICE, slots::WHITELIST_ACCOUNT, &bytes)?;
        Ok(())
    }

    fn write_lock(&self) -> IdentityResult<std::sync::RwLockWriteGuard<'_, WhitelistData>> {
        self.data.write().map_err(|e| {
            IdentityError::Secret(SecretStoreError::write(
                slots::WHITELIST_SERVICE,
                slots::WHITELIST_ACCOUNT,
                e.to_string(),
            ))
        })
    }

    fn read_lock(&self) -> IdentityResult<std::sync::RwLockReadGuard<'_, WhitelistData>> {
        self.data.read().map_err(|e| {
            IdentityError::Secret(SecretStoreError::read(
                slots::WHITELIST_SERVICE,
                slots::WHITELIST_ACCOUNT,
                e.to_string(),
            ))
        })
    }

    /// Add an address to the master whitelist.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Secret`] if persistence fails.
    pub fn add_master(&self, address: &Address) -> IdentityResult<()> {
        let mut data = self.write_lock()?;
        if data.master.insert(address.to_lowercase_hex()) {
            debug!(address = %address, "Whitelisted address (master)");
            self.persist(&data)?;
        }
        Ok(())
    }

    /// Remove an address from the master whitelist.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Secret`] if persistence fails.
    pub fn remove_master(&self, address: &Address) -> IdentityResult<()> {
        let mut data = self.write_lock()?;
        if data.master.remove(&address.to_lowercase_hex()) {
            self.persist(&data)?;
        }
        Ok(())
    }

    /// Add an address to one agent's whitelist.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Secret`] if persistence fails.
    pub fn add_agent(&self, agent: &Address, address: &Address) -> IdentityResult<()> {
        let mut data = self.write_lock()?;
        let inserted = data
            .per_agent
            .entry(agent.to_lowercase_hex())
            .or_default()
            .insert(address.to_lowercase_hex());
        if inserted {
            debug!(agent = %agent, address = %address, "Whitelisted address (agent)");
            self.persist(&data)?;
        }
        Ok(())
    }

    /// Remove an address from one agent's whitelist, pruning the agent's
    /// entry when its set becomes empty.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Secret`] if persistence fails.
    pub fn remove_agent(&self, agent: &Address, address: &Address) -> IdentityResult<()> {
        let mut data = self.write_lock()?;
        let agent_key = agent.to_lowercase_hex();
        let mut changed = false;
        if let Some(set) = data.per_agent.get_mut(&agent_key) {
            changed = set.remove(&address.to_lowercase_hex());
            if set.is_empty() {
                data.per_agent.remove(&agent_key);
            }
        }
        if changed {
            self.persist(&data)?;
        }
        Ok(())
    }

    /// The master whitelist, as lowercase address strings.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Secret`] if the lock is poisoned.
    pub fn master_whitelist(&self) -> IdentityResult<HashSet<String>> {
        Ok(self.read_lock()?.master.iter().cloned().collect())
    }

    /// One agent's whitelist, as lowercase address strings.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Secret`] if the lock is poisoned.
    pub fn agent_whitelist(&self, agent: &Address) -> IdentityResult<HashSet<String>> {
        let data = self.read_lock()?;
        Ok(data
            .per_agent
            .get(&agent.to_lowercase_hex())
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    /// The effective whitelist for an agent:
    /// `master ∪ per_agent[agent] ∪ {agent, master_address}`, all lowercase.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Secret`] if the lock is poisoned.
    pub fn effective_whitelist(
        &self,
        agent: &Address,
        master_address: &Address,
    ) -> IdentityResult<HashSet<String>> {
        let data = self.read_lock()?;
        let mut effective: HashSet<String> = data.master.iter().cloned().collect();
        if let Some(set) = data.per_agent.get(&agent.to_lowercase_hex()) {
            effective.extend(set.iter().cloned());
        }
        effective.insert(agent.to_lowercase_hex());
        effective.insert(master_address.to_lowercase_hex());
        Ok(effective)
    }
}

impl std::fmt::Debug for WhitelistStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhitelistStore").finish_non_exhaustive()
    }
}
