//! Per-request access-key validation.
//!
//! A validator is built once per request from immutable inputs (the agent
//! and master addresses, the effective whitelist, a revocation snapshot)
//! plus a handle to the shared counter store. No store lock is held while a
//! request is being validated.

use std::collections::HashSet;
use std::sync::Arc;

use crate::access_key::{AccessKey, AccessKeyClaims};
use crate::counter::CounterStore;
use crate::error::{IdentityError, IdentityResult};
use crate::master::MasterKeyStore;
use crate::revocation::{RevocationSnapshot, RevocationStore};
use crate::whitelist::WhitelistStore;

use osaurus_crypto::Address;

struct ValidatorState {
    whitelist: HashSet<String>,
    revocations: RevocationSnapshot,
    counters: Arc<CounterStore>,
    has_keys: bool,
}

/// Validates bearer access keys for one agent.
///
/// The empty validator (no account) rejects everything with
/// [`IdentityError::NoAccount`].
pub struct AccessKeyValidator {
    agent: Option<Address>,
    master: Option<Address>,
    state: Option<ValidatorState>,
}

impl AccessKeyValidator {
    /// Build a validator from pre-computed inputs.
    ///
    /// `whitelist` must already be the *effective* whitelist for the agent
    /// (lowercase address strings); `revocations` is a snapshot taken at
    /// request start; `has_keys` says whether the account has any signing
    /// keys at all.
    #[must_use]
    pub fn new(
        agent: Address,
        master: Address,
        whitelist: HashSet<String>,
        revocations: RevocationSnapshot,
        counters: Arc<CounterStore>,
        has_keys: bool,
    ) -> Self {
        Self {
            agent: Some(agent),
            master: Some(master),
            state: Some(ValidatorState {
                whitelist,
                revocations,
                counters,
                has_keys,
            }),
        }
    }

    /// The validator used when no account exists: rejects every key.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            agent: None,
            master: None,
            state: None,
        }
    }

    /// Build a validator for `agent_index` from the live stores.
    ///
    /// This is the canonical master-key usage pattern: the key bytes are
    /// loaded, both addresses derived, and the buffer zeroed before this
    /// function returns. Returns the empty validator when no account exists.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Secret`] if any store read fails.
    pub fn build(
        master_keys: &MasterKeyStore,
        whitelist: &WhitelistStore,
        revocations: &RevocationStore,
        counters: Arc<CounterStore>,
        agent_index: u32,
    ) -> IdentityResult<Self> {
        if !master_keys.exists()? {
            return Ok(Self::empty());
        }

        let (master, agent) = master_keys.with_key(|key| {
            let master = osaurus_crypto::derive_address(key)?;
            let agent = osaurus_crypto::derive_agent_address(key, agent_index)?;
            Ok::<_, osaurus_crypto::CryptoError>((master, agent))
        })??;

        let effective = whitelist.effective_whitelist(&agent, &master)?;
        let snapshot = revocations.snapshot()?;
        Ok(Self::new(agent, master, effective, snapshot, counters, true))
    }

    /// The agent address this validator serves, if an account exists.
    #[must_use]
    pub fn agent_address(&self) -> Option<&Address> {
        self.agent.as_ref()
    }

    /// The master address, if an account exists.
    #[must_use]
    pub fn master_address(&self) -> Option<&Address> {
        self.master.as_ref()
    }

    /// Validate a bearer token, returning its claims on success.
    ///
    /// Checks, in order: signature recovery against the `address` claim,
    /// effective-whitelist membership, revocation state, and strict counter
    /// monotonicity (which also records the admitted counter).
    ///
    /// # Errors
    ///
    /// Returns the first failed check as [`IdentityError::NoAccount`],
    /// [`IdentityError::BadSignature`], [`IdentityError::NotWhitelisted`],
    /// [`IdentityError::Revoked`], or [`IdentityError::ReplayedCounter`].
    pub fn validate(&self, bearer: &str) -> IdentityResult<AccessKeyClaims> {
        let state = self.state.as_ref().ok_or(IdentityError::NoAccount)?;
        if !state.has_keys {
            return Err(IdentityError::NoAccount);
        }

        let key = AccessKey::parse(bearer)?;
        let signer = key.recover_signer()?;
        let claims = key.claims();

        if !state.whitelist.contains(&signer.to_lowercase_hex()) {
            return Err(IdentityError::NotWhitelisted(signer.to_lowercase_hex()));
        }

        if state
            .revocations
            .is_revoked(&signer, &claims.nonce, claims.counter)
        {
            return Err(IdentityError::Revoked);
        }

        if !state.counters.observe(&signer, claims.counter)? {
            let highest_seen = state.counters.highest(&signer)?.unwrap_or(0);
            return Err(IdentityError::ReplayedCounter {
                counter: claims.counter,
                highest_seen,
            });
        }

        Ok(claims.clone())
    }
}

impl std::fmt::Debug for AccessKeyValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessKeyValidator")
            .field("has_account", &self.state.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access_key::AccessKey;
    use osaurus_core::MemorySecretStore;
    use osaurus_crypto::derive_address;

    const SIGNER_KEY: [u8; 32] = [0x42; 32];

    fn mint(nonce: &str, counter: u64) -> String {
        let claims = AccessKeyClaims {
            address: derive_address(&SIGNER_KEY).unwrap(),
            nonce: nonce.into(),
            counter,
            extra: serde_json::Map::new(),
        };
        AccessKey::mint(&claims, &SIGNER_KEY).unwrap()
    }

    struct Fixture {
        validator: AccessKeyValidator,
        revocations: RevocationStore,
        counters: Arc<CounterStore>,
        signer: Address,
    }

    fn fixture(whitelist_signer: bool) -> Fixture {
        let backend = Arc::new(MemorySecretStore::new());
        let signer = derive_address(&SIGNER_KEY).unwrap();
        let agent = Address::from_bytes([1; 20]);
        let master = Address::from_bytes([2; 20]);

        let whitelist = WhitelistStore::load(backend.clone()).unwrap();
        if whitelist_signer {
            whitelist.add_master(&signer).unwrap();
        }
        let revocations = RevocationStore::load(backend.clone()).unwrap();
        let counters = Arc::new(CounterStore::load(backend).unwrap());

        let validator = AccessKeyValidator::new(
            agent,
            master,
            whitelist.effective_whitelist(&agent, &master).unwrap(),
            revocations.snapshot().unwrap(),
            Arc::clone(&counters),
            true,
        );
        Fixture {
            validator,
            revocations,
            counters,
            signer,
        }
    }

    #[test]
    fn test_valid_key_is_admitted() {
        let fx = fixture(true);
        let claims = fx.validator.validate(&mint("n1", 1)).unwrap();
        assert_eq!(claims.counter, 1);
        assert_eq!(fx.counters.highest(&fx.signer).unwrap(), Some(1));
    }

    #[test]
    fn test_empty_validator_rejects_everything() {
        let validator = AccessKeyValidator::empty();
        assert!(matches!(
            validator.validate(&mint("n", 1)),
            Err(IdentityError::NoAccount)
        ));
        assert!(validator.agent_address().is_none());
    }

    #[test]
    fn test_unwhitelisted_signer_is_rejected() {
        let fx = fixture(false);
        assert!(matches!(
            fx.validator.validate(&mint("n", 1)),
            Err(IdentityError::NotWhitelisted(_))
        ));
    }

    #[test]
    fn test_revoked_key_is_rejected() {
        let fx = fixture(true);
        fx.revocations.revoke_key(&fx.signer, "n").unwrap();

        // Rebuild with a fresh snapshot that sees the revocation.
        let validator = AccessKeyValidator::new(
            Address::from_bytes([1; 20]),
            Address::from_bytes([2; 20]),
            [fx.signer.to_lowercase_hex()].into_iter().collect(),
            fx.revocations.snapshot().unwrap(),
            Arc::clone(&fx.counters),
            true,
        );
        assert!(matches!(
            validator.validate(&mint("n", 1)),
            Err(IdentityError::Revoked)
        ));
        // A different nonce from the same signer still works.
        validator.validate(&mint("other", 1)).unwrap();
    }

    #[test]
    fn test_counter_replay_is_rejected() {
        let fx = fixture(true);
        fx.validator.validate(&mint("n1", 5)).unwrap();

        let result = fx.validator.validate(&mint("n2", 5));
        assert!(matches!(
            result,
            Err(IdentityError::ReplayedCounter {
                counter: 5,
                highest_seen: 5
            })
        ));
        fx.validator.validate(&mint("n3", 6)).unwrap();
    }

    #[test]
    fn test_garbage_token_is_bad_signature() {
        let fx = fixture(true);
        assert!(matches!(
            fx.validator.validate("garbage"),
            Err(IdentityError::BadSignature(_))
        ));
    }

    #[test]
    fn test_build_without_account_is_empty() {
        let backend = Arc::new(MemorySecretStore::new());
        let master_keys = MasterKeyStore::new(backend.clone());
        let whitelist = WhitelistStore::load(backend.clone()).unwrap();
        let revocations = RevocationStore::load(backend.clone()).unwrap();
        let counters = Arc::new(CounterStore::load(backend).unwrap());

        let validator =
            AccessKeyValidator::build(&master_keys, &whitelist, &revocations, counters, 0)
                .unwrap();
        assert!(matches!(
            validator.validate(&mint("n", 1)),
            Err(IdentityError::NoAccount)
        ));
    }

    #[test]
    fn test_build_admits_master_signed_keys() {
        let backend = Arc::new(MemorySecretStore::new());
        let master_keys = MasterKeyStore::new(backend.clone());
        master_keys.generate_if_missing().unwrap();
        let whitelist = WhitelistStore::load(backend.clone()).unwrap();
        let revocations = RevocationStore::load(backend.clone()).unwrap();
        let counters = Arc::new(CounterStore::load(backend).unwrap());

        let validator = AccessKeyValidator::build(
            &master_keys,
            &whitelist,
            &revocations,
            counters,
            0,
        )
        .unwrap();

        // A key signed by the master is admitted without explicit
        // whitelisting; the effective whitelist always contains the master.
        let token = master_keys
            .with_key(|key| {
                let claims = AccessKeyClaims {
                    address: derive_address(key).unwrap(),
                    nonce: "boot".into(),
                    counter: 1,
                    extra: serde_json::Map::new(),
                };
                AccessKey::mint(&claims, key).unwrap()
            })
            .unwrap();
        validator.validate(&token).unwrap();
    }
}
