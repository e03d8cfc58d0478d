//! Deterministic per-agent key derivation.
//!
//! Agent keys are never persisted. Each is re-derived on demand as
//! `HMAC-SHA512(master, "osaurus-agent-v1" ‖ be32(index))`, truncated to 32
//! bytes, and zeroed when the caller's scope ends.

use hmac::{Hmac, Mac};
use sha2::Sha512;
use zeroize::{Zeroize, Zeroizing};

use crate::address::Address;
use crate::error::CryptoResult;
use crate::signer::{sign, SigningDomain, SIGNATURE_LEN};

/// Domain tag mixed into every agent-key derivation.
pub const AGENT_DERIVATION_TAG: &[u8] = b"osaurus-agent-v1";

/// Derive the private key for agent `index` from the master secret.
///
/// Always returns 32 bytes; every index in `[0, 2^32)` is valid. The result
/// is wrapped in [`Zeroizing`] so it is wiped when dropped.
#[must_use]
pub fn derive_agent_key(master_key: &[u8; 32], index: u32) -> Zeroizing<[u8; 32]> {
    let mut mac = Hmac::<Sha512>::new_from_slice(master_key)
        .expect("HMAC-SHA-512 accepts keys of any length");
    mac.update(AGENT_DERIVATION_TAG);
    mac.update(&index.to_be_bytes());

    let mut digest = [0u8; 64];
    digest.copy_from_slice(&mac.finalize().into_bytes());

    let mut child = Zeroizing::new([0u8; 32]);
    child.copy_from_slice(&digest[..32]);
    digest.zeroize();
    child
}

/// Derive the address for agent `index` under the master secret.
///
/// # Errors
///
/// Returns [`crate::CryptoError::SigningFailed`] in the astronomically
/// unlikely case the derived bytes are not a valid scalar.
pub fn derive_agent_address(master_key: &[u8; 32], index: u32) -> CryptoResult<Address> {
    let child = derive_agent_key(master_key, index);
    crate::signer::derive_address(&child)
}

/// Sign access-key claims as agent `index`.
///
/// Derives the agent key, signs `payload` under [`SigningDomain::Access`],
/// and wipes the key before returning.
///
/// # Errors
///
/// Returns [`crate::CryptoError::SigningFailed`] if signing fails.
pub fn sign_as_agent(
    payload: &[u8],
    master_key: &[u8; 32],
    index: u32,
) -> CryptoResult<[u8; SIGNATURE_LEN]> {
    let child = derive_agent_key(master_key, index);
    sign(payload, &child, SigningDomain::Access)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::{derive_address, recover_address};

    const MASTER: [u8; 32] = [0x11; 32];

    #[test]
    fn test_derivation_is_deterministic() {
        assert_eq!(*derive_agent_key(&MASTER, 0), *derive_agent_key(&MASTER, 0));
        assert_eq!(*derive_agent_key(&MASTER, 7), *derive_agent_key(&MASTER, 7));
    }

    #[test]
    fn test_distinct_indices_yield_distinct_keys() {
        let indices = [0u32, 1, 2, 100, u32::MAX];
        for (i, a) in indices.iter().enumerate() {
            for b in &indices[i + 1..] {
                assert_ne!(*derive_agent_key(&MASTER, *a), *derive_agent_key(&MASTER, *b));
            }
        }
    }

    #[test]
    fn test_distinct_masters_yield_distinct_keys() {
        let other = [0x22u8; 32];
        assert_ne!(*derive_agent_key(&MASTER, 0), *derive_agent_key(&other, 0));
    }

    #[test]
    fn test_agent_address_differs_from_master() {
        let master_addr = derive_address(&MASTER).unwrap();
        for index in [0u32, 1, 42] {
            let agent_addr = derive_agent_address(&MASTER, index).unwrap();
            assert_ne!(agent_addr, master_addr);
        }
    }

    #[test]
    fn test_sign_as_agent_recovers_agent_address() {
        let agent_addr = derive_agent_address(&MASTER, 3).unwrap();
        let sig = sign_as_agent(b"claims", &MASTER, 3).unwrap();

        let recovered = recover_address(b"claims", &sig, SigningDomain::Access).unwrap();
        assert_eq!(recovered, agent_addr);
    }
}
