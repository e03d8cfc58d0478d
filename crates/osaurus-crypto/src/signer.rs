//! Domain-separated signing and signer recovery.
//!
//! Payloads are framed into an envelope before hashing:
//!
//! ```text
//! "\x19" + <domain prefix> + ":\n" + decimal(payload.len) + payload
//! ```
//!
//! so a signature minted for one purpose can never validate in another. The
//! envelope is hashed with Keccak-256 and signed with secp256k1 ECDSA; the
//! 65-byte signature carries the recovery id (+27) in its last byte, which
//! lets verification recover the signer's address with no stored public key.

use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};

use crate::address::Address;
use crate::error::{CryptoError, CryptoResult};
use crate::keccak::keccak256;

/// Length of a recoverable signature: 64 compact bytes plus the v byte.
pub const SIGNATURE_LEN: usize = 65;

/// The signing domain a payload belongs to.
///
/// The two domains must never be interchangeable: an access key signed under
/// [`SigningDomain::Access`] does not recover to its signer under
/// [`SigningDomain::Message`], and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SigningDomain {
    /// User-facing payloads.
    Message,
    /// Access-key claims.
    Access,
}

impl SigningDomain {
    /// The constant prefix mixed into the envelope.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Message => "Osaurus Signed Message",
            Self::Access => "Osaurus Signed Access",
        }
    }
}

/// Keccak-256 of the length-framed, domain-prefixed envelope around `payload`.
#[must_use]
pub fn envelope_digest(domain: SigningDomain, payload: &[u8]) -> [u8; 32] {
    let prefix = domain.prefix();
    let length = payload.len().to_string();

    let mut envelope = Vec::with_capacity(1 + prefix.len() + 2 + length.len() + payload.len());
    envelope.push(0x19);
    envelope.extend_from_slice(prefix.as_bytes());
    envelope.extend_from_slice(b":\n");
    envelope.extend_from_slice(length.as_bytes());
    envelope.extend_from_slice(payload);

    keccak256(&envelope)
}

/// Sign `payload` under `domain` with a raw secp256k1 private key.
///
/// Returns the 65-byte `r‖s‖v` signature with `v = recovery_id + 27`.
///
/// # Errors
///
/// Returns [`CryptoError::SigningFailed`] if the private key is malformed
/// (zero or not below the curve order) or signing itself fails.
pub fn sign(
    payload: &[u8],
    private_key: &[u8; 32],
    domain: SigningDomain,
) -> CryptoResult<[u8; SIGNATURE_LEN]> {
    let signing_key = SigningKey::from_bytes(private_key.into())
        .map_err(|_| CryptoError::SigningFailed("malformed private key".into()))?;

    let digest = envelope_digest(domain, payload);
    let (signature, recovery_id) = signing_key
        .sign_prehash_recoverable(&digest)
        .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;

    let mut out = [0u8; SIGNATURE_LEN];
    out[..64].copy_from_slice(&signature.to_bytes());
    out[64] = recovery_id.to_byte() + 27;
    Ok(out)
}

/// Recover the address that signed `payload` under `domain`.
///
/// # Errors
///
/// Returns [`CryptoError::SigningFailed`] if the signature is not exactly
/// 65 bytes, and [`CryptoError::AddressRecoveryFailed`] if the v byte is out
/// of range or recovery yields no valid curve point.
pub fn recover_address(
    payload: &[u8],
    signature: &[u8],
    domain: SigningDomain,
) -> CryptoResult<Address> {
    if signature.len() != SIGNATURE_LEN {
        return Err(CryptoError::SigningFailed(format!(
            "signature must be {SIGNATURE_LEN} bytes, got {}",
            signature.len()
        )));
    }

    let v = signature[SIGNATURE_LEN - 1];
    let recovery_id = v
        .checked_sub(27)
        .and_then(RecoveryId::from_byte)
        .ok_or_else(|| {
            CryptoError::AddressRecoveryFailed(format!("recovery byte {v} out of range"))
        })?;

    let compact = EcdsaSignature::from_slice(&signature[..64])
        .map_err(|e| CryptoError::AddressRecoveryFailed(e.to_string()))?;

    let digest = envelope_digest(domain, payload);
    let verifying_key = VerifyingKey::recover_from_prehash(&digest, &compact, recovery_id)
        .map_err(|e| CryptoError::AddressRecoveryFailed(e.to_string()))?;

    Ok(Address::from_public_key(&verifying_key))
}

/// Derive the address of a raw secp256k1 private key.
///
/// # Errors
///
/// Returns [`CryptoError::SigningFailed`] if the private key is malformed.
pub fn derive_address(private_key: &[u8; 32]) -> CryptoResult<Address> {
    let signing_key = SigningKey::from_bytes(private_key.into())
        .map_err(|_| CryptoError::SigningFailed("malformed private key".into()))?;
    Ok(Address::from_public_key(signing_key.verifying_key()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        key[31] = 0x42;
        key
    }

    #[test]
    fn test_sign_recover_round_trip() {
        let key = test_key();
        let expected = derive_address(&key).unwrap();

        for domain in [SigningDomain::Message, SigningDomain::Access] {
            let sig = sign(b"test payload", &key, domain).unwrap();
            assert_eq!(sig.len(), SIGNATURE_LEN);
            assert!(sig[64] >= 27);

            let recovered = recover_address(b"test payload", &sig, domain).unwrap();
            assert_eq!(recovered, expected);
        }
    }

    #[test]
    fn test_domain_separation() {
        let key = test_key();
        let signer = derive_address(&key).unwrap();

        let sig_a = sign(b"test", &key, SigningDomain::Message).unwrap();
        let sig_b = sign(b"test", &key, SigningDomain::Access).unwrap();
        assert_ne!(sig_a, sig_b);

        // Recovery under the wrong prefix must not yield the signer.
        let cross = recover_address(b"test", &sig_a, SigningDomain::Access);
        match cross {
            Ok(addr) => assert_ne!(addr, signer),
            Err(_) => {} // an invalid point is an equally acceptable outcome
        }
    }

    #[test]
    fn test_tampered_payload_recovers_wrong_signer() {
        let key = test_key();
        let signer = derive_address(&key).unwrap();

        let sig = sign(b"original", &key, SigningDomain::Message).unwrap();
        match recover_address(b"tampered", &sig, SigningDomain::Message) {
            Ok(addr) => assert_ne!(addr, signer),
            Err(_) => {}
        }
    }

    #[test]
    fn test_rejects_bad_signature_length() {
        let result = recover_address(b"x", &[0u8; 64], SigningDomain::Message);
        assert!(matches!(result, Err(CryptoError::SigningFailed(_))));
    }

    #[test]
    fn test_rejects_v_below_27() {
        let key = test_key();
        let mut sig = sign(b"x", &key, SigningDomain::Message).unwrap();
        sig[64] = 1;
        let result = recover_address(b"x", &sig, SigningDomain::Message);
        assert!(matches!(result, Err(CryptoError::AddressRecoveryFailed(_))));
    }

    #[test]
    fn test_rejects_malformed_private_key() {
        // Zero is not a valid scalar.
        let result = sign(b"x", &[0u8; 32], SigningDomain::Message);
        assert!(matches!(result, Err(CryptoError::SigningFailed(_))));
    }

    #[test]
    fn test_envelope_framing_is_length_sensitive() {
        // "ab" + "c" and "a" + "bc" must not collide; the decimal length in
        // the envelope disambiguates them.
        let d1 = envelope_digest(SigningDomain::Message, b"ab");
        let d2 = envelope_digest(SigningDomain::Message, b"abc");
        assert_ne!(d1, d2);

        let empty = envelope_digest(SigningDomain::Message, b"");
        assert_eq!(empty, envelope_digest(SigningDomain::Message, b""));
    }
}
