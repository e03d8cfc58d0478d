//! Bearer access keys.
//!
//! An access key is two base64url (unpadded) segments joined by `.`: the
//! JSON claims, then a 65-byte recoverable signature over the exact claims
//! bytes under the Access signing domain. The claims carry the signer's
//! address, an opaque nonce, a replay counter, and any auxiliary fields,
//! which the validator ignores.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use osaurus_crypto::{recover_address, sign, Address, SigningDomain, SIGNATURE_LEN};

use crate::error::{IdentityError, IdentityResult};

/// The claims carried by an access key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessKeyClaims {
    /// The signer's address.
    pub address: Address,
    /// Opaque per-key nonce (keys are individually revocable by it).
    pub nonce: String,
    /// Replay counter; must strictly exceed the signer's previous keys.
    pub counter: u64,
    /// Auxiliary claims, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A parsed access key: claims plus the signature over their exact bytes.
#[derive(Debug, Clone)]
pub struct AccessKey {
    claims: AccessKeyClaims,
    claims_bytes: Vec<u8>,
    signature: [u8; SIGNATURE_LEN],
}

impl AccessKey {
    /// Parse a bearer token.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::BadSignature`] if the token is not two
    /// base64url segments, the claims are not valid JSON, or the signature
    /// is not 65 bytes.
    pub fn parse(token: &str) -> IdentityResult<Self> {
        let (claims_part, signature_part) = token
            .split_once('.')
            .ok_or_else(|| IdentityError::BadSignature("missing signature segment".into()))?;

        let claims_bytes = URL_SAFE_NO_PAD
            .decode(claims_part)
            .map_err(|e| IdentityError::BadSignature(format!("claims segment: {e}")))?;
        let signature_bytes = URL_SAFE_NO_PAD
            .decode(signature_part)
            .map_err(|e| IdentityError::BadSignature(format!("signature segment: {e}")))?;

        let claims: AccessKeyClaims = serde_json::from_slice(&claims_bytes)
            .map_err(|e| IdentityError::BadSignature(format!("claims: {e}")))?;

        let signature: [u8; SIGNATURE_LEN] = signature_bytes
            .try_into()
            .map_err(|_| IdentityError::BadSignature("signature must be 65 bytes".into()))?;

        Ok(Self {
            claims,
            claims_bytes,
            signature,
        })
    }

    /// Mint a bearer token by signing `claims` with a raw private key under
    /// the Access domain.
    ///
    /// # Errors
    ///
    /// Returns a crypto error if signing fails.
    pub fn mint(claims: &AccessKeyClaims, private_key: &[u8; 32]) -> IdentityResult<String> {
        let claims_bytes = serde_json::to_vec(claims)
            .map_err(|e| IdentityError::Serialization(e.to_string()))?;
        let signature = sign(&claims_bytes, private_key, SigningDomain::Access)?;
        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&claims_bytes),
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }

    /// Recover the address that signed this key.
    ///
    /// The recovered signer must equal the `address` claim; a mismatch means
    /// the claims were tampered with or signed by someone else.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::BadSignature`] on mismatch or if recovery
    /// fails.
    pub fn recover_signer(&self) -> IdentityResult<Address> {
        let recovered =
            recover_address(&self.claims_bytes, &self.signature, SigningDomain::Access)
                .map_err(|e| IdentityError::BadSignature(e.to_string()))?;
        if recovered != self.claims.address {
            return Err(IdentityError::BadSignature(
                "recovered signer does not match address claim".into(),
            ));
        }
        Ok(recovered)
    }

    /// The parsed claims.
    #[must_use]
    pub fn claims(&self) -> &AccessKeyClaims {
        &self.claims
    }
}
