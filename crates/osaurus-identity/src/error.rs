//! Identity error types.

use osaurus_core::SecretStoreError;
use osaurus_crypto::CryptoError;

/// Errors from identity and access-key operations.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// The OS random number generator failed while minting key material.
    #[error("secure random generation failed: {0}")]
    RandomFailed(String),

    /// A secret-store read or write failed.
    #[error(transparent)]
    Secret(#[from] SecretStoreError),

    /// A cryptographic operation failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// A persisted state document could not be encoded or decoded.
    #[error("state serialization failed: {0}")]
    Serialization(String),

    /// No account exists on this device; every key is rejected.
    #[error("no account")]
    NoAccount,

    /// The key's signer is not on the effective whitelist.
    #[error("signer not whitelisted: {0}")]
    NotWhitelisted(String),

    /// The key has been revoked, individually or by counter threshold.
    #[error("access key revoked")]
    Revoked,

    /// The key's counter does not exceed the highest counter already seen
    /// from its signer.
    #[error("replayed counter: {counter} <= {highest_seen}")]
    ReplayedCounter {
        /// Counter carried by the rejected key.
        counter: u64,
        /// Highest counter previously admitted from the signer.
        highest_seen: u64,
    },

    /// The key failed to parse or its signature did not recover the claimed
    /// signer.
    #[error("bad signature: {0}")]
    BadSignature(String),
}

/// Result type for identity operations.
pub type IdentityResult<T> = Result<T, IdentityError>;
