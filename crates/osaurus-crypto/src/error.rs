//! Cryptographic error types.

use thiserror::Error;

/// Errors that can occur during cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The OS random number generator failed.
    #[error("secure random generation failed: {0}")]
    RandomFailed(String),

    /// Signing failed (malformed private key or signature material).
    #[error("signing failed: {0}")]
    SigningFailed(String),

    /// Recovering the signer's address from a signature failed.
    #[error("address recovery failed: {0}")]
    AddressRecoveryFailed(String),

    /// An address string could not be parsed.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// Result type for cryptographic operations.
pub type CryptoResult<T> = Result<T, CryptoError>;
