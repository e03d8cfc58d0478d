//! Osaurus Crypto - identity primitives for the plugin runtime.
//!
//! This crate provides:
//! - Keccak-256 (the pre-NIST construction Ethereum uses, not SHA3-256)
//! - 20-byte addresses with mixed-case checksum encoding
//! - Domain-separated signing and signer recovery over secp256k1
//! - Deterministic per-agent key derivation from a master secret
//!
//! # Security Philosophy
//!
//! Authorization in Osaurus comes from recoverable signatures, not from
//! trusting the bearer. Agent keys are never stored; they are re-derived
//! from the master secret on every use and zeroed on scope exit.
//!
//! # Example
//!
//! ```
//! use osaurus_crypto::{derive_address, recover_address, sign, SigningDomain};
//!
//! let private_key = [7u8; 32];
//! let signature = sign(b"payload", &private_key, SigningDomain::Message).unwrap();
//! let signer = recover_address(b"payload", &signature, SigningDomain::Message).unwrap();
//! assert_eq!(signer, derive_address(&private_key).unwrap());
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod address;
mod agent;
mod error;
mod keccak;
mod signer;

pub use address::Address;
pub use agent::{derive_agent_address, derive_agent_key, sign_as_agent, AGENT_DERIVATION_TAG};
pub use error::{CryptoError, CryptoResult};
pub use keccak::keccak256;
pub use signer::{
    derive_address, envelope_digest, recover_address, sign, SigningDomain, SIGNATURE_LEN,
};
