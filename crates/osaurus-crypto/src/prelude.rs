//! Prelude module - commonly used types for convenient import.
//!
//! Use `use osaurus_crypto::prelude::*;` to import all essential items.
//!
//! # Example
//!
//! ```rust
//! use osaurus_crypto::prelude::*;
//!
//! let private_key = [7u8; 32];
//! let signature = sign(b"hello", &private_key, SigningDomain::Message).unwrap();
//! let signer = recover_address(b"hello", &signature, SigningDomain::Message).unwrap();
//! assert_eq!(signer, derive_address(&private_key).unwrap());
//! ```

// Errors
pub use crate::{CryptoError, CryptoResult};

// Addresses
pub use crate::Address;

// Hashing
pub use crate::keccak256;

// Signing and recovery
pub use crate::{derive_address, envelope_digest, recover_address, sign, SigningDomain};

// Agent derivation
pub use crate::{derive_agent_address, derive_agent_key, sign_as_agent};
