//! Osaurus Identity - account state and access-key validation.
//!
//! This crate owns everything between the raw crypto primitives and an
//! admit/reject decision for a bearer access key:
//!
//! - [`MasterKeyStore`]: the device master secret (generated once, held in
//!   the OS keychain, zeroed after every in-memory use)
//! - [`WhitelistStore`]: master-level and per-agent signer whitelists
//! - [`RevocationStore`]: individually revoked keys and per-address counter
//!   thresholds, with cheap immutable snapshots
//! - [`CounterStore`]: the per-device monotonic replay counter
//! - [`AccessKeyValidator`]: the per-request decision combining all of the
//!   above
//!
//! Stores persist as JSON documents in named secret slots and are loaded
//! once at startup and never lazily re-initialised. Writes are serialised
//! behind each store's lock and durable before the mutating call returns;
//! reads never take a write lock.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod access_key;
mod counter;
mod error;
mod master;
mod revocation;
mod validator;
mod whitelist;

pub use access_key::{AccessKey, AccessKeyClaims};
pub use counter::CounterStore;
pub use error::{IdentityError, IdentityResult};
pub use master::MasterKeyStore;
pub use revocation::{RevocationSnapshot, RevocationStore};
pub use validator::AccessKeyValidator;
pub use whitelist::WhitelistStore;
