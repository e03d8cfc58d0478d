//! Osaurus Core - shared vocabulary for the plugin runtime.
//!
//! This crate holds the types every other Osaurus crate speaks:
//! - [`PluginId`]: validated, stable plugin identifiers
//! - [`SecretStore`]: the narrow secret persistence seam (OS keychain in
//!   production, in-memory for tests)
//! - [`OsaurusHome`]: the on-disk layout for plugin data and installs
//! - [`slots`]: the named secret-store slots the runtime persists state in

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod dirs;
mod plugin_id;
mod secret;

pub mod slots;

pub use dirs::OsaurusHome;
pub use plugin_id::PluginId;
pub use secret::{KeyringSecretStore, MemorySecretStore, SecretStore, SecretStoreError};

/// Result type for secret store operations.
pub type SecretResult<T> = Result<T, SecretStoreError>;
