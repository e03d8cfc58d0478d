//! Osaurus Plugins - the dynamic plugin runtime.
//!
//! Loads third-party shared libraries through the stable C ABI declared in
//! `include/osaurus_plugin.h`, gives each one a host context (config slot,
//! sandboxed SQLite database, structured logging), and dispatches tool
//! invocations and HTTP route calls onto a dedicated work queue.
//!
//! # Safety model
//!
//! This is the one Osaurus crate that speaks FFI, so it is the one crate
//! allowed `unsafe`. The load-bearing rules:
//!
//! - The host API table is a process-wide static; plugins may keep the
//!   pointer for their whole lifetime.
//! - Host callbacks identify the calling plugin through a thread-local set
//!   around every entry into native code ([`host::ActivePluginGuard`]).
//! - Strings never cross heaps: plugin-owned strings are copied then
//!   released via `free_string`; host-owned strings are duplicated onto the
//!   C heap so the plugin can `free()` them.
//! - A plugin's library handle is closed only after `destroy` has returned
//!   and its host context is released.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![deny(unsafe_op_in_unsafe_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod abi;

mod dispatch;
mod error;
mod host;
mod loader;
mod manager;
mod manifest;
mod package;

pub use dispatch::{Dispatcher, InvokeInjection, WorkQueue};
pub use error::{PluginError, PluginResult};
pub use host::{ActivePluginGuard, PluginHostContext};
pub use loader::{load_plugin, LoadedPlugin};
pub use manager::PluginManager;
pub use manifest::{
    missing_required_secrets, ConfigFieldSpec, DocsSpec, PermissionPolicy, PluginCapabilities,
    PluginManifest, RouteAuth, RouteSpec, SecretSpec, ToolSpec, WebSpec,
};
pub use package::{install_package, InstalledPackage};

pub use osaurus_core::PluginId;
