//! Plugin runtime error types.

use osaurus_core::{PluginId, SecretStoreError};
use osaurus_storage::DbError;

/// Errors from plugin loading, lifecycle, and dispatch.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// The platform loader could not open the shared library. The message is
    /// the platform's own, unmodified.
    #[error("failed to open plugin library: {0}")]
    OpenLibraryFailed(String),

    /// Neither the v2 nor the v1 entry symbol is exported.
    #[error("plugin exports no osaurus entry point")]
    MissingEntryPoint,

    /// The entry point returned a NULL API table.
    #[error("plugin entry point returned null")]
    EntryReturnedNull,

    /// `init()` is missing or returned a NULL context.
    #[error("plugin init failed: {0}")]
    InitFailed(String),

    /// The manifest could not be fetched or parsed.
    #[error("plugin manifest failed: {0}")]
    ManifestFailed(String),

    /// The manifest's `plugin_id` disagrees with the install directory.
    #[error("manifest plugin_id {found} does not match install id {expected}")]
    ManifestMismatch {
        /// The id the plugin was installed under.
        expected: PluginId,
        /// The id the manifest declared.
        found: String,
    },

    /// The plugin declares no route handler (v1 plugin, or NULL slot).
    #[error("plugin has no route handler")]
    RouteHandlerNotAvailable,

    /// The plugin's function table lacks a required entry.
    #[error("plugin table lacks required function: {0}")]
    MissingFunction(&'static str),

    /// The plugin returned NULL from an invocation, distinct from a
    /// handler-level error so callers can tell crashes from failures.
    #[error("plugin returned null")]
    PluginReturnedNull,

    /// The dispatcher timed out waiting for the plugin. The underlying call
    /// keeps running; its eventual result is discarded.
    #[error("plugin call timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The dispatch work queue has shut down.
    #[error("dispatch queue unavailable")]
    DispatchUnavailable,

    /// No plugin with this id is loaded.
    #[error("plugin not loaded: {0}")]
    NotLoaded(PluginId),

    /// No install exists for this plugin id.
    #[error("plugin not installed: {0}")]
    NotInstalled(PluginId),

    /// A plugin with this id is already loaded.
    #[error("plugin already loaded: {0}")]
    AlreadyLoaded(PluginId),

    /// The plugin package (zip) is malformed or unsafe to extract.
    #[error("invalid plugin package: {0}")]
    PackageInvalid(String),

    /// Sandbox database failure.
    #[error(transparent)]
    Storage(#[from] DbError),

    /// Secret store failure.
    #[error(transparent)]
    Secret(#[from] SecretStoreError),

    /// I/O failure while working with the install tree.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A string could not cross the ABI (embedded NUL, invalid UTF-8).
    #[error("ABI string error: {0}")]
    AbiString(String),
}

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;
