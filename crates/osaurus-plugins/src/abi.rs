//! `#[repr(C)]` mirror of `include/osaurus_plugin.h`.
//!
//! These definitions must stay field-for-field identical to the header;
//! the header is the contract plugins compile against. Function pointers
//! are wrapped in `Option` so a zeroed v2 tail (a v1 plugin's table) reads
//! as `None` instead of an undefined call target.

use std::os::raw::{c_char, c_int, c_void};

/// ABI version exported by v1 plugins.
pub const ABI_VERSION_1: u32 = 1;
/// ABI version exported by v2 plugins.
pub const ABI_VERSION_2: u32 = 2;

/// The v1 entry symbol, tried second.
pub const ENTRY_SYMBOL_V1: &[u8] = b"osaurus_plugin_entry";
/// The v2 entry symbol, tried first.
pub const ENTRY_SYMBOL_V2: &[u8] = b"osaurus_plugin_entry_v2";

/// Log level values for `osr_host_api.log`.
pub mod log_level {
    /// Debug-level diagnostics.
    pub const DEBUG: i32 = 0;
    /// Informational messages.
    pub const INFO: i32 = 1;
    /// Warnings.
    pub const WARN: i32 = 2;
    /// Errors.
    pub const ERROR: i32 = 3;
}

/// Opaque context pointer provided by the plugin at `init`.
pub type PluginCtx = *mut c_void;

/// `config_get(key) -> cstr | null`
pub type ConfigGetFn = unsafe extern "C" fn(key: *const c_char) -> *const c_char;
/// `config_set(key, value)`
pub type ConfigSetFn = unsafe extern "C" fn(key: *const c_char, value: *const c_char);
/// `config_delete(key)`
pub type ConfigDeleteFn = unsafe extern "C" fn(key: *const c_char);
/// `db_exec(sql, params_json | null) -> cstr`
pub type DbExecFn =
    unsafe extern "C" fn(sql: *const c_char, params_json: *const c_char) -> *const c_char;
/// `db_query(sql, params_json | null) -> cstr`
pub type DbQueryFn =
    unsafe extern "C" fn(sql: *const c_char, params_json: *const c_char) -> *const c_char;
/// `log(level, message)`
pub type LogFn = unsafe extern "C" fn(level: c_int, message: *const c_char);

/// Host callbacks injected into v2 plugins at entry (`osr_host_api`).
#[repr(C)]
#[derive(Clone, Copy)]
pub struct OsrHostApi {
    /// `OSR_ABI_VERSION_2`.
    pub version: u32,
    /// Read a config value. Returned string is malloc'd; plugin frees it.
    pub config_get: Option<ConfigGetFn>,
    /// Write a config value.
    pub config_set: Option<ConfigSetFn>,
    /// Delete a config value.
    pub config_delete: Option<ConfigDeleteFn>,
    /// Execute a statement in the plugin's sandbox database.
    pub db_exec: Option<DbExecFn>,
    /// Query the plugin's sandbox database.
    pub db_query: Option<DbQueryFn>,
    /// Structured logging (0=debug, 1=info, 2=warn, 3=error).
    pub log: Option<LogFn>,
}

// SAFETY: the table holds only `extern "C"` function pointers into the host
// itself; it is immutable after construction and valid for the process
// lifetime.
unsafe impl Send for OsrHostApi {}
unsafe impl Sync for OsrHostApi {}

/// The plugin's function table (`osr_plugin_api`).
///
/// The first five fields are the v1 surface; everything from `version` on
/// is the v2 tail and reads as zero/`None` for v1 plugins.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct OsrPluginApi {
    /// Free a string previously returned by the plugin.
    pub free_string: Option<unsafe extern "C" fn(s: *const c_char)>,
    /// Initialize; returns the opaque context or NULL on failure.
    pub init: Option<unsafe extern "C" fn() -> PluginCtx>,
    /// Destroy the context and free plugin resources.
    pub destroy: Option<unsafe extern "C" fn(ctx: PluginCtx)>,
    /// Return the manifest JSON. Host copies then calls `free_string`.
    pub get_manifest: Option<unsafe extern "C" fn(ctx: PluginCtx) -> *const c_char>,
    /// Generic invocation: `(type, id, payload_json) -> response_json`.
    pub invoke: Option<
        unsafe extern "C" fn(
            ctx: PluginCtx,
            kind: *const c_char,
            id: *const c_char,
            payload_json: *const c_char,
        ) -> *const c_char,
    >,
    /// ABI version: 0/absent for v1, 2 for v2.
    pub version: u32,
    /// HTTP route handler; may be NULL if the plugin has no routes.
    pub handle_route: Option<
        unsafe extern "C" fn(ctx: PluginCtx, request_json: *const c_char) -> *const c_char,
    >,
    /// Config change notification; may be NULL.
    pub on_config_changed: Option<
        unsafe extern "C" fn(ctx: PluginCtx, key: *const c_char, value: *const c_char),
    >,
}

// SAFETY: the table is a shallow copy of the plugin's static struct; the
// ABI requires those pointers stay valid while the library is loaded, and
// the loader keeps the library alive for the table's lifetime.
unsafe impl Send for OsrPluginApi {}
unsafe impl Sync for OsrPluginApi {}

/// v1 entry: `const osr_plugin_api* osaurus_plugin_entry(void)`.
pub type EntryV1Fn = unsafe extern "C" fn() -> *const OsrPluginApi;
/// v2 entry: `const osr_plugin_api* osaurus_plugin_entry_v2(const osr_host_api*)`.
pub type EntryV2Fn = unsafe extern "C" fn(host: *const OsrHostApi) -> *const OsrPluginApi;

/// A `Send`/`Sync` wrapper for the opaque plugin context.
///
/// The ABI threads the pointer through every call unchanged; the host never
/// dereferences it.
#[derive(Debug, Clone, Copy)]
pub struct RawCtx(
    /// The pointer exactly as the plugin's `init` returned it.
    pub PluginCtx,
);

// SAFETY: the host only stores and forwards this pointer; the plugin is
// responsible for its own context's thread-safety, and all entries into the
// plugin are serialised on the dispatch work queue.
unsafe impl Send for RawCtx {}
unsafe impl Sync for RawCtx {}
