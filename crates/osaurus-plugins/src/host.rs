//! Per-plugin host contexts and the C callback trampolines.
//!
//! Plugins call back into the host from whatever thread they like, through
//! bare function pointers that carry no context argument. The host
//! therefore keeps (a) a process-wide registry of live host contexts keyed
//! by plugin id, and (b) a thread-local naming the plugin currently being
//! served on this thread. Every entry into native code sets the
//! thread-local via [`ActivePluginGuard`]; the trampolines resolve it to
//! find the right context.
//!
//! Strings returned to the plugin are duplicated onto the C heap
//! (`malloc`), matching the ownership contract in `osaurus_plugin.h`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::CStr;
use std::os::raw::{c_char, c_int};
use std::path::Path;
use std::sync::{Arc, OnceLock, RwLock};

use tracing::{debug, error, info, warn};

use osaurus_core::{slots, PluginId, SecretStore, SecretStoreError};
use osaurus_storage::{DbError, PluginDatabase};

use crate::abi::{self, OsrHostApi};
use crate::error::{PluginError, PluginResult};

/// The process-wide host API table handed to v2 plugins.
///
/// One static serves every plugin: the trampolines resolve the calling
/// plugin through the active-plugin thread-local, so the table itself is
/// context-free and lives for the process lifetime (plugins may keep the
/// pointer indefinitely).
pub(crate) static HOST_API: OsrHostApi = OsrHostApi {
    version: abi::ABI_VERSION_2,
    config_get: Some(config_get_tramp),
    config_set: Some(config_set_tramp),
    config_delete: Some(config_delete_tramp),
    db_exec: Some(db_exec_tramp),
    db_query: Some(db_query_tramp),
    log: Some(log_tramp),
};

fn contexts() -> &'static RwLock<HashMap<String, Arc<PluginHostContext>>> {
    static CONTEXTS: OnceLock<RwLock<HashMap<String, Arc<PluginHostContext>>>> = OnceLock::new();
    CONTEXTS.get_or_init(RwLock::default)
}

thread_local! {
    static ACTIVE_PLUGIN: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Marks this worker thread as serving a plugin for the duration of a C
/// call. Restores the previous value on drop, so nested host-initiated
/// calls behave.
pub struct ActivePluginGuard {
    previous: Option<String>,
}

impl ActivePluginGuard {
    /// Set the active plugin for this thread.
    #[must_use]
    pub fn enter(plugin_id: &PluginId) -> Self {
        let previous =
            ACTIVE_PLUGIN.with(|cell| cell.replace(Some(plugin_id.as_str().to_owned())));
        Self { previous }
    }

    /// The plugin currently active on this thread, if any.
    #[must_use]
    pub fn current() -> Option<String> {
        ACTIVE_PLUGIN.with(|cell| cell.borrow().clone())
    }
}

impl Drop for ActivePluginGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        ACTIVE_PLUGIN.with(|cell| {
            *cell.borrow_mut() = previous;
        });
    }
}

fn active_context() -> Option<Arc<PluginHostContext>> {
    let id = ActivePluginGuard::current()?;
    contexts().read().ok()?.get(&id).cloned()
}

/// Everything the host provides to one plugin: its sandbox database, its
/// config document, and its identity for logging.
///
/// Created before the plugin's entry point runs; released after `destroy`
/// returns. Registration makes the context visible to the trampolines.
pub struct PluginHostContext {
    plugin_id: PluginId,
    db: PluginDatabase,
    secrets: Arc<dyn SecretStore>,
    config: RwLock<HashMap<String, String>>,
}

impl PluginHostContext {
    /// Open the plugin's database, load its config document, and register
    /// the context for trampoline lookup.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::AlreadyLoaded`] if a context for this id is
    /// already registered, or a storage error if the database cannot open.
    pub fn register(
        plugin_id: PluginId,
        db_path: &Path,
        secrets: Arc<dyn SecretStore>,
    ) -> PluginResult<Arc<Self>> {
        let config = load_config_doc(secrets.as_ref(), &plugin_id)?;
        let db = PluginDatabase::open(db_path)?;
        let context = Arc::new(Self {
            plugin_id: plugin_id.clone(),
            db,
            secrets,
            config: RwLock::new(config),
        });

        let mut registry = contexts()
            .write()
            .map_err(|e| PluginError::AbiString(e.to_string()))?;
        if registry.contains_key(plugin_id.as_str()) {
            return Err(PluginError::AlreadyLoaded(plugin_id));
        }
        registry.insert(plugin_id.as_str().to_owned(), Arc::clone(&context));
        debug!(plugin_id = %plugin_id, "Registered plugin host context");
        Ok(context)
    }

    /// Deregister from trampoline lookup and close the database.
    ///
    /// Called during unload after the plugin's `destroy` has returned.
    pub fn release(&self) {
        if let Ok(mut registry) = contexts().write() {
            registry.remove(self.plugin_id.as_str());
        }
        self.db.close();
        debug!(plugin_id = %self.plugin_id, "Released plugin host context");
    }

    /// The plugin this context belongs to.
    #[must_use]
    pub fn plugin_id(&self) -> &PluginId {
        &self.plugin_id
    }

    /// The plugin's sandbox database.
    #[must_use]
    pub fn database(&self) -> &PluginDatabase {
        &self.db
    }

    /// A copy of the plugin's config document.
    #[must_use]
    pub fn config_map(&self) -> HashMap<String, String> {
        self.config.read().map(|map| map.clone()).unwrap_or_default()
    }

    /// Read one config value.
    #[must_use]
    pub fn config_get(&self, key: &str) -> Option<String> {
        self.config.read().ok()?.get(key).cloned()
    }

    /// Write one config value, persisting the document before returning.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Secret`] if persistence fails.
    pub fn config_set(&self, key: &str, value: &str) -> PluginResult<()> {
        let mut map = self
            .config
            .write()
            .map_err(|e| PluginError::AbiString(e.to_string()))?;
        map.insert(key.to_owned(), value.to_owned());
        store_config_doc(self.secrets.as_ref(), &self.plugin_id, &map)?;
        Ok(())
    }

    /// Delete one config value, persisting the document before returning.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Secret`] if persistence fails.
    pub fn config_delete(&self, key: &str) -> PluginResult<()> {
        let mut map = self
            .config
            .write()
            .map_err(|e| PluginError::AbiString(e.to_string()))?;
        if map.remove(key).is_some() {
            store_config_doc(self.secrets.as_ref(), &self.plugin_id, &map)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for PluginHostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHostContext")
            .field("plugin_id", &self.plugin_id)
            .field("db_path", &self.db.path())
            .finish_non_exhaustive()
    }
}

fn load_config_doc(
    secrets: &dyn SecretStore,
    plugin_id: &PluginId,
) -> Result<HashMap<String, String>, SecretStoreError> {
    match secrets.get(slots::PLUGIN_CONFIG_SERVICE, plugin_id.as_str())? {
        Some(bytes) => match serde_json::from_slice(&bytes) {
            Ok(map) => Ok(map),
            Err(e) => {
                warn!(plugin_id = %plugin_id, error = %e, "corrupt plugin config document; starting empty");
                Ok(HashMap::new())
            }
        },
        None => Ok(HashMap::new()),
    }
}

fn store_config_doc(
    secrets: &dyn SecretStore,
    plugin_id: &PluginId,
    map: &HashMap<String, String>,
) -> Result<(), SecretStoreError> {
    let bytes = serde_json::to_vec(map).unwrap_or_default();
    secrets.set(slots::PLUGIN_CONFIG_SERVICE, plugin_id.as_str(), &bytes)
}

// ── ABI string helpers ──

/// Borrow a C string argument for the duration of a call.
///
/// # Safety
///
/// `ptr` must be NULL or a valid NUL-terminated string.
unsafe fn cstr_arg<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: non-null and NUL-terminated per the ABI contract.
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// Duplicate a Rust string onto the C heap so the plugin can `free()` it.
///
/// Returns NULL on allocation failure. The ABI carries JSON and config
/// text, which never contain NUL bytes; if one sneaks in the C reader sees
/// a truncated string, nothing worse.
pub(crate) fn to_c_heap(s: &str) -> *const c_char {
    let bytes = s.as_bytes();
    // SAFETY: we allocate len + 1 bytes, copy len bytes, and terminate.
    unsafe {
        let buf = libc::malloc(bytes.len() + 1).cast::<u8>();
        if buf.is_null() {
            return std::ptr::null();
        }
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), buf, bytes.len());
        *buf.add(bytes.len()) = 0;
        buf.cast::<c_char>()
    }
}

// ── Trampolines ──
//
// Every trampoline catches panics (unwinding across the C boundary would
// abort the process) and resolves the calling plugin via the thread-local.

unsafe extern "C" fn config_get_tramp(key: *const c_char) -> *const c_char {
    let value = std::panic::catch_unwind(|| {
        // SAFETY: ABI contract, see cstr_arg.
        let key = unsafe { cstr_arg(key) }?;
        active_context()?.config_get(key)
    });
    match value {
        Ok(Some(value)) => to_c_heap(&value),
        _ => std::ptr::null(),
    }
}

unsafe extern "C" fn config_set_tramp(key: *const c_char, value: *const c_char) {
    let _ = std::panic::catch_unwind(|| {
        // SAFETY: ABI contract, see cstr_arg.
        let (Some(key), Some(value)) = (unsafe { cstr_arg(key) }, unsafe { cstr_arg(value) })
        else {
            return;
        };
        let Some(ctx) = active_context() else { return };
        if let Err(e) = ctx.config_set(key, value) {
            warn!(plugin_id = %ctx.plugin_id(), key, error = %e, "config_set failed");
        }
    });
}

unsafe extern "C" fn config_delete_tramp(key: *const c_char) {
    let _ = std::panic::catch_unwind(|| {
        // SAFETY: ABI contract, see cstr_arg.
        let Some(key) = (unsafe { cstr_arg(key) }) else {
            return;
        };
        let Some(ctx) = active_context() else { return };
        if let Err(e) = ctx.config_delete(key) {
            warn!(plugin_id = %ctx.plugin_id(), key, error = %e, "config_delete failed");
        }
    });
}

/// Shared body of the two database trampolines.
///
/// # Safety
///
/// `sql` and `params_json` must be NULL or valid NUL-terminated strings.
unsafe fn db_call(
    sql: *const c_char,
    params_json: *const c_char,
    run: impl Fn(&PluginDatabase, &str, Option<&serde_json::Value>) -> String,
) -> String {
    // SAFETY: ABI contract, see cstr_arg.
    let Some(sql) = (unsafe { cstr_arg(sql) }) else {
        return DbError::ExecFailed("sql must be a valid UTF-8 string".into()).to_wire();
    };
    let Some(ctx) = active_context() else {
        return DbError::NotOpen.to_wire();
    };

    // SAFETY: ABI contract, see cstr_arg.
    let params = match unsafe { cstr_arg(params_json) } {
        None => None,
        Some(text) => match serde_json::from_str::<serde_json::Value>(text) {
            Ok(value) => Some(value),
            Err(e) => {
                return DbError::ExecFailed(format!("invalid params JSON: {e}")).to_wire();
            }
        },
    };

    run(ctx.database(), sql, params.as_ref())
}

unsafe extern "C" fn db_exec_tramp(
    sql: *const c_char,
    params_json: *const c_char,
) -> *const c_char {
    let response = std::panic::catch_unwind(|| {
        // SAFETY: forwarded ABI pointers, see db_call.
        unsafe { db_call(sql, params_json, |db, sql, params| db.exec_wire(sql, params)) }
    })
    .unwrap_or_else(|_| DbError::ExecFailed("internal error".into()).to_wire());
    to_c_heap(&response)
}

unsafe extern "C" fn db_query_tramp(
    sql: *const c_char,
    params_json: *const c_char,
) -> *const c_char {
    let response = std::panic::catch_unwind(|| {
        // SAFETY: forwarded ABI pointers, see db_call.
        unsafe { db_call(sql, params_json, |db, sql, params| db.query_wire(sql, params)) }
    })
    .unwrap_or_else(|_| DbError::ExecFailed("internal error".into()).to_wire());
    to_c_heap(&response)
}

unsafe extern "C" fn log_tramp(level: c_int, message: *const c_char) {
    let _ = std::panic::catch_unwind(|| {
        if message.is_null() {
            return;
        }
        // SAFETY: non-null and NUL-terminated per the ABI contract.
        let message = unsafe { CStr::from_ptr(message) }.to_string_lossy();
        let plugin = ActivePluginGuard::current().unwrap_or_else(|| "unknown".into());
        match level {
            abi::log_level::DEBUG => debug!(plugin_id = %plugin, "{message}"),
            abi::log_level::INFO => info!(plugin_id = %plugin, "{message}"),
            abi::log_level::WARN => warn!(plugin_id = %plugin, "{message}"),
            _ => error!(plugin_id = %plugin, "{message}"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    use osaurus_core::MemorySecretStore;

    /// Copy a trampoline-returned string and free the C allocation.
    unsafe fn take_cstr(ptr: *const c_char) -> Option<String> {
        if ptr.is_null() {
            return None;
        }
        // SAFETY: trampolines return NUL-terminated malloc'd strings.
        let s = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
        // SAFETY: the string was allocated with libc::malloc.
        unsafe { libc::free(ptr.cast_mut().cast()) };
        Some(s)
    }

    fn register(id: &str) -> (tempfile::TempDir, Arc<PluginHostContext>) {
        let dir = tempfile::tempdir().unwrap();
        let ctx = PluginHostContext::register(
            PluginId::from_static(id),
            &dir.path().join("data.db"),
            Arc::new(MemorySecretStore::new()),
        )
        .unwrap();
        (dir, ctx)
    }

    #[test]
    fn test_guard_sets_and_restores() {
        assert!(ActivePluginGuard::current().is_none());
        {
            let _outer = ActivePluginGuard::enter(&PluginId::from_static("outer"));
            assert_eq!(ActivePluginGuard::current().as_deref(), Some("outer"));
            {
                let _inner = ActivePluginGuard::enter(&PluginId::from_static("inner"));
                assert_eq!(ActivePluginGuard::current().as_deref(), Some("inner"));
            }
            assert_eq!(ActivePluginGuard::current().as_deref(), Some("outer"));
        }
        assert!(ActivePluginGuard::current().is_none());
    }

    #[test]
    fn test_config_round_trip_through_trampolines() {
        let (_dir, ctx) = register("host.cfg");
        let _guard = ActivePluginGuard::enter(ctx.plugin_id());

        let key = CString::new("api_key").unwrap();
        let value = CString::new("sk-123").unwrap();

        // SAFETY: valid C strings, active plugin set.
        unsafe {
            config_set_tramp(key.as_ptr(), value.as_ptr());
            let got = take_cstr(config_get_tramp(key.as_ptr()));
            assert_eq!(got.as_deref(), Some("sk-123"));

            config_delete_tramp(key.as_ptr());
            assert!(take_cstr(config_get_tramp(key.as_ptr())).is_none());
        }
        ctx.release();
    }

    #[test]
    fn test_db_trampolines_speak_wire_json() {
        let (_dir, ctx) = register("host.db");
        let _guard = ActivePluginGuard::enter(ctx.plugin_id());

        let create = CString::new("CREATE TABLE kv(k TEXT, v TEXT)").unwrap();
        let insert = CString::new("INSERT INTO kv VALUES (?1, ?2)").unwrap();
        let params = CString::new(r#"["a","1"]"#).unwrap();
        let select = CString::new("SELECT * FROM kv").unwrap();

        // SAFETY: valid C strings, active plugin set.
        unsafe {
            let out = take_cstr(db_exec_tramp(create.as_ptr(), std::ptr::null())).unwrap();
            assert!(out.contains("\"changes\""));

            let out = take_cstr(db_exec_tramp(insert.as_ptr(), params.as_ptr())).unwrap();
            let value: serde_json::Value = serde_json::from_str(&out).unwrap();
            assert_eq!(value["changes"], 1);

            let out = take_cstr(db_query_tramp(select.as_ptr(), std::ptr::null())).unwrap();
            let value: serde_json::Value = serde_json::from_str(&out).unwrap();
            assert_eq!(value["columns"], serde_json::json!(["k", "v"]));
            assert_eq!(value["rows"][0][0], "\"a\"");
        }
        ctx.release();
    }

    #[test]
    fn test_trampolines_without_active_plugin() {
        let sql = CString::new("SELECT 1").unwrap();
        let key = CString::new("k").unwrap();

        // SAFETY: valid C strings; no active plugin on this thread.
        unsafe {
            assert!(take_cstr(config_get_tramp(key.as_ptr())).is_none());
            let out = take_cstr(db_exec_tramp(sql.as_ptr(), std::ptr::null())).unwrap();
            assert!(out.contains("error"));
        }
    }

    #[test]
    fn test_invalid_params_json_is_a_wire_error() {
        let (_dir, ctx) = register("host.badparams");
        let _guard = ActivePluginGuard::enter(ctx.plugin_id());

        let sql = CString::new("SELECT 1").unwrap();
        let params = CString::new("{not json").unwrap();

        // SAFETY: valid C strings, active plugin set.
        unsafe {
            let out = take_cstr(db_exec_tramp(sql.as_ptr(), params.as_ptr())).unwrap();
            let value: serde_json::Value = serde_json::from_str(&out).unwrap();
            assert!(value["error"].as_str().unwrap().contains("invalid params JSON"));
        }
        ctx.release();
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let (_dir, ctx) = register("host.dup");
        let dir2 = tempfile::tempdir().unwrap();
        let result = PluginHostContext::register(
            PluginId::from_static("host.dup"),
            &dir2.path().join("data.db"),
            Arc::new(MemorySecretStore::new()),
        );
        assert!(matches!(result, Err(PluginError::AlreadyLoaded(_))));
        ctx.release();
    }

    #[test]
    fn test_release_makes_context_invisible() {
        let (_dir, ctx) = register("host.release");
        ctx.release();

        let _guard = ActivePluginGuard::enter(&PluginId::from_static("host.release"));
        let key = CString::new("k").unwrap();
        // SAFETY: valid C string.
        unsafe {
            assert!(take_cstr(config_get_tramp(key.as_ptr())).is_none());
        }
    }

    #[test]
    fn test_config_persists_across_reregistration() {
        let backend = Arc::new(MemorySecretStore::new());
        let dir = tempfile::tempdir().unwrap();
        let id = PluginId::from_static("host.persist");

        let ctx =
            PluginHostContext::register(id.clone(), &dir.path().join("data.db"), backend.clone())
                .unwrap();
        ctx.config_set("k", "v").unwrap();
        ctx.release();

        let ctx =
            PluginHostContext::register(id, &dir.path().join("data.db"), backend).unwrap();
        assert_eq!(ctx.config_get("k").as_deref(), Some("v"));
        ctx.release();
    }

    #[test]
    fn test_to_c_heap_round_trip() {
        let ptr = to_c_heap("hello");
        // SAFETY: freshly allocated by to_c_heap.
        let back = unsafe { take_cstr(ptr) };
        assert_eq!(back.as_deref(), Some("hello"));
    }
}
