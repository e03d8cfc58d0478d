//! Dynamic-library loading and the loaded-plugin handle.
//!
//! The load sequence, in order: find the install's single shared library,
//! open it, discover the entry point (v2 preferred, v1 fallback), allocate
//! the host context, call the entry and `init` with the active-plugin
//! thread-local set, fetch and verify the manifest. Any failure unwinds the
//! steps already taken; a plugin that fails to load leaves nothing behind.

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use libloading::Library;
use tracing::info;

use osaurus_core::{PluginId, SecretStore};

use crate::abi::{EntryV1Fn, EntryV2Fn, OsrPluginApi, RawCtx, ENTRY_SYMBOL_V1, ENTRY_SYMBOL_V2};
use crate::error::{PluginError, PluginResult};
use crate::host::{ActivePluginGuard, PluginHostContext, HOST_API};
use crate::manifest::PluginManifest;

/// Shared-library file extensions we recognise, per platform family.
const LIBRARY_EXTENSIONS: [&str; 3] = ["dylib", "so", "dll"];

/// Find the install directory's single shared library.
///
/// Exactly one is required: zero means a broken install, more than one
/// means an ambiguous package, and both fail fast.
pub(crate) fn find_library(install_dir: &Path) -> PluginResult<PathBuf> {
    let mut libraries = Vec::new();
    for entry in std::fs::read_dir(install_dir)? {
        let path = entry?.path();
        let is_library = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| LIBRARY_EXTENSIONS.contains(&ext));
        if path.is_file() && is_library {
            libraries.push(path);
        }
    }
    match libraries.len() {
        1 => Ok(libraries.remove(0)),
        0 => Err(PluginError::OpenLibraryFailed(format!(
            "no shared library found in {}",
            install_dir.display()
        ))),
        n => Err(PluginError::OpenLibraryFailed(format!(
            "{n} shared libraries found in {}, expected exactly one",
            install_dir.display()
        ))),
    }
}

/// A loaded plugin: its function table, opaque context, manifest, and the
/// library handle keeping it all alive.
///
/// All entries into the plugin set the active-plugin thread-local for the
/// duration of the native call, so host callbacks made from inside resolve
/// to this plugin's context.
pub struct LoadedPlugin {
    plugin_id: PluginId,
    manifest: PluginManifest,
    abi_version: u32,
    install_path: PathBuf,
    api: OsrPluginApi,
    ctx: RawCtx,
    host: Arc<PluginHostContext>,
    destroyed: AtomicBool,
    // Declared last: the library must outlive `api` and `ctx`, and field
    // order is drop order.
    _library: Library,
}

// SAFETY: the function table and context are used only through methods that
// serialise entries on the dispatch queue; the ABI requires the plugin's
// table to be callable from host-chosen threads.
unsafe impl Send for LoadedPlugin {}
unsafe impl Sync for LoadedPlugin {}

impl LoadedPlugin {
    /// The plugin's id.
    #[must_use]
    pub fn plugin_id(&self) -> &PluginId {
        &self.plugin_id
    }

    /// The manifest fetched at load time.
    #[must_use]
    pub fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    /// Detected ABI version (absent/zero reported by the table means 1).
    #[must_use]
    pub fn abi_version(&self) -> u32 {
        self.abi_version
    }

    /// The install directory the library was loaded from.
    #[must_use]
    pub fn install_path(&self) -> &Path {
        &self.install_path
    }

    /// The plugin's host context.
    #[must_use]
    pub fn host(&self) -> &Arc<PluginHostContext> {
        &self.host
    }

    /// Whether the plugin can serve HTTP routes.
    #[must_use]
    pub fn supports_routes(&self) -> bool {
        self.abi_version >= 2 && self.api.handle_route.is_some()
    }

    fn ensure_live(&self) -> PluginResult<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(PluginError::NotLoaded(self.plugin_id.clone()));
        }
        Ok(())
    }

    /// Copy a plugin-owned string and release it via `free_string`.
    fn copy_and_free(&self, ptr: *const c_char) -> Option<String> {
        if ptr.is_null() {
            return None;
        }
        // SAFETY: the plugin returned a NUL-terminated string it owns.
        let copied = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
        if let Some(free_string) = self.api.free_string {
            // SAFETY: same pointer, freed exactly once, by the plugin's own
            // deallocator per the ABI contract.
            unsafe { free_string(ptr) };
        }
        Some(copied)
    }

    /// Call the plugin's `invoke`. `Ok(None)` is a NULL return.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotLoaded`] after unload,
    /// [`PluginError::MissingFunction`] for a malformed table, or
    /// [`PluginError::AbiString`] if an argument cannot cross the ABI.
    pub fn invoke_raw(
        &self,
        kind: &str,
        id: &str,
        payload_json: &str,
    ) -> PluginResult<Option<String>> {
        self.ensure_live()?;
        let invoke = self
            .api
            .invoke
            .ok_or(PluginError::MissingFunction("invoke"))?;

        let kind = c_string(kind)?;
        let id = c_string(id)?;
        let payload = c_string(payload_json)?;

        let _guard = ActivePluginGuard::enter(&self.plugin_id);
        // SAFETY: table and ctx are valid while the library is loaded; the
        // arguments are valid C strings borrowed for the call.
        let out = unsafe { invoke(self.ctx.0, kind.as_ptr(), id.as_ptr(), payload.as_ptr()) };
        Ok(self.copy_and_free(out))
    }

    /// Call the plugin's `handle_route`. `Ok(None)` is a NULL return.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::RouteHandlerNotAvailable`] for v1 plugins or a
    /// NULL handler slot, plus the same errors as [`LoadedPlugin::invoke_raw`].
    pub fn handle_route_raw(&self, request_json: &str) -> PluginResult<Option<String>> {
        self.ensure_live()?;
        if self.abi_version < 2 {
            return Err(PluginError::RouteHandlerNotAvailable);
        }
        let handle_route = self
            .api
            .handle_route
            .ok_or(PluginError::RouteHandlerNotAvailable)?;

        let request = c_string(request_json)?;
        let _guard = ActivePluginGuard::enter(&self.plugin_id);
        // SAFETY: as in invoke_raw.
        let out = unsafe { handle_route(self.ctx.0, request.as_ptr()) };
        Ok(self.copy_and_free(out))
    }

    /// Notify the plugin of a config change, if it cares.
    pub fn notify_config_changed(&self, key: &str, value: Option<&str>) {
        if self.ensure_live().is_err() || self.abi_version < 2 {
            return;
        }
        let Some(on_config_changed) = self.api.on_config_changed else {
            return;
        };
        let (Ok(key), Ok(value)) = (
            c_string(key),
            c_string(value.unwrap_or_default()),
        ) else {
            return;
        };

        let _guard = ActivePluginGuard::enter(&self.plugin_id);
        // SAFETY: as in invoke_raw.
        unsafe { on_config_changed(self.ctx.0, key.as_ptr(), value.as_ptr()) };
    }

    /// Destroy the plugin context and release the host context.
    ///
    /// Idempotent. Callers must have drained outstanding calls first (the
    /// manager's unload gate does). The library itself closes when the last
    /// reference to this handle drops.
    pub(crate) fn unload_in_place(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(destroy) = self.api.destroy {
            let _guard = ActivePluginGuard::enter(&self.plugin_id);
            // SAFETY: ctx was produced by init and is passed back exactly as
            // received; destroy runs once.
            unsafe { destroy(self.ctx.0) };
        }
        self.host.release();
        info!(plugin_id = %self.plugin_id, "Unloaded plugin");
    }
}

impl Drop for LoadedPlugin {
    fn drop(&mut self) {
        self.unload_in_place();
    }
}

impl std::fmt::Debug for LoadedPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedPlugin")
            .field("plugin_id", &self.plugin_id)
            .field("abi_version", &self.abi_version)
            .field("install_path", &self.install_path)
            .finish_non_exhaustive()
    }
}

fn c_string(s: &str) -> PluginResult<CString> {
    CString::new(s).map_err(|e| PluginError::AbiString(e.to_string()))
}

/// Load the plugin installed at `install_dir`.
///
/// # Errors
///
/// Any of the loader taxonomy: [`PluginError::OpenLibraryFailed`],
/// [`PluginError::MissingEntryPoint`], [`PluginError::EntryReturnedNull`],
/// [`PluginError::InitFailed`], [`PluginError::ManifestFailed`], or
/// [`PluginError::ManifestMismatch`].
pub fn load_plugin(
    plugin_id: &PluginId,
    install_dir: &Path,
    db_path: &Path,
    secrets: Arc<dyn SecretStore>,
) -> PluginResult<LoadedPlugin> {
    let library_path = find_library(install_dir)?;

    // SAFETY: loading a shared object runs its initialisers; that is the
    // deal the plugin model makes. Malicious plugins are out of threat
    // scope; buggy ones are contained by the ABI discipline below.
    let library = unsafe { Library::new(&library_path) }
        .map_err(|e| PluginError::OpenLibraryFailed(e.to_string()))?;

    // Entry discovery: v2 first, then the v1 fallback.
    // SAFETY: symbol types match the header declarations.
    let v2_entry = unsafe { library.get::<EntryV2Fn>(ENTRY_SYMBOL_V2) }.ok().map(|s| *s);
    let v1_entry = if v2_entry.is_none() {
        // SAFETY: as above.
        unsafe { library.get::<EntryV1Fn>(ENTRY_SYMBOL_V1) }.ok().map(|s| *s)
    } else {
        None
    };
    if v2_entry.is_none() && v1_entry.is_none() {
        return Err(PluginError::MissingEntryPoint);
    }

    // Host context before the entry point runs: the plugin may call back
    // into the host from inside init.
    let host = PluginHostContext::register(plugin_id.clone(), db_path, secrets)?;

    let result = load_with_entry(plugin_id, v2_entry, v1_entry);
    match result {
        Ok((api, ctx, abi_version, manifest)) => {
            info!(
                plugin_id = %plugin_id,
                abi_version,
                library = %library_path.display(),
                "Loaded plugin"
            );
            Ok(LoadedPlugin {
                plugin_id: plugin_id.clone(),
                manifest,
                abi_version,
                install_path: install_dir.to_path_buf(),
                api,
                ctx,
                host,
                destroyed: AtomicBool::new(false),
                _library: library,
            })
        }
        Err(e) => {
            host.release();
            Err(e)
        }
    }
}

/// Steps 4-8 of the load sequence: entry, version, init, manifest.
fn load_with_entry(
    plugin_id: &PluginId,
    v2_entry: Option<EntryV2Fn>,
    v1_entry: Option<EntryV1Fn>,
) -> PluginResult<(OsrPluginApi, RawCtx, u32, PluginManifest)> {
    let guard = ActivePluginGuard::enter(plugin_id);

    let api_ptr = match (v2_entry, v1_entry) {
        // SAFETY: the host table is a process-lifetime static.
        (Some(entry), _) => unsafe { entry(&HOST_API) },
        // SAFETY: v1 entry takes no arguments.
        (None, Some(entry)) => unsafe { entry() },
        (None, None) => return Err(PluginError::MissingEntryPoint),
    };
    if api_ptr.is_null() {
        return Err(PluginError::EntryReturnedNull);
    }
    // Shallow copy of the table; the plugin's static stays the owner of any
    // data behind the pointers. Plugins compiled against the v2 header ship
    // the full struct with a zeroed tail, so the read is always in bounds.
    // SAFETY: non-null, points at the plugin's static api struct.
    let api = unsafe { std::ptr::read(api_ptr) };

    let abi_version = if api.version == 0 { 1 } else { api.version };

    let init = api.init.ok_or(PluginError::MissingFunction("init"))?;
    // SAFETY: table function with no arguments; active plugin is set.
    let ctx = unsafe { init() };
    if ctx.is_null() {
        return Err(PluginError::InitFailed("init returned null".into()));
    }
    let ctx = RawCtx(ctx);

    let manifest = match fetch_manifest(&api, ctx) {
        Ok(manifest) => manifest,
        Err(e) => {
            // init succeeded, so give the plugin its destroy before bailing.
            if let Some(destroy) = api.destroy {
                // SAFETY: ctx came from init; destroyed exactly once here.
                unsafe { destroy(ctx.0) };
            }
            return Err(e);
        }
    };
    drop(guard);

    if manifest.plugin_id != *plugin_id {
        let found = manifest.plugin_id.as_str().to_owned();
        if let Some(destroy) = api.destroy {
            let _guard = ActivePluginGuard::enter(plugin_id);
            // SAFETY: as above.
            unsafe { destroy(ctx.0) };
        }
        return Err(PluginError::ManifestMismatch {
            expected: plugin_id.clone(),
            found,
        });
    }

    Ok((api, ctx, abi_version, manifest))
}

fn fetch_manifest(api: &OsrPluginApi, ctx: RawCtx) -> PluginResult<PluginManifest> {
    let get_manifest = api
        .get_manifest
        .ok_or(PluginError::MissingFunction("get_manifest"))?;
    // SAFETY: ctx came from init; the call is serialised by the caller.
    let ptr = unsafe { get_manifest(ctx.0) };
    if ptr.is_null() {
        return Err(PluginError::ManifestFailed("get_manifest returned null".into()));
    }
    // Copy into native-owned storage, then hand the original back.
    // SAFETY: the plugin returned a NUL-terminated string it owns.
    let json = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
    if let Some(free_string) = api.free_string {
        // SAFETY: freed exactly once, by the plugin's own deallocator.
        unsafe { free_string(ptr) };
    }

    serde_json::from_str(&json).map_err(|e| PluginError::ManifestFailed(e.to_string()))
}
