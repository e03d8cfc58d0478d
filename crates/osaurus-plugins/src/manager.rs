//! The plugin manager: registry, lifecycle, and call routing.
//!
//! One manager owns every loaded plugin. Loading follows the sequence in
//! [`crate::loader`]; unloading removes the plugin from the registry (so no
//! new calls start and no config notifications fire), drains outstanding
//! calls through a per-plugin gate, then destroys the plugin context and
//! releases its host context.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::Value as JsonValue;
use tracing::{info, warn};

use osaurus_core::{slots, OsaurusHome, PluginId, SecretStore};

use crate::dispatch::{inject_payload, Dispatcher, InvokeInjection};
use crate::error::{PluginError, PluginResult};
use crate::loader::{load_plugin, LoadedPlugin};
use crate::manifest::{configured_secrets, PluginManifest};

#[derive(Clone)]
struct PluginEntry {
    plugin: Arc<LoadedPlugin>,
    /// Drain gate: calls hold a read permit for their whole execution
    /// (including queue time); unload takes the write side.
    gate: Arc<tokio::sync::RwLock<()>>,
}

/// Owns loaded plugins and routes calls to them.
pub struct PluginManager {
    home: OsaurusHome,
    secrets: Arc<dyn SecretStore>,
    dispatcher: Dispatcher,
    plugins: RwLock<HashMap<PluginId, PluginEntry>>,
    working_directory: RwLock<Option<String>>,
}

impl PluginManager {
    /// Create a manager over the given data root and secret backend.
    ///
    /// `call_timeout` bounds how long callers wait on a plugin; the native
    /// call itself is never interrupted.
    #[must_use]
    pub fn new(
        home: OsaurusHome,
        secrets: Arc<dyn SecretStore>,
        call_timeout: Option<Duration>,
    ) -> Self {
        Self {
            home,
            secrets,
            dispatcher: Dispatcher::new(call_timeout),
            plugins: RwLock::new(HashMap::new()),
            working_directory: RwLock::new(None),
        }
    }

    /// Set (or clear) the working directory injected into tool payloads.
    pub fn set_working_directory(&self, path: Option<String>) {
        if let Ok(mut guard) = self.working_directory.write() {
            *guard = path;
        }
    }

    /// Load the current install of a plugin.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::AlreadyLoaded`], [`PluginError::NotInstalled`],
    /// or any loader error. A load failure leaves the manager unchanged and
    /// never aborts the host.
    pub fn load(&self, plugin_id: &PluginId) -> PluginResult<()> {
        {
            let plugins = self.read_plugins()?;
            if plugins.contains_key(plugin_id) {
                return Err(PluginError::AlreadyLoaded(plugin_id.clone()));
            }
        }

        let install_dir = self.home.plugin_current_link(plugin_id);
        if !install_dir.exists() {
            return Err(PluginError::NotInstalled(plugin_id.clone()));
        }
        let db_path = self.home.plugin_db_path(plugin_id);

        let plugin = load_plugin(plugin_id, &install_dir, &db_path, Arc::clone(&self.secrets))?;
        let entry = PluginEntry {
            plugin: Arc::new(plugin),
            gate: Arc::new(tokio::sync::RwLock::new(())),
        };

        let mut plugins = self.write_plugins()?;
        if plugins.contains_key(plugin_id) {
            // Lost a race; the new handle unloads itself on drop.
            return Err(PluginError::AlreadyLoaded(plugin_id.clone()));
        }
        plugins.insert(plugin_id.clone(), entry);
        info!(plugin_id = %plugin_id, "Registered plugin");
        Ok(())
    }

    /// Unload a plugin: stop new calls, drain outstanding ones, destroy.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotLoaded`] if the plugin is not loaded.
    pub async fn unload(&self, plugin_id: &PluginId) -> PluginResult<()> {
        let entry = {
            let mut plugins = self.write_plugins()?;
            plugins
                .remove(plugin_id)
                .ok_or_else(|| PluginError::NotLoaded(plugin_id.clone()))?
        };

        // Outstanding invoke/handle_route calls hold read permits; taking
        // the write side waits for every one of them to finish.
        let _drained = entry.gate.write().await;
        entry.plugin.unload_in_place();
        Ok(())
    }

    /// Uninstall a plugin: unload if loaded, then remove its install tree,
    /// database file, and config slot.
    ///
    /// # Errors
    ///
    /// Returns an I/O or secret-store error if cleanup fails.
    pub async fn uninstall(&self, plugin_id: &PluginId) -> PluginResult<()> {
        match self.unload(plugin_id).await {
            Ok(()) | Err(PluginError::NotLoaded(_)) => {}
            Err(e) => return Err(e),
        }

        let plugin_dir = self.home.plugin_dir(plugin_id);
        if plugin_dir.exists() {
            std::fs::remove_dir_all(&plugin_dir)?;
        }
        self.secrets
            .delete(slots::PLUGIN_CONFIG_SERVICE, plugin_id.as_str())?;
        info!(plugin_id = %plugin_id, "Uninstalled plugin");
        Ok(())
    }

    /// Ids of all loaded plugins.
    ///
    /// # Errors
    ///
    /// Returns an error only if the registry lock is poisoned.
    pub fn list(&self) -> PluginResult<Vec<PluginId>> {
        Ok(self.read_plugins()?.keys().cloned().collect())
    }

    /// The cached manifest of a loaded plugin.
    #[must_use]
    pub fn manifest(&self, plugin_id: &PluginId) -> Option<PluginManifest> {
        let plugins = self.plugins.read().ok()?;
        plugins
            .get(plugin_id)
            .map(|entry| entry.plugin.manifest().clone())
    }

    /// Invoke a tool on a loaded plugin.
    ///
    /// The payload is augmented with the plugin's configured secrets
    /// (`_secrets`, when any exist) and the active working directory
    /// (`_context`, when set).
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotLoaded`], [`PluginError::Timeout`], or
    /// [`PluginError::PluginReturnedNull`] per the dispatch contract.
    pub async fn invoke_tool(
        &self,
        plugin_id: &PluginId,
        tool_id: &str,
        payload: JsonValue,
    ) -> PluginResult<String> {
        let entry = self.entry(plugin_id)?;

        let injection = InvokeInjection {
            secrets: configured_secrets(entry.plugin.manifest(), &entry.plugin.host().config_map()),
            working_directory: self.working_directory.read().ok().and_then(|g| g.clone()),
        };
        let payload_json = inject_payload(payload, &injection).to_string();

        let permit = entry.gate.clone().read_owned().await;
        let plugin = Arc::clone(&entry.plugin);
        let tool_id = tool_id.to_owned();
        let response = self
            .dispatcher
            .run(move || {
                // The permit rides with the job so the drain gate covers
                // queue time as well as the native call.
                let _permit = permit;
                plugin.invoke_raw("tool", &tool_id, &payload_json)
            })
            .await??;
        response.ok_or(PluginError::PluginReturnedNull)
    }

    /// Deliver an HTTP request JSON to a loaded plugin's route handler.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::RouteHandlerNotAvailable`] for v1 plugins, and
    /// otherwise the same errors as [`PluginManager::invoke_tool`].
    pub async fn handle_route(
        &self,
        plugin_id: &PluginId,
        request_json: String,
    ) -> PluginResult<String> {
        let entry = self.entry(plugin_id)?;
        if !entry.plugin.supports_routes() {
            return Err(PluginError::RouteHandlerNotAvailable);
        }

        let permit = entry.gate.clone().read_owned().await;
        let plugin = Arc::clone(&entry.plugin);
        let response = self
            .dispatcher
            .run(move || {
                let _permit = permit;
                plugin.handle_route_raw(&request_json)
            })
            .await??;
        response.ok_or(PluginError::PluginReturnedNull)
    }

    /// Required secrets a loaded plugin is still missing, for the plugin
    /// card's advisory state.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotLoaded`] if the plugin is not loaded.
    pub fn missing_required_secrets(&self, plugin_id: &PluginId) -> PluginResult<Vec<String>> {
        let entry = self.entry(plugin_id)?;
        Ok(crate::manifest::missing_required_secrets(
            entry.plugin.manifest(),
            &entry.plugin.host().config_map(),
        ))
    }

    /// Read one config value of a loaded plugin.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotLoaded`] if the plugin is not loaded.
    pub fn config_get(&self, plugin_id: &PluginId, key: &str) -> PluginResult<Option<String>> {
        Ok(self.entry(plugin_id)?.plugin.host().config_get(key))
    }

    /// Write one config value and notify the plugin.
    ///
    /// The notification is fire-and-forget on the work queue; it can no
    /// longer fire once unload has removed the plugin from the registry.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotLoaded`] or a persistence error.
    pub async fn config_set(
        &self,
        plugin_id: &PluginId,
        key: &str,
        value: &str,
    ) -> PluginResult<()> {
        let entry = self.entry(plugin_id)?;
        entry.plugin.host().config_set(key, value)?;
        self.notify_config_changed(&entry, key, Some(value)).await;
        Ok(())
    }

    /// Delete one config value and notify the plugin.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotLoaded`] or a persistence error.
    pub async fn config_delete(&self, plugin_id: &PluginId, key: &str) -> PluginResult<()> {
        let entry = self.entry(plugin_id)?;
        entry.plugin.host().config_delete(key)?;
        self.notify_config_changed(&entry, key, None).await;
        Ok(())
    }

    async fn notify_config_changed(&self, entry: &PluginEntry, key: &str, value: Option<&str>) {
        let permit = entry.gate.clone().read_owned().await;
        let plugin = Arc::clone(&entry.plugin);
        let key = key.to_owned();
        let value = value.map(ToOwned::to_owned);
        let submitted = self.dispatcher.queue().submit(move || {
            let _permit = permit;
            plugin.notify_config_changed(&key, value.as_deref());
        });
        if !submitted {
            warn!(plugin_id = %entry.plugin.plugin_id(), "work queue gone; config notification dropped");
        }
    }

    fn entry(&self, plugin_id: &PluginId) -> PluginResult<PluginEntry> {
        self.read_plugins()?
            .get(plugin_id)
            .cloned()
            .ok_or_else(|| PluginError::NotLoaded(plugin_id.clone()))
    }

    fn read_plugins(
        &self,
    ) -> PluginResult<std::sync::RwLockReadGuard<'_, HashMap<PluginId, PluginEntry>>> {
        self.plugins
            .read()
            .map_err(|e| PluginError::AbiString(e.to_string()))
    }

    fn write_plugins(
        &self,
    ) -> PluginResult<std::sync::RwLockWriteGuard<'_, HashMap<PluginId, PluginEntry>>> {
        self.plugins
            .write()
            .map_err(|e| PluginError::AbiString(e.to_string()))
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.plugins.read().map(|p| p.len()).unwrap_or(0);
        f.debug_struct("PluginManager")
            .field("loaded", &count)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osaurus_core::MemorySecretStore;

    fn manager(dir: &std::path::Path) -> PluginManager {
        PluginManager::new(
            OsaurusHome::from_path(dir),
            Arc::new(MemorySecretStore::new()),
            Some(Duration::from_secs(5)),
        )
    }

    #[test]
    fn test_load_missing_install_is_not_installed() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        let result = mgr.load(&PluginId::from_static("mgr.absent"));
        assert!(matches!(result, Err(PluginError::NotInstalled(_))));
        assert!(mgr.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_operations_on_unloaded_plugin() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        let id = PluginId::from_static("mgr.unloaded");

        assert!(matches!(
            mgr.unload(&id).await,
            Err(PluginError::NotLoaded(_))
        ));
        assert!(matches!(
            mgr.invoke_tool(&id, "t", serde_json::json!({})).await,
            Err(PluginError::NotLoaded(_))
        ));
        assert!(matches!(
            mgr.handle_route(&id, String::new()).await,
            Err(PluginError::NotLoaded(_))
        ));
        assert!(matches!(
            mgr.config_get(&id, "k"),
            Err(PluginError::NotLoaded(_))
        ));
        assert!(mgr.manifest(&id).is_none());
    }

    #[tokio::test]
    async fn test_uninstall_removes_install_tree_and_config_slot() {
        let dir = tempfile::tempdir().unwrap();
        let home = OsaurusHome::from_path(dir.path());
        let secrets = Arc::new(MemorySecretStore::new());
        let mgr = PluginManager::new(home.clone(), secrets.clone(), None);
        let id = PluginId::from_static("mgr.uninstall");

        // Fake an install tree, a database file, and a config slot.
        let install = home.plugin_install_dir(&id, "1.0.0");
        std::fs::create_dir_all(&install).unwrap();
        std::fs::write(install.join("plugin.dylib"), b"x").unwrap();
        std::fs::write(home.plugin_db_path(&id), b"sqlite bytes").unwrap();
        secrets
            .set(slots::PLUGIN_CONFIG_SERVICE, id.as_str(), b"{}")
            .unwrap();

        mgr.uninstall(&id).await.unwrap();

        assert!(!home.plugin_dir(&id).exists());
        assert!(secrets
            .get(slots::PLUGIN_CONFIG_SERVICE, id.as_str())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_working_directory_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        mgr.set_working_directory(Some("/work".into()));
        assert_eq!(
            mgr.working_directory.read().unwrap().as_deref(),
            Some("/work")
        );
        mgr.set_working_directory(None);
        assert!(mgr.working_directory.read().unwrap().is_none());
    }
}
