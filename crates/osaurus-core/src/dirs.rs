//! Directory scaffolding for the Osaurus data root.
//!
//! # Layout
//!
//! ```text
//! ~/.osaurus/                       (OsaurusHome)
//! ├── Tools/
//! │   └── <plugin_id>/
//! │       ├── data.db               (per-plugin SQLite sandbox)
//! │       ├── <version>/            (extracted package contents)
//! │       │   └── plugin.dylib
//! │       └── current -> <version>  (active install symlink)
//! └── logs/
//! ```
//!
//! A plugin's database file and install tree are both keyed by its id;
//! uninstalling removes the whole `Tools/<plugin_id>/` subtree.

use std::io;
use std::path::{Path, PathBuf};

use crate::PluginId;

/// The Osaurus data root (`~/.osaurus/` or `$OSAURUS_HOME`).
#[derive(Debug, Clone)]
pub struct OsaurusHome {
    root: PathBuf,
}

impl OsaurusHome {
    /// Resolve the data root.
    ///
    /// Checks `$OSAURUS_HOME` first, then falls back to `$HOME/.osaurus/`.
    ///
    /// # Errors
    ///
    /// Returns an error if `$OSAURUS_HOME` is relative, or neither variable
    /// is set.
    pub fn resolve() -> io::Result<Self> {
        let root = if let Ok(custom) = std::env::var("OSAURUS_HOME") {
            let p = PathBuf::from(&custom);
            if !p.is_absolute() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "OSAURUS_HOME must be an absolute path",
                ));
            }
            p
        } else {
            let home = std::env::var("HOME").map_err(|_| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    "neither OSAURUS_HOME nor HOME environment variable is set",
                )
            })?;
            PathBuf::from(home).join(".osaurus")
        };

        Ok(Self { root })
    }

    /// Create from an explicit path (useful for testing).
    #[must_use]
    pub fn from_path(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Ensure the directory structure exists with owner-only permissions.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation or permission setting fails.
    pub fn ensure(&self) -> io::Result<()> {
        std::fs::create_dir_all(self.tools_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            std::fs::set_permissions(self.root(), perms.clone())?;
            std::fs::set_permissions(self.tools_dir(), perms)?;
        }
        Ok(())
    }

    /// Root directory path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Installed tools root (`~/.osaurus/Tools/`).
    #[must_use]
    pub fn tools_dir(&self) -> PathBuf {
        self.root.join("Tools")
    }

    /// Logs directory (`~/.osaurus/logs/`).
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// A plugin's subtree (`~/.osaurus/Tools/<plugin_id>/`).
    #[must_use]
    pub fn plugin_dir(&self, id: &PluginId) -> PathBuf {
        self.tools_dir().join(id.as_str())
    }

    /// A plugin's sandbox database file (`Tools/<plugin_id>/data.db`).
    #[must_use]
    pub fn plugin_db_path(&self, id: &PluginId) -> PathBuf {
        self.plugin_dir(id).join("data.db")
    }

    /// A plugin's versioned install directory (`Tools/<plugin_id>/<version>/`).
    #[must_use]
    pub fn plugin_install_dir(&self, id: &PluginId, version: &str) -> PathBuf {
        self.plugin_dir(id).join(version)
    }

    /// A plugin's active-install symlink (`Tools/<plugin_id>/current`).
    #[must_use]
    pub fn plugin_current_link(&self, id: &PluginId) -> PathBuf {
        self.plugin_dir(id).join("current")
    }
}
