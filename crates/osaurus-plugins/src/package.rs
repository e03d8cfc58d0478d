//! Plugin package installation.
//!
//! A package is a zip named `<plugin_id>-<version>.zip` containing exactly
//! one shared library, plus optional `web/`, `SKILL.md`, `README.md`, and
//! `CHANGELOG.md`. Installation extracts into
//! `<tools-root>/<plugin_id>/<version>/` and swaps the `current` symlink.
//!
//! Extraction is defensive: entries may not escape the install directory,
//! may not be symlinks or other special files, and the unpacked size is
//! capped.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::info;

use osaurus_core::{OsaurusHome, PluginId};

use crate::error::{PluginError, PluginResult};
use crate::loader::find_library;

/// Ceiling on total unpacked size.
const MAX_UNPACKED_BYTES: u64 = 256 * 1024 * 1024;

/// A successfully installed package.
#[derive(Debug, Clone)]
pub struct InstalledPackage {
    /// The plugin id, parsed from the package name.
    pub plugin_id: PluginId,
    /// The version, parsed from the package name.
    pub version: String,
    /// The versioned install directory.
    pub install_dir: PathBuf,
    /// The plugin's shared library inside it.
    pub library_path: PathBuf,
}

/// Parse `<plugin_id>-<version>.zip`.
///
/// The version is everything after the last `-`, so plugin ids containing
/// hyphens package unambiguously.
fn parse_package_name(file_name: &str) -> PluginResult<(PluginId, String)> {
    let stem = file_name
        .strip_suffix(".zip")
        .ok_or_else(|| PluginError::PackageInvalid(format!("not a zip: {file_name}")))?;
    let (id_part, version) = stem.rsplit_once('-').ok_or_else(|| {
        PluginError::PackageInvalid(format!("expected <plugin_id>-<version>.zip, got {file_name}"))
    })?;
    if version.is_empty() {
        return Err(PluginError::PackageInvalid(format!(
            "empty version in {file_name}"
        )));
    }
    let plugin_id = PluginId::new(id_part).map_err(PluginError::PackageInvalid)?;
    Ok((plugin_id, version.to_string()))
}

/// Install a plugin package into the tools root.
///
/// # Errors
///
/// Returns [`PluginError::PackageInvalid`] for malformed names, unsafe
/// archive entries, size-cap violations, or a library count other than one.
pub fn install_package(home: &OsaurusHome, package_path: &Path) -> PluginResult<InstalledPackage> {
    let file_name = package_path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| PluginError::PackageInvalid("unreadable package name".into()))?;
    let (plugin_id, version) = parse_package_name(file_name)?;

    let install_dir = home.plugin_install_dir(&plugin_id, &version);
    std::fs::create_dir_all(&install_dir)?;

    let file = File::open(package_path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| PluginError::PackageInvalid(e.to_string()))?;

    let mut unpacked: u64 = 0;
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| PluginError::PackageInvalid(e.to_string()))?;

        let Some(relative) = entry.enclosed_name() else {
            return Err(PluginError::PackageInvalid(format!(
                "path traversal detected: {}",
                entry.name()
            )));
        };

        // Symlinks and other special entries could point outside the
        // sandbox after extraction; only plain files and directories pass.
        if let Some(mode) = entry.unix_mode() {
            const S_IFMT: u32 = 0o170_000;
            const S_IFREG: u32 = 0o100_000;
            const S_IFDIR: u32 = 0o040_000;
            let kind = mode & S_IFMT;
            if kind != 0 && kind != S_IFREG && kind != S_IFDIR {
                return Err(PluginError::PackageInvalid(format!(
                    "unsafe archive entry: {}",
                    entry.name()
                )));
            }
        }

        let target = install_dir.join(&relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }

        unpacked = unpacked.saturating_add(entry.size());
        if unpacked > MAX_UNPACKED_BYTES {
            return Err(PluginError::PackageInvalid(format!(
                "package exceeds {MAX_UNPACKED_BYTES} unpacked bytes"
            )));
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut contents = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
        entry
            .read_to_end(&mut contents)
            .map_err(|e| PluginError::PackageInvalid(e.to_string()))?;
        std::fs::write(&target, contents)?;
    }

    // Exactly one shared library, same rule the loader enforces.
    let library_path = find_library(&install_dir).map_err(|e| match e {
        PluginError::OpenLibraryFailed(message) => PluginError::PackageInvalid(message),
        other => other,
    })?;

    update_current_link(home, &plugin_id, &version)?;

    info!(
        plugin_id = %plugin_id,
        version,
        install_dir = %install_dir.display(),
        "Installed plugin package"
    );
    Ok(InstalledPackage {
        plugin_id,
        version,
        install_dir,
        library_path,
    })
}

/// Point `<tools-root>/<plugin_id>/current` at the given version.
fn update_current_link(home: &OsaurusHome, plugin_id: &PluginId, version: &str) -> PluginResult<()> {
    let link = home.plugin_current_link(plugin_id);
    match std::fs::symlink_metadata(&link) {
        Ok(_) => std::fs::remove_file(&link)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    #[cfg(unix)]
    std::os::unix::fs::symlink(version, &link)?;
    #[cfg(windows)]
    std::os::windows::fs::symlink_dir(version, &link)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn write_package(dir: &Path, name: &str, entries: &[(&str, &[u8])]) -> PathBuf {
        let path = dir.join(name);
        let file = File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (entry_name, contents) in entries {
            writer
                .start_file(*entry_name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(contents).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    #[test]
    fn test_parse_package_name() {
        let (id, version) = parse_package_name("com.example.weather-1.2.0.zip").unwrap();
        assert_eq!(id.as_str(), "com.example.weather");
        assert_eq!(version, "1.2.0");

        // Hyphenated ids split at the last hyphen.
        let (id, version) = parse_package_name("weather-tools-2.0.zip").unwrap();
        assert_eq!(id.as_str(), "weather-tools");
        assert_eq!(version, "2.0");

        assert!(parse_package_name("weather.tar.gz").is_err());
        assert!(parse_package_name("noversion.zip").is_err());
    }

    #[test]
    fn test_install_extracts_and_links_current() {
        let dir = tempfile::tempdir().unwrap();
        let home = OsaurusHome::from_path(dir.path().join("home"));
        let package = write_package(
            dir.path(),
            "com.example.weather-1.0.0.zip",
            &[
                ("plugin.dylib", b"library bytes"),
                ("SKILL.md", b"# Skill"),
                ("web/index.html", b"<html></html>"),
            ],
        );

        let installed = install_package(&home, &package).unwrap();
        assert_eq!(installed.version, "1.0.0");
        assert!(installed.install_dir.join("plugin.dylib").exists());
        assert!(installed.install_dir.join("web/index.html").exists());

        let current = home.plugin_current_link(&installed.plugin_id);
        assert_eq!(std::fs::read_link(current).unwrap(), PathBuf::from("1.0.0"));
    }

    #[test]
    fn test_install_new_version_swaps_current() {
        let dir = tempfile::tempdir().unwrap();
        let home = OsaurusHome::from_path(dir.path().join("home"));

        let v1 = write_package(
            dir.path(),
            "com.example.weather-1.0.0.zip",
            &[("plugin.dylib", b"v1")],
        );
        let v2 = write_package(
            dir.path(),
            "com.example.weather-2.0.0.zip",
            &[("plugin.dylib", b"v2")],
        );

        install_package(&home, &v1).unwrap();
        let installed = install_package(&home, &v2).unwrap();

        let current = home.plugin_current_link(&installed.plugin_id);
        assert_eq!(std::fs::read_link(current).unwrap(), PathBuf::from("2.0.0"));
        // The old version stays on disk.
        assert!(home
            .plugin_install_dir(&installed.plugin_id, "1.0.0")
            .join("plugin.dylib")
            .exists());
    }

    #[test]
    fn test_install_requires_exactly_one_library() {
        let dir = tempfile::tempdir().unwrap();
        let home = OsaurusHome::from_path(dir.path().join("home"));

        let none = write_package(dir.path(), "com.example.none-1.0.zip", &[("README.md", b"x")]);
        assert!(matches!(
            install_package(&home, &none),
            Err(PluginError::PackageInvalid(_))
        ));

        let two = write_package(
            dir.path(),
            "com.example.two-1.0.zip",
            &[("a.dylib", b"a"), ("b.dylib", b"b")],
        );
        assert!(matches!(
            install_package(&home, &two),
            Err(PluginError::PackageInvalid(_))
        ));
    }

    #[test]
    fn test_traversal_entries_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let home = OsaurusHome::from_path(dir.path().join("home"));
        let evil = write_package(
            dir.path(),
            "com.example.evil-1.0.zip",
            &[("../outside.txt", b"escape"), ("plugin.dylib", b"x")],
        );

        assert!(matches!(
            install_package(&home, &evil),
            Err(PluginError::PackageInvalid(_))
        ));
        assert!(!dir.path().join("home/Tools/outside.txt").exists());
    }
}
