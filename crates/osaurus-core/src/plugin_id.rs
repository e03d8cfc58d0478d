//! Plugin identifier type.

use std::fmt;

use serde::Serialize;

/// Unique, stable plugin identifier chosen by the plugin author.
///
/// Plugin IDs are reverse-DNS-style strings like `"com.example.weather"` or
/// simple slugs like `"weather-tools"`. They key a plugin's database file,
/// secret slot, install directory, and route namespace, so the format is
/// validated strictly: non-empty, ASCII lowercase alphanumerics plus `-`,
/// `_`, and `.`, with no leading or trailing separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PluginId(String);

/// Deserialize with validation — rejects malformed IDs (e.g. path traversal
/// payloads in a crafted manifest).
impl<'de> serde::Deserialize<'de> for PluginId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

impl PluginId {
    /// Create a new `PluginId`, validating the format.
    ///
    /// # Errors
    ///
    /// Returns a description of the violation if the ID is empty, contains
    /// characters outside `[a-z0-9._-]`, or starts/ends with a separator.
    pub fn new(id: impl Into<String>) -> Result<Self, String> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Create a `PluginId` without validation (for tests and internal use).
    #[must_use]
    pub fn from_static(id: &str) -> Self {
        Self(id.to_string())
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether a string is a valid plugin ID without constructing one.
    #[must_use]
    pub fn is_valid_id(id: &str) -> bool {
        Self::validate(id).is_ok()
    }

    fn validate(id: &str) -> Result<(), String> {
        if id.is_empty() {
            return Err("plugin id must not be empty".into());
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'))
        {
            return Err(format!(
                "plugin id must contain only lowercase alphanumerics, '-', '_', '.', got: {id}"
            ));
        }
        if id.starts_with(['-', '_', '.']) || id.ends_with(['-', '_', '.']) {
            return Err(format!(
                "plugin id must not start or end with a separator, got: {id}"
            ));
        }
        Ok(())
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PluginId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_plugin_ids() {
        assert!(PluginId::new("com.example.weather").is_ok());
        assert!(PluginId::new("weather-tools").is_ok());
        assert!(PluginId::new("plugin_123").is_ok());
        assert!(PluginId::new("a").is_ok());
    }

    #[test]
    fn test_invalid_plugin_ids() {
        // Empty
        assert!(PluginId::new("").is_err());
        // Uppercase
        assert!(PluginId::new("Com.Example").is_err());
        // Spaces
        assert!(PluginId::new("my plugin").is_err());
        // Path traversal
        assert!(PluginId::new("../escape").is_err());
        assert!(PluginId::new("a/b").is_err());
        // Leading/trailing separators
        assert!(PluginId::new(".hidden").is_err());
        assert!(PluginId::new("plugin-").is_err());
        assert!(PluginId::new("plugin.").is_err());
    }

    #[test]
    fn test_plugin_id_display() {
        let id = PluginId::new("com.example.weather").unwrap();
        assert_eq!(id.to_string(), "com.example.weather");
        assert_eq!(id.as_str(), "com.example.weather");
    }

    #[test]
    fn test_plugin_id_serde_round_trip() {
        let id = PluginId::new("com.example.weather").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"com.example.weather\"");
        let back: PluginId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_plugin_id_deserialize_rejects_invalid() {
        let result: Result<PluginId, _> = serde_json::from_str("\"../etc/passwd\"");
        assert!(result.is_err());
    }
}
