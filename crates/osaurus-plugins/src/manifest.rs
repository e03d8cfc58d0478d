//! Plugin manifest types.
//!
//! A manifest is the JSON document a plugin returns from `get_manifest`
//! after load. It names the plugin and declares its capabilities: tools the
//! agent can invoke, HTTP routes it serves, config fields it reads, and an
//! optional static web tree. The host may cache it for the plugin's loaded
//! lifetime; capabilities are immutable until unload.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use osaurus_core::PluginId;

/// A plugin manifest, parsed from the `get_manifest` JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Unique plugin identifier; must match the install directory's id.
    pub plugin_id: PluginId,
    /// Semantic version string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Human-readable display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// SPDX license expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    /// Plugin authors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    /// Minimum host version required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_osaurus_version: Option<String>,
    /// Minimum macOS version required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_macos_version: Option<String>,
    /// What the plugin can do.
    #[serde(default)]
    pub capabilities: PluginCapabilities,
    /// Secrets the plugin expects the user to configure.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<SecretSpec>,
    /// Bundled documentation files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docs: Option<DocsSpec>,
}

impl PluginManifest {
    /// The declared routes, in declaration order.
    #[must_use]
    pub fn routes(&self) -> &[RouteSpec] {
        &self.capabilities.routes
    }

    /// Find a tool by id.
    #[must_use]
    pub fn tool(&self, id: &str) -> Option<&ToolSpec> {
        self.capabilities.tools.iter().find(|t| t.id == id)
    }
}

/// Capability declarations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginCapabilities {
    /// Tools the agent can invoke.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,
    /// HTTP routes, matched in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<RouteSpec>,
    /// Config fields surfaced in the host UI.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config: Vec<ConfigFieldSpec>,
    /// Static web tree served under the plugin's route namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web: Option<WebSpec>,
}

/// A tool the plugin exposes through `invoke`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool identifier, unique within the plugin.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema for the tool's payload.
    #[serde(default = "default_parameters")]
    pub parameters: serde_json::Value,
    /// Named requirements (e.g. secrets) the tool needs configured.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requirements: Vec<String>,
    /// How invocations are gated in the host UI.
    #[serde(default)]
    pub permission_policy: PermissionPolicy,
}

fn default_parameters() -> serde_json::Value {
    serde_json::json!({ "type": "object" })
}

/// Invocation gating policy for a tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionPolicy {
    /// Prompt the user per invocation.
    #[default]
    Ask,
    /// Allow without prompting.
    Auto,
    /// Never allow.
    Deny,
}

/// An HTTP route the plugin serves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteSpec {
    /// Route identifier, passed back to the plugin as `route_id`.
    pub id: String,
    /// Path under the plugin's namespace, e.g. `/callback` or `/app/*`.
    /// A single trailing `/*` wildcard is supported.
    pub path: String,
    /// Allowed methods, compared case-insensitively.
    pub methods: Vec<String>,
    /// Authentication level required.
    #[serde(default)]
    pub auth: RouteAuth,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Authentication level for a route.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteAuth {
    /// Public; rate-limited.
    None,
    /// Plugin verifies callers itself; rate-limited.
    Verify,
    /// Requires a valid access key; bypasses the rate limiter.
    #[default]
    Owner,
}

/// A config field the host UI surfaces for this plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFieldSpec {
    /// Config key.
    pub key: String,
    /// Display label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Whether the value is sensitive.
    #[serde(default)]
    pub secret: bool,
    /// Default value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A secret the plugin expects the user to configure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretSpec {
    /// Secret key, also the key injected under `_secrets`.
    pub key: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the plugin is unusable without it. Missing required secrets
    /// surface as an advisory state, never a crash.
    #[serde(default)]
    pub required: bool,
}

/// Static web tree declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSpec {
    /// Root of the tree inside the package, defaults to `web/`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
}

/// Bundled documentation files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocsSpec {
    /// Agent-facing skill document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill: Option<String>,
    /// Human-facing readme.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readme: Option<String>,
    /// Changelog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changelog: Option<String>,
}

/// Required secrets that have no configured value yet.
///
/// Surfaced as an advisory on the plugin card; invocation still proceeds
/// and the plugin reports its own errors.
#[must_use]
pub fn missing_required_secrets(
    manifest: &PluginManifest,
    config: &HashMap<String, String>,
) -> Vec<String> {
    manifest
        .secrets
        .iter()
        .filter(|spec| spec.required && !config.contains_key(&spec.key))
        .map(|spec| spec.key.clone())
        .collect()
}

/// Build the `_secrets` injection map for a manifest from the plugin's
/// stored config: every declared secret that has a configured value.
#[must_use]
pub(crate) fn configured_secrets(
    manifest: &PluginManifest,
    config: &HashMap<String, String>,
) -> HashMap<String, String> {
    manifest
        .secrets
        .iter()
        .filter_map(|spec| {
            config
                .get(&spec.key)
                .map(|value| (spec.key.clone(), value.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "plugin_id": "com.example.weather",
            "version": "1.2.0",
            "name": "Weather",
            "license": "MIT",
            "authors": ["Example Co"],
            "capabilities": {
                "tools": [
                    {
                        "id": "forecast",
                        "description": "Fetch a forecast",
                        "parameters": {"type": "object", "properties": {"city": {"type": "string"}}},
                        "requirements": ["api_key"],
                        "permission_policy": "auto"
                    }
                ],
                "routes": [
                    {"id": "callback", "path": "/callback", "methods": ["POST"]},
                    {"id": "app", "path": "/app/*", "methods": ["GET"], "auth": "none"}
                ]
            },
            "secrets": [
                {"key": "api_key", "required": true}
            ]
        }"#
    }

    #[test]
    fn test_parse_full_manifest() {
        let manifest: PluginManifest = serde_json::from_str(sample_json()).unwrap();
        assert_eq!(manifest.plugin_id.as_str(), "com.example.weather");
        assert_eq!(manifest.capabilities.tools.len(), 1);
        assert_eq!(
            manifest.capabilities.tools[0].permission_policy,
            PermissionPolicy::Auto
        );
        assert_eq!(manifest.routes().len(), 2);
        assert!(manifest.secrets[0].required);
    }

    #[test]
    fn test_route_auth_defaults_to_owner() {
        let manifest: PluginManifest = serde_json::from_str(sample_json()).unwrap();
        assert_eq!(manifest.routes()[0].auth, RouteAuth::Owner);
        assert_eq!(manifest.routes()[1].auth, RouteAuth::None);
    }

    #[test]
    fn test_minimal_manifest() {
        let manifest: PluginManifest =
            serde_json::from_str(r#"{"plugin_id": "bare"}"#).unwrap();
        assert!(manifest.version.is_none());
        assert!(manifest.capabilities.tools.is_empty());
        assert!(manifest.routes().is_empty());
        assert!(manifest.secrets.is_empty());
    }

    #[test]
    fn test_manifest_rejects_invalid_plugin_id() {
        let result: Result<PluginManifest, _> =
            serde_json::from_str(r#"{"plugin_id": "../escape"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_tool_lookup() {
        let manifest: PluginManifest = serde_json::from_str(sample_json()).unwrap();
        assert!(manifest.tool("forecast").is_some());
        assert!(manifest.tool("missing").is_none());
    }

    #[test]
    fn test_permission_policy_default_is_ask() {
        let tool: ToolSpec = serde_json::from_str(
            r#"{"id": "t", "description": "d"}"#,
        )
        .unwrap();
        assert_eq!(tool.permission_policy, PermissionPolicy::Ask);
        assert_eq!(tool.parameters["type"], "object");
    }

    #[test]
    fn test_missing_required_secrets_is_advisory_data() {
        let manifest: PluginManifest = serde_json::from_str(sample_json()).unwrap();
        assert_eq!(
            missing_required_secrets(&manifest, &HashMap::new()),
            vec!["api_key".to_string()]
        );

        let mut config = HashMap::new();
        config.insert("api_key".to_string(), "sk".to_string());
        assert!(missing_required_secrets(&manifest, &config).is_empty());
    }

    #[test]
    fn test_configured_secrets_only_includes_present_values() {
        let manifest: PluginManifest = serde_json::from_str(sample_json()).unwrap();
        let mut config = HashMap::new();
        config.insert("api_key".to_string(), "sk-123".to_string());
        config.insert("unrelated".to_string(), "x".to_string());

        let secrets = configured_secrets(&manifest, &config);
        assert_eq!(secrets.len(), 1);
        assert_eq!(secrets["api_key"], "sk-123");

        let secrets = configured_secrets(&manifest, &HashMap::new());
        assert!(secrets.is_empty());
    }

    #[test]
    fn test_manifest_serde_round_trip() {
        let manifest: PluginManifest = serde_json::from_str(sample_json()).unwrap();
        let json = serde_json::to_string(&manifest).unwrap();
        let back: PluginManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.plugin_id, manifest.plugin_id);
        assert_eq!(back.routes().len(), manifest.routes().len());
    }
}
