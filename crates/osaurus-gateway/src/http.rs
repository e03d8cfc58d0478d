//! The HTTP request/response JSON crossing the ABI.
//!
//! Inbound requests are serialised to [`PluginHttpRequest`] with lowercase
//! header keys (normalised here so route authentication is deterministic)
//! and a body carried as UTF-8 text or base64. Outbound, the plugin's
//! [`PluginHttpResponse`] is parsed and its body decoded per
//! `body_encoding` before anything is written to the socket.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use osaurus_core::PluginId;
use osaurus_crypto::Address;

use crate::error::{GatewayError, GatewayResult};

/// How a request or response body is encoded in the JSON.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyEncoding {
    /// The body is plain UTF-8 text.
    #[default]
    Utf8,
    /// The body is base64-encoded binary.
    Base64,
}

/// The origin URLs injected under the request's `osaurus` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostUrls {
    /// The host's own origin.
    pub base_url: String,
    /// The plugin's route namespace under it.
    pub plugin_url: String,
}

impl HostUrls {
    /// URLs for the local listener (`http://127.0.0.1:<port>`).
    #[must_use]
    pub fn local(port: u16, plugin_id: &PluginId) -> Self {
        let base_url = format!("http://127.0.0.1:{port}");
        let plugin_url = format!("{base_url}/plugins/{plugin_id}");
        Self {
            base_url,
            plugin_url,
        }
    }

    /// URLs for the relay origin (`https://0x<agent-addr>.<relay-host>`).
    #[must_use]
    pub fn relay(agent: &Address, relay_host: &str, plugin_id: &PluginId) -> Self {
        let base_url = format!("https://{}.{relay_host}", agent.to_lowercase_hex());
        let plugin_url = format!("{base_url}/plugins/{plugin_id}");
        Self {
            base_url,
            plugin_url,
        }
    }
}

/// The request JSON handed to `handle_route` (host → plugin).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginHttpRequest {
    /// Id of the matched route.
    pub route_id: String,
    /// Upper-cased HTTP method.
    pub method: String,
    /// The subpath under the plugin's namespace.
    pub path: String,
    /// Query parameters, single-valued.
    pub query: BTreeMap<String, String>,
    /// Headers with lowercase keys, single-valued.
    pub headers: BTreeMap<String, String>,
    /// The body, encoded per `body_encoding`.
    pub body: String,
    /// Body encoding.
    pub body_encoding: BodyEncoding,
    /// The peer's address.
    pub remote_addr: String,
    /// The plugin the request is for.
    pub plugin_id: String,
    /// Host origin URLs.
    pub osaurus: HostUrls,
}

impl PluginHttpRequest {
    /// Build the request JSON for a matched route.
    ///
    /// Headers are lowercased here; binary bodies fall back to base64.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn build(
        route_id: &str,
        plugin_id: &PluginId,
        method: &str,
        subpath: &str,
        query: BTreeMap<String, String>,
        headers: impl IntoIterator<Item = (String, String)>,
        body: &[u8],
        remote_addr: &str,
        urls: HostUrls,
    ) -> Self {
        let (body, body_encoding) = match std::str::from_utf8(body) {
            Ok(text) => (text.to_string(), BodyEncoding::Utf8),
            Err(_) => (BASE64.encode(body), BodyEncoding::Base64),
        };

        Self {
            route_id: route_id.to_string(),
            method: method.to_uppercase(),
            path: subpath.to_string(),
            query,
            headers: normalize_headers(headers),
            body,
            body_encoding,
            remote_addr: remote_addr.to_string(),
            plugin_id: plugin_id.as_str().to_string(),
            osaurus: urls,
        }
    }
}

/// The response JSON returned from `handle_route` (plugin → host).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginHttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// The body, encoded per `body_encoding`.
    #[serde(default)]
    pub body: String,
    /// Body encoding; missing means UTF-8.
    #[serde(default)]
    pub body_encoding: BodyEncoding,
}

impl PluginHttpResponse {
    /// Parse a plugin's response JSON.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidResponse`] if the JSON is malformed.
    pub fn parse(json: &str) -> GatewayResult<Self> {
        serde_json::from_str(json).map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }

    /// The decoded body bytes to write to the socket.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidResponse`] if a base64 body fails to
    /// decode.
    pub fn body_bytes(&self) -> GatewayResult<Vec<u8>> {
        match self.body_encoding {
            BodyEncoding::Utf8 => Ok(self.body.clone().into_bytes()),
            BodyEncoding::Base64 => BASE64
                .decode(&self.body)
                .map_err(|e| GatewayError::InvalidResponse(e.to_string())),
        }
    }
}

/// Lowercase header keys, keeping the last value for duplicates.
#[must_use]
pub fn normalize_headers(
    headers: impl IntoIterator<Item = (String, String)>,
) -> BTreeMap<String, String> {
    headers
        .into_iter()
        .map(|(key, value)| (key.to_lowercase(), value))
        .collect()
}

/// Parse a query string into a single-valued map.
#[must_use]
pub fn parse_query_params(query: &str) -> BTreeMap<String, String> {
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

/// Render a map back into a query string.
#[must_use]
pub fn render_query_string(params: &BTreeMap<String, String>) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}
