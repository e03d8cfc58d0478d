//! Osaurus Gateway - the HTTP edge of the plugin runtime.
//!
//! The transport (accepting sockets, parsing HTTP) is a collaborator; this
//! crate owns everything between a parsed request and the plugin's handler:
//!
//! - [`router`]: `/plugins/<plugin_id><path>` namespace splitting and
//!   first-match-wins route matching with trailing-wildcard support
//! - [`RateLimiter`]: per-plugin token buckets for public surfaces
//! - [`authorize`]: the route-auth gate (`none`/`verify` are rate-limited,
//!   `owner` requires a valid access key)
//! - [`PluginHttpRequest`]/[`PluginHttpResponse`]: the exact JSON shapes
//!   crossing the ABI, with lowercase header normalisation and base64
//!   body handling

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod admission;
mod error;
mod http;
mod rate_limit;
pub mod router;

pub use admission::authorize;
pub use error::{GatewayError, GatewayResult};
pub use http::{
    normalize_headers, parse_query_params, render_query_string, BodyEncoding, HostUrls,
    PluginHttpRequest, PluginHttpResponse,
};
pub use rate_limit::RateLimiter;
