//! The route-auth gate.
//!
//! `owner` routes require a valid bearer access key and bypass the rate
//! limiter; `none` and `verify` routes are public surfaces and pay a token
//! per request. Every validator failure collapses to one uniform
//! [`GatewayError::Unauthorized`] so callers cannot probe which rule
//! tripped; the specific reason goes to the debug log only.

use tracing::debug;

use osaurus_identity::{AccessKeyClaims, AccessKeyValidator};
use osaurus_plugins::{RouteAuth, RouteSpec};

use crate::error::{GatewayError, GatewayResult};
use crate::rate_limit::RateLimiter;

/// Admit or reject a request for a matched route.
///
/// Returns the validated claims for `owner` routes, `None` for public ones.
///
/// # Errors
///
/// Returns [`GatewayError::RateLimited`] when a public route's bucket is
/// empty, or [`GatewayError::Unauthorized`] when an `owner` route's bearer
/// key is missing or fails validation.
pub fn authorize(
    route: &RouteSpec,
    plugin_id: &str,
    limiter: &RateLimiter,
    validator: &AccessKeyValidator,
    bearer: Option<&str>,
) -> GatewayResult<Option<AccessKeyClaims>> {
    match route.auth {
        RouteAuth::None | RouteAuth::Verify => {
            if !limiter.allow(plugin_id) {
                return Err(GatewayError::RateLimited {
                    plugin_id: plugin_id.to_string(),
                });
            }
            Ok(None)
        }
        RouteAuth::Owner => {
            let bearer = bearer.ok_or(GatewayError::Unauthorized)?;
            match validator.validate(bearer) {
                Ok(claims) => Ok(Some(claims)),
                Err(reason) => {
                    debug!(plugin_id, route_id = %route.id, %reason, "access key rejected");
                    Err(GatewayError::Unauthorized)
                }
            }
        }
    }
}
