//! Gateway error types.

use thiserror::Error;

/// Errors from gateway admission and translation.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The plugin's bucket is out of tokens.
    #[error("rate limited: {plugin_id}")]
    RateLimited {
        /// The plugin whose bucket rejected the request.
        plugin_id: String,
    },

    /// The bearer key was missing, invalid, revoked, or replayed. One
    /// uniform kind on purpose: callers must not learn which rule tripped.
    #[error("unauthorized")]
    Unauthorized,

    /// The plugin's response JSON could not be parsed or decoded.
    #[error("invalid plugin response: {0}")]
    InvalidResponse(String),
}

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;
