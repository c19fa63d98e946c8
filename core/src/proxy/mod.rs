//! Request proxy — answers HTTP requests sent by remote peers.
//!
//! A remote peer sends a JSON envelope naming a URL (and optionally a
//! method); the agent performs the request locally and sends the raw
//! response bytes back over the same connection. Failures are answered with
//! a JSON error envelope instead of leaving the peer waiting.

pub mod fetch;
pub mod handler;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use fetch::{Fetch, FetchError, HttpFetcher};
pub use handler::handle_connection;

/// Proxy error types
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Malformed request envelope: {0}")]
    Decode(String),
    #[error("HTTP method {0} not implemented")]
    UnsupportedMethod(String),
    #[error("Request failed: {0}")]
    Request(String),
}

impl From<FetchError> for ProxyError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::UnsupportedMethod(method) => ProxyError::UnsupportedMethod(method),
            FetchError::Request(message) => ProxyError::Request(message),
        }
    }
}

/// Request envelope sent by a remote peer.
///
/// Unknown fields are ignored; a missing method means GET.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRequest {
    /// URL to fetch on the peer's behalf
    pub url: String,
    /// HTTP method, exact and case-sensitive
    #[serde(default = "default_method")]
    pub method: String,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Error envelope answered when a proxied request fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// What went wrong, as reported to the remote peer
    pub error: String,
}

impl ErrorEnvelope {
    /// Encode an error for the wire. Falls back to a plain string if JSON
    /// encoding itself fails.
    pub fn encode(error: &ProxyError) -> Vec<u8> {
        let envelope = ErrorEnvelope {
            error: error.to_string(),
        };
        serde_json::to_vec(&envelope).unwrap_or_else(|_| format!("{{\"error\":\"{}\"}}", error).into_bytes())
    }
}
