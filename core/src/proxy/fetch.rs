//! Fetch capability — performs the HTTP request a remote peer asked for.

use async_trait::async_trait;
use thiserror::Error;

/// Fetch error types
#[derive(Debug, Error, Clone)]
pub enum FetchError {
    #[error("HTTP method {0} not implemented")]
    UnsupportedMethod(String),
    #[error("Request failed: {0}")]
    Request(String),
}

/// HTTP fetch capability used to satisfy proxied requests
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Perform `method` against `url` and return the raw response body.
    async fn fetch(&self, url: &str, method: &str) -> Result<Vec<u8>, FetchError>;
}

/// GET-only fetcher backed by reqwest
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str, method: &str) -> Result<Vec<u8>, FetchError> {
        // Only GET is supported. The comparison is exact: "get" is not "GET".
        if method != "GET" {
            return Err(FetchError::UnsupportedMethod(method.to_string()));
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;

        // The body is returned whatever the HTTP status; the requester sees
        // exactly what a local client would have seen.
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;
        Ok(body.to_vec())
    }
}
