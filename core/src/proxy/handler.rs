//! Per-connection proxy handler.
//!
//! One task per incoming peer connection: drain its events, answer each Data
//! payload with the fetched bytes or an error envelope, stop on Close.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{ErrorEnvelope, Fetch, ProxyError, ProxyRequest};
use crate::signaling::{ConnectionEvent, DataConnection};

/// Serve proxy requests on `conn` until the remote peer closes it.
pub async fn handle_connection(conn: Arc<dyn DataConnection>, fetcher: Arc<dyn Fetch>) {
    while let Some(event) = conn.recv().await {
        match event {
            ConnectionEvent::Open => {
                info!("Connected to: {}", conn.remote_peer_id());
            }
            ConnectionEvent::Data(payload) => {
                answer_request(conn.as_ref(), fetcher.as_ref(), payload).await;
            }
            ConnectionEvent::Close => {
                info!("Connection to remote peer closed");
                break;
            }
        }
    }
}

async fn answer_request(conn: &dyn DataConnection, fetcher: &dyn Fetch, payload: Vec<u8>) {
    debug!("Data received from remote peer ({} bytes)", payload.len());

    let response = match proxy_request(fetcher, &payload).await {
        Ok(body) => body,
        Err(e) => {
            warn!("Proxy request failed: {}", e);
            ErrorEnvelope::encode(&e)
        }
    };

    if let Err(e) = conn.send(response).await {
        warn!("Failed to answer remote peer: {}", e);
    }
}

/// Decode the request envelope and fetch it.
async fn proxy_request(fetcher: &dyn Fetch, payload: &[u8]) -> Result<Vec<u8>, ProxyError> {
    let request: ProxyRequest =
        serde_json::from_slice(payload).map_err(|e| ProxyError::Decode(e.to_string()))?;
    info!(
        "HTTP proxy request: {} {}",
        request.method, request.url
    );

    let body = fetcher.fetch(&request.url, &request.method).await?;
    info!(
        "Answering request for {}. Response size: {} bytes",
        request.url,
        body.len()
    );
    Ok(body)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackConnection;
    use crate::proxy::FetchError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fetch fake that records calls and replays a canned result.
    struct RecordingFetcher {
        calls: AtomicUsize,
        last: std::sync::Mutex<Option<(String, String)>>,
        result: Result<Vec<u8>, FetchError>,
    }

    impl RecordingFetcher {
        fn returning(result: Result<Vec<u8>, FetchError>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                last: std::sync::Mutex::new(None),
                result,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn last_call(&self) -> Option<(String, String)> {
            self.last.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Fetch for RecordingFetcher {
        async fn fetch(&self, url: &str, method: &str) -> Result<Vec<u8>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().unwrap() = Some((url.to_string(), method.to_string()));
            self.result.clone()
        }
    }

    fn request_payload(json: &str) -> Vec<u8> {
        json.as_bytes().to_vec()
    }

    async fn recv_data(conn: &LoopbackConnection) -> Vec<u8> {
        match conn.recv().await {
            Some(ConnectionEvent::Data(data)) => data,
            other => panic!("Expected data, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_get_round_trip() {
        let (agent_end, remote_end) = LoopbackConnection::pair("remote", "agent");
        let fetcher = RecordingFetcher::returning(Ok(b"hello".to_vec()));
        let handler = tokio::spawn(handle_connection(
            agent_end,
            fetcher.clone() as Arc<dyn Fetch>,
        ));

        remote_end
            .send(request_payload(
                r#"{"url": "http://localhost/api", "method": "GET"}"#,
            ))
            .await
            .unwrap();

        let response = recv_data(&remote_end).await;
        assert_eq!(response, b"hello");
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(
            fetcher.last_call(),
            Some(("http://localhost/api".to_string(), "GET".to_string()))
        );

        remote_end.close().await;
        handler.await.unwrap();
    }

    #[tokio::test]
    async fn test_method_defaults_to_get() {
        let (agent_end, remote_end) = LoopbackConnection::pair("remote", "agent");
        let fetcher = RecordingFetcher::returning(Ok(b"ok".to_vec()));
        tokio::spawn(handle_connection(
            agent_end,
            fetcher.clone() as Arc<dyn Fetch>,
        ));

        remote_end
            .send(request_payload(r#"{"url": "http://localhost/api"}"#))
            .await
            .unwrap();

        let response = recv_data(&remote_end).await;
        assert_eq!(response, b"ok");
        assert_eq!(
            fetcher.last_call(),
            Some(("http://localhost/api".to_string(), "GET".to_string()))
        );
    }

    #[tokio::test]
    async fn test_unsupported_method_is_reported_to_peer() {
        let (agent_end, remote_end) = LoopbackConnection::pair("remote", "agent");
        let fetcher =
            RecordingFetcher::returning(Err(FetchError::UnsupportedMethod("POST".to_string())));
        tokio::spawn(handle_connection(
            agent_end,
            fetcher.clone() as Arc<dyn Fetch>,
        ));

        remote_end
            .send(request_payload(
                r#"{"url": "http://localhost/api", "method": "POST"}"#,
            ))
            .await
            .unwrap();

        let response = recv_data(&remote_end).await;
        let envelope: ErrorEnvelope = serde_json::from_slice(&response).unwrap();
        assert!(envelope.error.contains("POST"));
        assert!(envelope.error.contains("not implemented"));
    }

    #[tokio::test]
    async fn test_malformed_payload_yields_error_envelope() {
        let (agent_end, remote_end) = LoopbackConnection::pair("remote", "agent");
        let fetcher = RecordingFetcher::returning(Ok(b"never".to_vec()));
        tokio::spawn(handle_connection(
            agent_end,
            fetcher.clone() as Arc<dyn Fetch>,
        ));

        remote_end
            .send(request_payload("this is not json"))
            .await
            .unwrap();

        let response = recv_data(&remote_end).await;
        let envelope: ErrorEnvelope = serde_json::from_slice(&response).unwrap();
        assert!(envelope.error.contains("Malformed request envelope"));
        // Nothing was fetched for a request we could not decode.
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_url_yields_error_envelope() {
        let (agent_end, remote_end) = LoopbackConnection::pair("remote", "agent");
        let fetcher = RecordingFetcher::returning(Ok(b"never".to_vec()));
        tokio::spawn(handle_connection(
            agent_end,
            fetcher.clone() as Arc<dyn Fetch>,
        ));

        remote_end
            .send(request_payload(r#"{"method": "GET"}"#))
            .await
            .unwrap();

        let response = recv_data(&remote_end).await;
        let envelope: ErrorEnvelope = serde_json::from_slice(&response).unwrap();
        assert!(envelope.error.contains("Malformed request envelope"));
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_reported_to_peer() {
        let (agent_end, remote_end) = LoopbackConnection::pair("remote", "agent");
        let fetcher = RecordingFetcher::returning(Err(FetchError::Request(
            "connection refused".to_string(),
        )));
        tokio::spawn(handle_connection(
            agent_end,
            fetcher.clone() as Arc<dyn Fetch>,
        ));

        remote_end
            .send(request_payload(r#"{"url": "http://localhost/api"}"#))
            .await
            .unwrap();

        let response = recv_data(&remote_end).await;
        let envelope: ErrorEnvelope = serde_json::from_slice(&response).unwrap();
        assert!(envelope.error.contains("connection refused"));
    }

    #[tokio::test]
    async fn test_handler_serves_multiple_requests() {
        let (agent_end, remote_end) = LoopbackConnection::pair("remote", "agent");
        let fetcher = RecordingFetcher::returning(Ok(b"again".to_vec()));
        tokio::spawn(handle_connection(
            agent_end,
            fetcher.clone() as Arc<dyn Fetch>,
        ));

        for _ in 0..3 {
            remote_end
                .send(request_payload(r#"{"url": "http://localhost/api"}"#))
                .await
                .unwrap();
            assert_eq!(recv_data(&remote_end).await, b"again");
        }
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn test_close_ends_handler() {
        let (agent_end, remote_end) = LoopbackConnection::pair("remote", "agent");
        let fetcher = RecordingFetcher::returning(Ok(b"ok".to_vec()));
        let handler = tokio::spawn(handle_connection(
            agent_end,
            fetcher.clone() as Arc<dyn Fetch>,
        ));

        remote_end.close().await;
        handler.await.unwrap();
        assert_eq!(fetcher.calls(), 0);
    }
}
