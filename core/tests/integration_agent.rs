//! End-to-end integration tests for the PnP agent
//!
//! These tests run a whole agent over the in-memory signaling service and
//! verify the complete flow across all layers:
//! 1. Session establishment and peer id assignment
//! 2. Room membership while the session is open
//! 3. HTTP proxying over a peer data connection
//! 4. Error envelopes for requests the agent cannot serve
//! 5. Session repair after the service drops the peer
//! 6. Clean shutdown
//!
//! Run with: cargo test --test integration_agent

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pnp_agent_core::{
    AgentConfig, ConnectionEvent, ErrorEnvelope, Fetch, FetchError, HttpFetcher,
    LoopbackConnection, LoopbackService, SessionState, SignalingClient, Supervisor,
};

/// In-memory stand-in for the local HTTP device the agent fronts.
struct CannedFetcher {
    pages: HashMap<String, Vec<u8>>,
}

impl CannedFetcher {
    fn new() -> Self {
        let mut pages = HashMap::new();
        pages.insert(
            "http://camera.local/api/status".to_string(),
            b"{\"status\": \"ok\"}".to_vec(),
        );
        pages.insert(
            "http://camera.local/api/snapshot".to_string(),
            vec![0xff, 0xd8, 0xff, 0xe0],
        );
        Self { pages }
    }
}

#[async_trait]
impl Fetch for CannedFetcher {
    async fn fetch(&self, url: &str, method: &str) -> Result<Vec<u8>, FetchError> {
        if method != "GET" {
            return Err(FetchError::UnsupportedMethod(method.to_string()));
        }
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Request(format!("No route to {}", url)))
    }
}

fn agent(service: &LoopbackService, fetcher: Arc<dyn Fetch>) -> Supervisor {
    let transport = service.transport();
    let config = AgentConfig {
        poll_interval: Duration::from_millis(10),
        ..AgentConfig::default()
    };
    let client = Arc::new(SignalingClient::new(config.clone(), transport, fetcher));
    Supervisor::new(client, config)
}

async fn wait_for_state(client: &SignalingClient, state: SessionState) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if client.state().await == state {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("Timed out waiting for session state {}", state);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn recv_data(conn: &LoopbackConnection) -> Vec<u8> {
    let deadline = Duration::from_secs(2);
    match tokio::time::timeout(deadline, conn.recv()).await {
        Ok(Some(ConnectionEvent::Data(data))) => data,
        other => panic!("Expected a data event, got {:?}", other),
    }
}

#[tokio::test]
async fn test_agent_full_lifecycle() {
    // Step 1: Bring up an agent on the in-memory signaling service
    let service = LoopbackService::new();
    let mut supervisor = agent(&service, Arc::new(CannedFetcher::new()));
    supervisor.start().await.expect("Failed to start agent");

    let client = supervisor.client();
    wait_for_state(&client, SessionState::Open).await;
    let peer_id = client.peer_id().await.expect("No peer id assigned");
    println!("Agent registered as {}", peer_id);

    // Step 2: The agent is discoverable in its room
    let members = client.room_members().await.expect("Room fetch failed");
    assert!(members.contains(&peer_id));

    // Step 3: A remote peer connects and proxies a GET request through us
    let conn = service
        .open_connection("visitor", &peer_id)
        .await
        .expect("Failed to reach the agent");
    conn.send(br#"{"url": "http://camera.local/api/status"}"#.to_vec())
        .await
        .expect("Send failed");
    assert_eq!(recv_data(&conn).await, b"{\"status\": \"ok\"}");

    // Step 4: Binary payloads come back unmodified
    conn.send(br#"{"url": "http://camera.local/api/snapshot", "method": "GET"}"#.to_vec())
        .await
        .expect("Send failed");
    assert_eq!(recv_data(&conn).await, vec![0xff, 0xd8, 0xff, 0xe0]);

    // Step 5: Unsupported methods are answered with an error envelope
    conn.send(br#"{"url": "http://camera.local/api/status", "method": "POST"}"#.to_vec())
        .await
        .expect("Send failed");
    let envelope: ErrorEnvelope =
        serde_json::from_slice(&recv_data(&conn).await).expect("Not an error envelope");
    assert!(envelope.error.contains("POST"));

    // Step 6: So are payloads that are not request envelopes at all
    conn.send(b"snapshot please".to_vec()).await.expect("Send failed");
    let envelope: ErrorEnvelope =
        serde_json::from_slice(&recv_data(&conn).await).expect("Not an error envelope");
    assert!(envelope.error.contains("Malformed request envelope"));

    // Step 7: Clean shutdown destroys the session exactly once
    supervisor.shutdown().await;
    assert_eq!(client.state().await, SessionState::Closed);
    supervisor.shutdown().await;
    assert_eq!(client.state().await, SessionState::Closed);
}

#[tokio::test]
async fn test_agent_recovers_when_service_drops_the_session() {
    // Step 1: Start an agent and wait for its session
    let service = LoopbackService::new();
    let mut supervisor = agent(&service, Arc::new(CannedFetcher::new()));
    supervisor.start().await.expect("Failed to start agent");
    let client = supervisor.client();
    wait_for_state(&client, SessionState::Open).await;
    let peer_id = client.peer_id().await.expect("No peer id assigned");

    // Step 2: The service drops the peer, as it does when a socket dies
    service
        .disconnect_peer(&peer_id)
        .await
        .expect("Peer was not registered");

    // Step 3: The agent reconnects under the id remote peers already know
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let members = client.room_members().await.unwrap_or_default();
        if members.contains(&peer_id) && client.state().await == SessionState::Open {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("Agent did not rejoin its room");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(client.peer_id().await, Some(peer_id.clone()));

    // Step 4: Proxying still works on the repaired session
    let conn = service
        .open_connection("visitor", &peer_id)
        .await
        .expect("Failed to reach the agent");
    conn.send(br#"{"url": "http://camera.local/api/status"}"#.to_vec())
        .await
        .expect("Send failed");
    assert_eq!(recv_data(&conn).await, b"{\"status\": \"ok\"}");

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_two_agents_share_a_room() {
    // Step 1: Two agents register on the same service
    let service = LoopbackService::new();
    let mut first = agent(&service, Arc::new(CannedFetcher::new()));
    let mut second = agent(&service, Arc::new(CannedFetcher::new()));
    first.start().await.expect("Failed to start first agent");
    second.start().await.expect("Failed to start second agent");

    let first_client = first.client();
    let second_client = second.client();
    wait_for_state(&first_client, SessionState::Open).await;
    wait_for_state(&second_client, SessionState::Open).await;

    let first_id = first_client.peer_id().await.unwrap();
    let second_id = second_client.peer_id().await.unwrap();
    assert_ne!(first_id, second_id);

    // Step 2: Each sees the other in the room
    let members = first_client.room_members().await.expect("Room fetch failed");
    assert!(members.contains(&first_id));
    assert!(members.contains(&second_id));

    // Step 3: One agent can proxy through the other, peer to peer
    let conn = service
        .open_connection(&first_id, &second_id)
        .await
        .expect("Failed to reach the second agent");
    conn.send(br#"{"url": "http://camera.local/api/status"}"#.to_vec())
        .await
        .expect("Send failed");
    assert_eq!(recv_data(&conn).await, b"{\"status\": \"ok\"}");

    first.shutdown().await;
    second.shutdown().await;
}

#[tokio::test]
async fn test_agent_proxies_live_http() {
    // Step 1: A local HTTP endpoint the agent will front
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("No local addr");
    tokio::spawn(async move {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 11\r\nConnection: close\r\n\r\nhello agent")
                .await;
        }
    });

    // Step 2: An agent with the real HTTP fetcher
    let service = LoopbackService::new();
    let mut supervisor = agent(&service, Arc::new(HttpFetcher::new()));
    supervisor.start().await.expect("Failed to start agent");
    let client = supervisor.client();
    wait_for_state(&client, SessionState::Open).await;
    let peer_id = client.peer_id().await.unwrap();

    // Step 3: A remote peer fetches the endpoint through the agent
    let conn = service
        .open_connection("visitor", &peer_id)
        .await
        .expect("Failed to reach the agent");
    let request = format!(r#"{{"url": "http://{}/", "method": "GET"}}"#, addr);
    conn.send(request.into_bytes()).await.expect("Send failed");
    assert_eq!(recv_data(&conn).await, b"hello agent");

    supervisor.shutdown().await;
}
