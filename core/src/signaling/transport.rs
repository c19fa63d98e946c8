//! Signaling transport abstraction.
//!
//! Defines the capabilities the agent consumes from a PnP signaling
//! implementation: session establishment, room membership, and the peer data
//! connections remote peers open to us. The in-memory loopback service
//! implements these for tests and the local harness; a real service client
//! plugs in through the same traits.

use async_trait::async_trait;
use thiserror::Error;

use super::events::{ConnectionEvent, PeerEvent};

/// Errors from signaling transport operations
#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Send failed: {0}")]
    SendFailed(String),
    #[error("Room fetch failed: {0}")]
    RoomFetchFailed(String),
    #[error("Not connected")]
    NotConnected,
    #[error("Session destroyed")]
    Destroyed,
}

/// Options for establishing a signaling session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Signaling service host
    pub host: String,
    /// Signaling service port
    pub port: u16,
    /// Whether to use TLS
    pub secure: bool,
    /// Fresh session token for this attempt
    pub token: String,
}

/// Session-level capabilities of a PnP signaling service
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Register with the signaling service, presenting `peer_id` if this
    /// device already has one. The assigned id arrives via `PeerEvent::Open`.
    async fn start(
        &self,
        peer_id: Option<String>,
        options: &ConnectOptions,
    ) -> Result<(), TransportError>;

    /// Re-establish a dropped session, presenting the last server-confirmed id.
    async fn reconnect(&self, last_server_id: Option<String>) -> Result<(), TransportError>;

    /// Tear the session down. Safe to call on a session that never started.
    async fn destroy(&self);

    /// Ids of the peers currently sharing this peer's room.
    async fn room_members(&self) -> Result<Vec<String>, TransportError>;

    /// Next lifecycle event, or `None` once the transport is gone.
    async fn recv(&self) -> Option<PeerEvent>;
}

/// A direct data connection opened by a remote peer
#[async_trait]
pub trait DataConnection: Send + Sync {
    /// Id of the remote peer on the other end.
    fn remote_peer_id(&self) -> &str;

    /// Send a payload to the remote peer.
    async fn send(&self, data: Vec<u8>) -> Result<(), TransportError>;

    /// Next event on this connection, or `None` once it is gone.
    async fn recv(&self) -> Option<ConnectionEvent>;

    /// Whether the connection is open.
    fn is_open(&self) -> bool;

    /// Close the connection.
    async fn close(&self);
}
