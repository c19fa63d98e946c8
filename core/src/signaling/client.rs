//! Signaling client — owns the session lifecycle and the peer identity.
//!
//! Wraps a [`SignalingTransport`] and layers the side effects on top of the
//! pure [`SessionState`] machine: identity bookkeeping on open/disconnect,
//! reconnect nudges, and proxy attachment for incoming peer connections.

use std::sync::Arc;

use rand::Rng;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::events::PeerEvent;
use super::state::SessionState;
use super::transport::{ConnectOptions, SignalingTransport};
use crate::config::AgentConfig;
use crate::identity::PeerIdentity;
use crate::proxy::{self, Fetch};

/// Signaling client error types
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("Connect failed: {0}")]
    Connect(String),
    #[error("Reconnect failed: {0}")]
    Reconnect(String),
    #[error("Room fetch failed: {0}")]
    RoomFetch(String),
}

/// One signaling session with the PnP service
#[derive(Debug, Clone)]
pub struct Session {
    /// Current session state
    pub state: SessionState,
    /// Token generated for the most recent connect attempt
    pub token: Option<String>,
    /// The id this session is registered under, as last reported by the service
    pub server_id: Option<String>,
}

impl Session {
    fn new() -> Self {
        Self {
            state: SessionState::Uninitialized,
            token: None,
            server_id: None,
        }
    }
}

/// Client for the PnP signaling service
pub struct SignalingClient {
    /// Configuration
    config: AgentConfig,
    /// The signaling service implementation
    transport: Arc<dyn SignalingTransport>,
    /// Fetch capability handed to proxy handlers
    fetcher: Arc<dyn Fetch>,
    /// Persistent peer identity, kept across sessions
    identity: Arc<RwLock<PeerIdentity>>,
    /// The active session
    session: Arc<RwLock<Session>>,
}

impl SignalingClient {
    /// Create a new signaling client. No session is established until
    /// [`connect`](Self::connect) is called.
    pub fn new(
        config: AgentConfig,
        transport: Arc<dyn SignalingTransport>,
        fetcher: Arc<dyn Fetch>,
    ) -> Self {
        Self {
            config,
            transport,
            fetcher,
            identity: Arc::new(RwLock::new(PeerIdentity::new())),
            session: Arc::new(RwLock::new(Session::new())),
        }
    }

    /// Register with the signaling service.
    ///
    /// Idempotent: when the session is already open this returns immediately
    /// without generating a new token or re-registering. A fresh attempt
    /// presents the identity's current id so the service lets this device
    /// keep it; an id we were assigned before is reused so remote peers can
    /// keep addressing us.
    pub async fn connect(&self) -> Result<(), SignalingError> {
        if self.session.read().await.state.is_open() {
            info!("Peer already connected");
            return Ok(());
        }

        info!("Creating signaling session");
        let presented_id = self.identity.read().await.current_id.clone();
        info!("Last saved peer id: {:?}", presented_id);

        let token = session_token();
        info!("Session token: {}", token);
        let options = ConnectOptions {
            host: self.config.host.clone(),
            port: self.config.port,
            secure: self.config.secure,
            token: token.clone(),
        };

        {
            let mut session = self.session.write().await;
            session.state = SessionState::Connecting;
            session.token = Some(token);
            session.server_id = presented_id.clone();
        }

        debug!(
            "Requesting session for id {:?} at {}:{}",
            presented_id, options.host, options.port
        );
        if let Err(e) = self.transport.start(presented_id, &options).await {
            self.session.write().await.state = SessionState::Errored;
            return Err(SignalingError::Connect(e.to_string()));
        }

        info!("Signaling session started");
        Ok(())
    }

    /// Ask the transport to re-establish a dropped session, presenting the
    /// last id the service confirmed for this device.
    pub async fn reconnect(&self) -> Result<(), SignalingError> {
        let last_server_id = {
            let identity = self.identity.read().await;
            identity
                .last_known_server_id
                .clone()
                .or_else(|| identity.current_id.clone())
        };
        self.transport
            .reconnect(last_server_id)
            .await
            .map_err(|e| SignalingError::Reconnect(e.to_string()))
    }

    /// Fetch the ids of the peers currently sharing this peer's room.
    pub async fn room_members(&self) -> Result<Vec<String>, SignalingError> {
        self.transport
            .room_members()
            .await
            .map_err(|e| SignalingError::RoomFetch(e.to_string()))
    }

    /// Tear the session down. Safe to call even if no session was ever
    /// established.
    pub async fn destroy(&self) {
        self.transport.destroy().await;
        self.session.write().await.state = SessionState::Closed;
        info!("Signaling session destroyed");
    }

    /// Next lifecycle event from the transport. The supervisor pumps this
    /// into [`handle_event`](Self::handle_event); tests drive it directly.
    pub async fn next_event(&self) -> Option<PeerEvent> {
        self.transport.recv().await
    }

    /// Apply a lifecycle event: advance the state machine, then run the
    /// side effects the event calls for.
    pub async fn handle_event(&self, event: PeerEvent) {
        let (previous, current) = {
            let mut session = self.session.write().await;
            let previous = session.state;
            session.state = previous.apply(&event);
            (previous, session.state)
        };
        if previous != current {
            debug!("Session state {} -> {}", previous, current);
        }

        match event {
            PeerEvent::Open { peer_id } => self.handle_open(peer_id).await,
            PeerEvent::Disconnected { peer_id } => self.handle_disconnected(peer_id).await,
            PeerEvent::Closed => {
                warn!("Signaling connection closed");
            }
            PeerEvent::Error { message } => {
                error!("Signaling service error: {}", message);
                warn!("Session state: {}", current);
            }
            PeerEvent::Connection(conn) => {
                info!(
                    "Remote peer {} trying to establish connection",
                    conn.remote_peer_id()
                );
                tokio::spawn(proxy::handle_connection(conn, Arc::clone(&self.fetcher)));
            }
        }
    }

    async fn handle_open(&self, reported: Option<String>) {
        info!("Signaling connection open");
        let mut identity = self.identity.write().await;
        let mut session = self.session.write().await;

        match reported {
            Some(id) if !id.is_empty() => {
                if identity.current_id.as_deref() != Some(id.as_str()) {
                    info!(
                        "Signaling service assigned a new peer id: old {:?}, new {}",
                        identity.current_id, id
                    );
                }
                session.server_id = Some(id.clone());
                identity.current_id = Some(id);
            }
            _ => {
                // Some service versions report a null id right after a
                // reconnect. Keep the id the service gave us last time.
                warn!("Signaling service returned a null peer id on open. Keeping last known id");
                session.server_id = identity.current_id.clone();
            }
        }

        identity.last_known_server_id = session.server_id.clone();
        info!("Peer id: {:?}", session.server_id);
    }

    async fn handle_disconnected(&self, reported: Option<String>) {
        info!(
            "Peer {} disconnected from signaling service",
            reported.as_deref().unwrap_or("<unknown>")
        );
        {
            let mut identity = self.identity.write().await;
            let mut session = self.session.write().await;
            if session.server_id.is_none() {
                // The session id can be lost across a disconnect. Restore it
                // so the reconnect presents the id remote peers already know.
                warn!("Session lost its peer id. Restoring last known id");
                session.server_id = identity.current_id.clone();
            }
            identity.last_known_server_id = identity.current_id.clone();
        }

        if let Err(e) = self.reconnect().await {
            warn!("Reconnect attempt failed: {}", e);
        }
    }

    /// Current session state.
    pub async fn state(&self) -> SessionState {
        self.session.read().await.state
    }

    /// Snapshot of the active session.
    pub async fn session(&self) -> Session {
        self.session.read().await.clone()
    }

    /// The id this device is currently known by, if any.
    pub async fn peer_id(&self) -> Option<String> {
        self.identity.read().await.current_id.clone()
    }

    /// Snapshot of the persistent peer identity.
    pub async fn identity(&self) -> PeerIdentity {
        self.identity.read().await.clone()
    }
}

/// Random alphanumeric token for one signaling session.
fn session_token() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
