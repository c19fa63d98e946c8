//! In-memory signaling service.
//!
//! A [`LoopbackService`] keeps a room of registered peers inside the process
//! and hands out [`LoopbackTransport`] handles that implement the signaling
//! traits against it. Data connections are crossed channel pairs. The test
//! suites drive the agent through this service, and the CLI self-test wires
//! a whole agent over it without touching the network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::signaling::{
    ConnectOptions, ConnectionEvent, DataConnection, PeerEvent, SignalingTransport, TransportError,
};

const EVENT_BUFFER: usize = 32;

/// An in-process stand-in for the PnP signaling service.
///
/// Cheap to clone; all clones share the same peer room.
#[derive(Clone, Default)]
pub struct LoopbackService {
    /// Registered peer id -> event channel of the transport behind it
    members: Arc<StdMutex<HashMap<String, mpsc::Sender<PeerEvent>>>>,
}

impl LoopbackService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport handle attached to this service. The handle does
    /// not join the room until its session is started.
    pub fn transport(&self) -> Arc<LoopbackTransport> {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        Arc::new(LoopbackTransport {
            service: self.clone(),
            events_tx,
            events_rx: Mutex::new(events_rx),
            peer_id: StdMutex::new(None),
            destroyed: AtomicBool::new(false),
            room_fetch_fails: AtomicBool::new(false),
            room_fetch_count: AtomicUsize::new(0),
            start_count: AtomicUsize::new(0),
            reconnect_count: AtomicUsize::new(0),
            destroy_count: AtomicUsize::new(0),
            last_start_id: StdMutex::new(None),
            last_reconnect_id: StdMutex::new(None),
        })
    }

    /// Open a data connection from `from_peer_id` to the registered peer
    /// `to_peer_id`. The target transport receives the connection as a
    /// `PeerEvent::Connection`; the returned end belongs to the caller.
    pub async fn open_connection(
        &self,
        from_peer_id: &str,
        to_peer_id: &str,
    ) -> Result<Arc<LoopbackConnection>, TransportError> {
        let target = match self.members.lock().unwrap().get(to_peer_id) {
            Some(tx) => tx.clone(),
            None => {
                return Err(TransportError::ConnectionFailed(format!(
                    "No peer registered as {}",
                    to_peer_id
                )))
            }
        };

        let (receiver_end, caller_end) = LoopbackConnection::pair(from_peer_id, to_peer_id);
        // Queue the open notification ahead of any data the caller sends.
        let _ = caller_end.outgoing.send(ConnectionEvent::Open).await;
        target
            .send(PeerEvent::Connection(receiver_end))
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        Ok(caller_end)
    }

    /// Drop a peer's session the way the real service does when a socket
    /// dies: the peer leaves the room and its transport sees `Disconnected`.
    pub async fn disconnect_peer(&self, peer_id: &str) -> Result<(), TransportError> {
        let target = self.members.lock().unwrap().remove(peer_id);
        match target {
            Some(tx) => {
                let _ = tx
                    .send(PeerEvent::Disconnected {
                        peer_id: Some(peer_id.to_string()),
                    })
                    .await;
                Ok(())
            }
            None => Err(TransportError::ConnectionFailed(format!(
                "No peer registered as {}",
                peer_id
            ))),
        }
    }
}

/// Transport handle bound to a [`LoopbackService`].
///
/// Implements [`SignalingTransport`] and keeps per-call counters the test
/// suites assert against.
pub struct LoopbackTransport {
    service: LoopbackService,
    events_tx: mpsc::Sender<PeerEvent>,
    events_rx: Mutex<mpsc::Receiver<PeerEvent>>,
    /// Id this transport is currently registered under
    peer_id: StdMutex<Option<String>>,
    destroyed: AtomicBool,
    room_fetch_fails: AtomicBool,
    room_fetch_count: AtomicUsize,
    start_count: AtomicUsize,
    reconnect_count: AtomicUsize,
    destroy_count: AtomicUsize,
    last_start_id: StdMutex<Option<String>>,
    last_reconnect_id: StdMutex<Option<String>>,
}

impl LoopbackTransport {
    /// Number of times a session start was requested.
    pub fn start_count(&self) -> usize {
        self.start_count.load(Ordering::SeqCst)
    }

    /// Number of reconnect attempts.
    pub fn reconnect_count(&self) -> usize {
        self.reconnect_count.load(Ordering::SeqCst)
    }

    /// Number of destroy calls.
    pub fn destroy_count(&self) -> usize {
        self.destroy_count.load(Ordering::SeqCst)
    }

    /// Number of room fetch attempts, failed ones included.
    pub fn room_fetch_count(&self) -> usize {
        self.room_fetch_count.load(Ordering::SeqCst)
    }

    /// Id presented with the most recent start call.
    pub fn last_start_id(&self) -> Option<String> {
        self.last_start_id.lock().unwrap().clone()
    }

    /// Id presented with the most recent reconnect call.
    pub fn last_reconnect_id(&self) -> Option<String> {
        self.last_reconnect_id.lock().unwrap().clone()
    }

    /// Make subsequent room fetches fail, simulating a service that accepts
    /// sessions but cannot serve its room registry.
    pub fn set_room_fetch_fails(&self, fails: bool) {
        self.room_fetch_fails.store(fails, Ordering::SeqCst);
    }

    fn register(&self, id: String) {
        let previous = self.peer_id.lock().unwrap().replace(id.clone());
        let mut members = self.service.members.lock().unwrap();
        if let Some(old) = previous {
            if old != id {
                members.remove(&old);
            }
        }
        members.insert(id, self.events_tx.clone());
    }
}

#[async_trait]
impl SignalingTransport for LoopbackTransport {
    async fn start(
        &self,
        peer_id: Option<String>,
        _options: &ConnectOptions,
    ) -> Result<(), TransportError> {
        self.start_count.fetch_add(1, Ordering::SeqCst);
        *self.last_start_id.lock().unwrap() = peer_id.clone();
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(TransportError::Destroyed);
        }

        let assigned = match peer_id {
            Some(id) if !id.is_empty() => id,
            _ => Uuid::new_v4().to_string(),
        };
        self.register(assigned.clone());
        let _ = self
            .events_tx
            .send(PeerEvent::Open {
                peer_id: Some(assigned),
            })
            .await;
        Ok(())
    }

    async fn reconnect(&self, last_server_id: Option<String>) -> Result<(), TransportError> {
        self.reconnect_count.fetch_add(1, Ordering::SeqCst);
        *self.last_reconnect_id.lock().unwrap() = last_server_id.clone();
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(TransportError::Destroyed);
        }

        let assigned = last_server_id
            .filter(|id| !id.is_empty())
            .or_else(|| self.peer_id.lock().unwrap().clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        self.register(assigned.clone());
        let _ = self
            .events_tx
            .send(PeerEvent::Open {
                peer_id: Some(assigned),
            })
            .await;
        Ok(())
    }

    async fn destroy(&self) {
        self.destroy_count.fetch_add(1, Ordering::SeqCst);
        self.destroyed.store(true, Ordering::SeqCst);
        let registered = self.peer_id.lock().unwrap().take();
        if let Some(id) = registered {
            self.service.members.lock().unwrap().remove(&id);
        }
        let _ = self.events_tx.send(PeerEvent::Closed).await;
    }

    async fn room_members(&self) -> Result<Vec<String>, TransportError> {
        self.room_fetch_count.fetch_add(1, Ordering::SeqCst);
        if self.room_fetch_fails.load(Ordering::SeqCst) {
            return Err(TransportError::RoomFetchFailed(
                "room registry unavailable".to_string(),
            ));
        }
        let mut members: Vec<String> = self
            .service
            .members
            .lock()
            .unwrap()
            .keys()
            .cloned()
            .collect();
        members.sort();
        Ok(members)
    }

    async fn recv(&self) -> Option<PeerEvent> {
        self.events_rx.lock().await.recv().await
    }
}

/// One end of an in-memory data connection.
pub struct LoopbackConnection {
    remote_peer_id: String,
    open: AtomicBool,
    outgoing: mpsc::Sender<ConnectionEvent>,
    incoming: Mutex<mpsc::Receiver<ConnectionEvent>>,
}

impl LoopbackConnection {
    /// Build both ends of a connection. The first end reports `first_peer`
    /// as its remote, the second reports `second_peer`.
    pub fn pair(first_peer: &str, second_peer: &str) -> (Arc<Self>, Arc<Self>) {
        let (to_second_tx, to_second_rx) = mpsc::channel(EVENT_BUFFER);
        let (to_first_tx, to_first_rx) = mpsc::channel(EVENT_BUFFER);
        let first = Arc::new(Self {
            remote_peer_id: first_peer.to_string(),
            open: AtomicBool::new(true),
            outgoing: to_second_tx,
            incoming: Mutex::new(to_first_rx),
        });
        let second = Arc::new(Self {
            remote_peer_id: second_peer.to_string(),
            open: AtomicBool::new(true),
            outgoing: to_first_tx,
            incoming: Mutex::new(to_second_rx),
        });
        (first, second)
    }

    pub fn remote_peer_id(&self) -> &str {
        &self.remote_peer_id
    }

    /// Deliver a payload to the other end.
    pub async fn send(&self, data: Vec<u8>) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.outgoing
            .send(ConnectionEvent::Data(data))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    /// Next event from the other end, or `None` once it is gone.
    pub async fn recv(&self) -> Option<ConnectionEvent> {
        self.incoming.lock().await.recv().await
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Close this end and notify the other one.
    pub async fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.outgoing.send(ConnectionEvent::Close).await;
        }
    }
}

#[async_trait]
impl DataConnection for LoopbackConnection {
    fn remote_peer_id(&self) -> &str {
        self.remote_peer_id()
    }

    async fn send(&self, data: Vec<u8>) -> Result<(), TransportError> {
        self.send(data).await
    }

    async fn recv(&self) -> Option<ConnectionEvent> {
        self.recv().await
    }

    fn is_open(&self) -> bool {
        self.is_open()
    }

    async fn close(&self) {
        self.close().await;
    }
}

// ============================================================================
// TESTS
// ============================================================================
