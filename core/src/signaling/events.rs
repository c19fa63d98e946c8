//! Lifecycle and data-channel events delivered by the signaling transport.

use std::fmt;
use std::sync::Arc;

use super::transport::DataConnection;

/// Events from the signaling service about this peer's session
#[derive(Clone)]
pub enum PeerEvent {
    /// The session opened; the service reported this peer id (possibly none,
    /// see the lost-id workaround in the client)
    Open { peer_id: Option<String> },
    /// The session dropped; the service reported this peer id at the time
    Disconnected { peer_id: Option<String> },
    /// The session was closed for good
    Closed,
    /// The service or transport reported an error
    Error { message: String },
    /// A remote peer opened a direct data connection to us
    Connection(Arc<dyn DataConnection>),
}

impl fmt::Display for PeerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerEvent::Open { peer_id } => {
                write!(f, "Open {{ peer_id: {} }}", display_id(peer_id))
            }
            PeerEvent::Disconnected { peer_id } => {
                write!(f, "Disconnected {{ peer_id: {} }}", display_id(peer_id))
            }
            PeerEvent::Closed => write!(f, "Closed"),
            PeerEvent::Error { message } => write!(f, "Error {{ message: {} }}", message),
            PeerEvent::Connection(conn) => {
                write!(f, "Connection {{ remote_peer: {} }}", conn.remote_peer_id())
            }
        }
    }
}

impl fmt::Debug for PeerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Events on a single peer data connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The data connection is ready
    Open,
    /// A payload arrived from the remote peer
    Data(Vec<u8>),
    /// The remote peer closed the connection
    Close,
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionEvent::Open => write!(f, "Open"),
            ConnectionEvent::Data(data) => write!(f, "Data {{ len: {} }}", data.len()),
            ConnectionEvent::Close => write!(f, "Close"),
        }
    }
}

fn display_id(id: &Option<String>) -> &str {
    id.as_deref().unwrap_or("<none>")
}
