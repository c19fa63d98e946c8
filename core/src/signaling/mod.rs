//! Signaling layer — session lifecycle against the PnP service.
//!
//! The transport traits abstract the wire protocol; the client owns the
//! session state machine and the peer identity.

pub mod client;
pub mod events;
pub mod state;
pub mod transport;

pub use client::{Session, SignalingClient, SignalingError};
pub use events::{ConnectionEvent, PeerEvent};
pub use state::SessionState;
pub use transport::{ConnectOptions, DataConnection, SignalingTransport, TransportError};
