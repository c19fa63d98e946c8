// pnp-agent-core — PnP Signaling Agent
//
// Registers a device with a PnP (plug-and-play) signaling service, keeps it
// discoverable in its peer room across disconnects, and answers HTTP proxy
// requests from remote peers over direct data connections.

pub mod config;
pub mod discovery;
pub mod identity;
pub mod loopback;
pub mod proxy;
pub mod signaling;
pub mod supervisor;

pub use config::AgentConfig;
pub use discovery::DiscoveryLoop;
pub use identity::PeerIdentity;
pub use loopback::{LoopbackConnection, LoopbackService, LoopbackTransport};
pub use proxy::{ErrorEnvelope, Fetch, FetchError, HttpFetcher, ProxyError, ProxyRequest};
pub use signaling::{
    ConnectOptions, ConnectionEvent, DataConnection, PeerEvent, Session, SessionState,
    SignalingClient, SignalingError, SignalingTransport, TransportError,
};
pub use supervisor::{shutdown_signal, Supervisor, SupervisorError};
