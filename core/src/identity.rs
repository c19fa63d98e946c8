//! Peer identity — the server-assigned id this device keeps across sessions.
//!
//! The signaling service assigns a peer id on first registration. The agent
//! reuses that id for every later session so remote peers can keep addressing
//! the device. Some service versions report a null id after a reconnect; the
//! last known id is kept here so the lifecycle handlers can restore it.

/// Persistent peer identity, shared across signaling sessions.
///
/// Owned by the signaling client; everything else reads it through the
/// client's accessors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerIdentity {
    /// The id this device is currently known by, if any.
    pub current_id: Option<String>,
    /// The most recent id the service itself confirmed. Never reset to empty
    /// once a real id has been observed.
    pub last_known_server_id: Option<String>,
}

impl PeerIdentity {
    /// Create an empty identity for a device that has never registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the service has ever assigned this device an id.
    pub fn has_id(&self) -> bool {
        self.current_id.is_some()
    }
}
