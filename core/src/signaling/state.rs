//! Session state machine.
//!
//! Transitions are pure: `apply` maps the current state and an incoming event
//! to the next state and nothing else. Side effects (identity updates,
//! reconnect attempts, proxy attachment) live in the client's handlers, so
//! the table below can be tested without a transport.
//!
//! | State        | Open | Disconnected | Closed | Error       | Connection |
//! |--------------|------|--------------|--------|-------------|------------|
//! | any          | Open | Disconnected | Closed | see below   | unchanged  |
//!
//! An `Error` while the session is `Open` is transient (the session stays
//! usable and the event is only logged); from any other state it parks the
//! session in `Errored` until the discoverability loop or a lifecycle event
//! moves it on.

use std::fmt;

use super::events::PeerEvent;

/// Signaling session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session has been requested yet
    Uninitialized,
    /// `connect` was called; waiting for the service to confirm
    Connecting,
    /// Registered with the signaling service
    Open,
    /// The session dropped; a reconnect can restore it
    Disconnected,
    /// The session was torn down for good
    Closed,
    /// An error arrived while no session was open
    Errored,
}

impl SessionState {
    /// Next state after observing `event`.
    pub fn apply(self, event: &PeerEvent) -> SessionState {
        match event {
            PeerEvent::Open { .. } => SessionState::Open,
            PeerEvent::Disconnected { .. } => SessionState::Disconnected,
            PeerEvent::Closed => SessionState::Closed,
            PeerEvent::Error { .. } => {
                if self == SessionState::Open {
                    SessionState::Open
                } else {
                    SessionState::Errored
                }
            }
            PeerEvent::Connection(_) => self,
        }
    }

    /// Whether the session is registered and usable.
    pub fn is_open(self) -> bool {
        self == SessionState::Open
    }

    /// Whether the session dropped and is waiting for a reconnect.
    pub fn is_disconnected(self) -> bool {
        self == SessionState::Disconnected
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Uninitialized => write!(f, "Uninitialized"),
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::Open => write!(f, "Open"),
            SessionState::Disconnected => write!(f, "Disconnected"),
            SessionState::Closed => write!(f, "Closed"),
            SessionState::Errored => write!(f, "Errored"),
        }
    }
}
