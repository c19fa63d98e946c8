//! Discoverability loop.
//!
//! Polls the session on a fixed cadence: while the session is open it keeps
//! the peer joined to its room so remote peers can find it, and while the
//! session is down it drives the reconnect attempts. Every failure is logged
//! and swallowed; only a shutdown signal stops the loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time;
use tracing::{debug, info, warn};

use crate::signaling::SignalingClient;

/// Periodic task that keeps the agent discoverable.
pub struct DiscoveryLoop {
    client: Arc<SignalingClient>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl DiscoveryLoop {
    pub fn new(
        client: Arc<SignalingClient>,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            client,
            interval,
            shutdown,
        }
    }

    /// Run until the shutdown signal fires. Never exits on its own: a session
    /// that cannot be repaired right now is retried on the next pass.
    pub async fn run(mut self) {
        info!("Starting discovery loop, poll interval {:?}", self.interval);
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            self.tick().await;
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
                _ = time::sleep(self.interval) => {}
            }
        }
        debug!("Discovery loop stopped");
    }

    /// One pass: join the room if the session is open, otherwise nudge it
    /// back towards open.
    async fn tick(&self) {
        debug!("Making peer discoverable");
        let state = self.client.state().await;
        if state.is_open() {
            self.join_room().await;
        } else {
            info!("Peer not connected to signaling service. Will retry in a bit");
            if state.is_disconnected() {
                info!("Peer disconnected. Will try to reconnect");
                if let Err(e) = self.client.reconnect().await {
                    warn!("Unable to reconnect. Will retry in a few moments: {}", e);
                }
            } else {
                info!("Peer still establishing connection: {}", state);
            }
        }
    }

    async fn join_room(&self) {
        debug!("Fetching room members");
        match self.client.room_members().await {
            Ok(members) => {
                debug!("Room members: {:?}", members);
            }
            Err(e) => {
                warn!("Unable to join room. Will retry in a few moments: {}", e);
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
