//! Agent supervision.
//!
//! The [`Supervisor`] owns the background tasks of a running agent: the event
//! pump that feeds transport events into the signaling client, and the
//! discovery loop. Shutdown stops both, then destroys the session exactly
//! once.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::discovery::DiscoveryLoop;
use crate::signaling::SignalingClient;

/// Supervisor error types
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Agent already running")]
    AlreadyRunning,
    #[error("Connect failed: {0}")]
    Connect(String),
}

/// Runs an agent: one signaling session, one event pump, one discovery loop.
pub struct Supervisor {
    client: Arc<SignalingClient>,
    config: AgentConfig,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    running: bool,
}

impl Supervisor {
    pub fn new(client: Arc<SignalingClient>, config: AgentConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            client,
            config,
            shutdown_tx,
            tasks: Vec::new(),
            running: false,
        }
    }

    /// Connect the signaling session and spawn the background tasks.
    pub async fn start(&mut self) -> Result<(), SupervisorError> {
        if self.running {
            return Err(SupervisorError::AlreadyRunning);
        }

        self.client
            .connect()
            .await
            .map_err(|e| SupervisorError::Connect(e.to_string()))?;

        let pump = tokio::spawn(pump_events(
            Arc::clone(&self.client),
            self.shutdown_tx.subscribe(),
        ));
        let discovery = tokio::spawn(
            DiscoveryLoop::new(
                Arc::clone(&self.client),
                self.config.poll_interval,
                self.shutdown_tx.subscribe(),
            )
            .run(),
        );
        self.tasks.push(pump);
        self.tasks.push(discovery);
        self.running = true;
        info!("Agent started");
        Ok(())
    }

    /// Stop the background tasks and destroy the session. Idempotent; a
    /// supervisor that never started has nothing to tear down.
    pub async fn shutdown(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;

        info!("Shutting down agent");
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("Agent task ended abnormally: {}", e);
            }
        }
        self.client.destroy().await;
        info!("Agent stopped");
    }

    /// Whether the background tasks are running.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Handle on the supervised signaling client.
    pub fn client(&self) -> Arc<SignalingClient> {
        Arc::clone(&self.client)
    }
}

/// Feed transport events into the client until shutdown or the end of the
/// event stream.
async fn pump_events(client: Arc<SignalingClient>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            event = client.next_event() => match event {
                Some(event) => client.handle_event(event).await,
                None => {
                    warn!("Signaling event stream ended");
                    break;
                }
            },
        }
    }
    debug!("Event pump stopped");
}

/// Completes when the process receives SIGINT or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

// ============================================================================
// TESTS
// ============================================================================
