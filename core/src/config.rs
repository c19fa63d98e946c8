//! Agent configuration — signaling service endpoint and loop cadence.

use std::time::Duration;

/// Default PnP signaling service host.
pub const DEFAULT_SIGNALING_HOST: &str = "ambianic-pnp.herokuapp.com";
/// Default PnP signaling service port.
pub const DEFAULT_SIGNALING_PORT: u16 = 443;
/// Default interval between discoverability checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Agent configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Signaling service host
    pub host: String,
    /// Signaling service port
    pub port: u16,
    /// Whether to use TLS for the signaling session
    pub secure: bool,
    /// Pause between discoverability loop iterations
    pub poll_interval: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_SIGNALING_HOST.to_string(),
            port: DEFAULT_SIGNALING_PORT,
            secure: true,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}
