//! Server and session configuration.

use std::time::Duration;

pub use ds::DEFAULT_EXCHANGE_TIMEOUT;

/// Default period of the stale-presence reaper (20 seconds).
pub const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_secs(20);

/// How many ports above the base port a session tries before giving up.
pub const DEFAULT_PORT_PROBES: u16 = 10;

pub const DEFAULT_SERVER_PORT: u16 = 7070;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Interface the acceptor binds to.
    pub bind_host: String,
    pub port: u16,
    /// Shown in the greeting pushed to every new participant.
    pub server_name: String,
    pub reaper_interval: Duration,
    /// Bound on each push exchange and on reading each inbound request.
    pub exchange_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: DEFAULT_SERVER_PORT,
            server_name: "localhost".to_string(),
            reaper_interval: DEFAULT_REAPER_INTERVAL,
            exchange_timeout: DEFAULT_EXCHANGE_TIMEOUT,
        }
    }
}

impl ServerConfig {
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub user_name: String,
    pub server_host: String,
    pub server_port: u16,
    /// Interface the push listener binds to.
    pub bind_host: String,
    /// Host the server is told to push envelopes to. When unset, the local
    /// address of the route towards the server is used.
    pub advertised_host: Option<String>,
    /// The push listener tries `base_port + 1`, `base_port + 2`, ...
    pub base_port: u16,
    pub port_probes: u16,
    pub request_timeout: Duration,
}

impl SessionConfig {
    /// Session defaults: probe from the server port upward, advertise the
    /// address the server can reach us on.
    pub fn new(
        user_name: impl Into<String>,
        server_host: impl Into<String>,
        server_port: u16,
    ) -> Self {
        Self {
            user_name: user_name.into(),
            server_host: server_host.into(),
            server_port,
            bind_host: "0.0.0.0".to_string(),
            advertised_host: None,
            base_port: server_port,
            port_probes: DEFAULT_PORT_PROBES,
            request_timeout: DEFAULT_EXCHANGE_TIMEOUT,
        }
    }
}
