//! Connection settings for the registry and the event channel.

use std::time::Duration;

use checador_core::constants::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_HEARTBEAT_INCOMING_MS, DEFAULT_HEARTBEAT_OUTGOING_MS,
    DEFAULT_RECONNECT_DELAY_MS, DEFAULT_REQUEST_TIMEOUT_MS,
};
use checador_protocol::HeartBeat;

/// Configuration for the HTTP reader registry
///
/// # Example
///
/// ```
/// use checador_network::RegistryConfig;
/// use std::time::Duration;
///
/// let config = RegistryConfig::new("http://10.0.0.5:8080/api")
///     .request_timeout(Duration::from_secs(3));
/// assert_eq!(config.base_url, "http://10.0.0.5:8080/api");
/// ```
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Base URL every registry path is appended to
    pub base_url: String,

    /// Timeout for a single request, connect included
    pub request_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }
}

impl RegistryConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Set the per-request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Configuration for the STOMP-over-WebSocket event channel
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// WebSocket endpoint of the broker (`ws://` or `wss://`)
    pub url: String,

    /// Fixed delay between a lost connection and the next attempt
    pub reconnect_delay: Duration,

    /// Heart-beat intervals offered in `CONNECT`
    pub heartbeat: HeartBeat,

    /// Limit for the WebSocket upgrade plus STOMP handshake
    pub connect_timeout: Duration,

    /// Consecutive failed attempts before giving up; `None` retries forever
    pub max_reconnect_attempts: Option<u32>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8080/ws".to_string(),
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            heartbeat: HeartBeat::new(
                Duration::from_millis(DEFAULT_HEARTBEAT_OUTGOING_MS),
                Duration::from_millis(DEFAULT_HEARTBEAT_INCOMING_MS),
            ),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            max_reconnect_attempts: None,
        }
    }
}

impl ChannelConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn heartbeat(mut self, heartbeat: HeartBeat) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Stop reconnecting after `attempts` consecutive failures
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = Some(attempts);
        self
    }
}
