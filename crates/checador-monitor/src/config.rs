use std::time::Duration;

use checador_core::constants::DEFAULT_MONITOR_POLL_MS;

/// Configuration for the reservation monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Interval between automatic refreshes
    pub poll_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_MONITOR_POLL_MS),
        }
    }
}

impl MonitorConfig {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }
}
