//! Configuration loading for the `checador` binary.
//!
//! Settings come from an optional TOML file, with command-line flags applied
//! on top. A missing file means defaults everywhere:
//!
//! ```toml
//! session_file = "/var/lib/checador/session"
//!
//! [registry]
//! base_url = "http://10.0.0.5:8080/api"
//! request_timeout_ms = 5000
//!
//! [channel]
//! url = "ws://10.0.0.5:8080/ws"
//! reconnect_delay_ms = 5000
//! max_reconnect_attempts = 20
//!
//! [kiosk]
//! reader = "LECTOR-01"
//! quick_mode = false
//! exit_cutoff_hour = 12
//!
//! [monitor]
//! poll_interval_ms = 10000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use checador_core::ReaderId;
use checador_core::constants::DEFAULT_EXIT_CUTOFF_HOUR;
use checador_kiosk::SettleConfig;
use checador_monitor::MonitorConfig;
use checador_network::{ChannelConfig, RegistryConfig};
use checador_protocol::HeartBeat;

/// File looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "checador.toml";

/// Where the installation's session id is kept unless configured otherwise.
pub const DEFAULT_SESSION_FILE: &str = ".checador/session";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    session_file: Option<PathBuf>,
    registry: RegistrySection,
    channel: ChannelSection,
    kiosk: KioskSection,
    monitor: MonitorSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RegistrySection {
    base_url: Option<String>,
    request_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ChannelSection {
    url: Option<String>,
    reconnect_delay_ms: Option<u64>,
    heartbeat_outgoing_ms: Option<u64>,
    heartbeat_incoming_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    max_reconnect_attempts: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct KioskSection {
    reader: Option<String>,
    quick_mode: Option<bool>,
    success_settle_ms: Option<u64>,
    quick_settle_ms: Option<u64>,
    failed_settle_ms: Option<u64>,
    exit_cutoff_hour: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct MonitorSection {
    poll_interval_ms: Option<u64>,
}

/// Kiosk settings that are not part of a library config struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KioskSettings {
    /// Reader to hold when `--reader` is not given
    pub reader: Option<ReaderId>,
    pub quick_mode: bool,
    pub settle: SettleConfig,
    pub exit_cutoff_hour: u32,
}

impl Default for KioskSettings {
    fn default() -> Self {
        Self {
            reader: None,
            quick_mode: false,
            settle: SettleConfig::default(),
            exit_cutoff_hour: DEFAULT_EXIT_CUTOFF_HOUR,
        }
    }
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub registry_url: Option<String>,
    pub channel_url: Option<String>,
    pub session_file: Option<PathBuf>,
}

/// Fully resolved settings for every subcommand.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub session_file: PathBuf,
    pub registry: RegistryConfig,
    pub channel: ChannelConfig,
    pub kiosk: KioskSettings,
    pub monitor: MonitorConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            session_file: PathBuf::from(DEFAULT_SESSION_FILE),
            registry: RegistryConfig::default(),
            channel: ChannelConfig::default(),
            kiosk: KioskSettings::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load settings from `path`, or from [`DEFAULT_CONFIG_FILE`] if it exists.
    ///
    /// An explicit path must exist; the default one is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_path(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.is_file() {
                    Self::from_path(default)
                } else {
                    debug!("No config file found, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: FileConfig = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded config file");
        Self::resolve(file)
    }

    fn resolve(file: FileConfig) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = file.session_file {
            config.session_file = path;
        }

        let registry = file.registry;
        if let Some(url) = registry.base_url {
            config.registry.base_url = url;
        }
        if let Some(ms) = registry.request_timeout_ms {
            config.registry.request_timeout = Duration::from_millis(ms);
        }

        let channel = file.channel;
        if let Some(url) = channel.url {
            config.channel.url = url;
        }
        if let Some(ms) = channel.reconnect_delay_ms {
            config.channel.reconnect_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = channel.connect_timeout_ms {
            config.channel.connect_timeout = Duration::from_millis(ms);
        }
        let heartbeat = config.channel.heartbeat;
        config.channel.heartbeat = HeartBeat::new(
            channel
                .heartbeat_outgoing_ms
                .map_or(heartbeat.outgoing, Duration::from_millis),
            channel
                .heartbeat_incoming_ms
                .map_or(heartbeat.incoming, Duration::from_millis),
        );
        config.channel.max_reconnect_attempts = channel.max_reconnect_attempts;

        let kiosk = file.kiosk;
        if let Some(reader) = kiosk.reader {
            let reader = ReaderId::new(reader)
                .map_err(|e| ConfigError::Invalid(format!("kiosk.reader: {e}")))?;
            config.kiosk.reader = Some(reader);
        }
        if let Some(quick) = kiosk.quick_mode {
            config.kiosk.quick_mode = quick;
        }
        let settle = &mut config.kiosk.settle;
        if let Some(ms) = kiosk.success_settle_ms {
            settle.success = Duration::from_millis(ms);
        }
        if let Some(ms) = kiosk.quick_settle_ms {
            settle.quick = Duration::from_millis(ms);
        }
        if let Some(ms) = kiosk.failed_settle_ms {
            settle.failed = Duration::from_millis(ms);
        }
        if let Some(hour) = kiosk.exit_cutoff_hour {
            if hour > 23 {
                return Err(ConfigError::Invalid(format!(
                    "kiosk.exit_cutoff_hour must be between 0 and 23, got {hour}"
                )));
            }
            config.kiosk.exit_cutoff_hour = hour;
        }

        if let Some(ms) = file.monitor.poll_interval_ms {
            config.monitor = MonitorConfig::new(Duration::from_millis(ms));
        }

        Ok(config)
    }

    /// Apply command-line values over the loaded settings.
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        if let Some(url) = overrides.registry_url {
            self.registry.base_url = url;
        }
        if let Some(url) = overrides.channel_url {
            self.channel.url = url;
        }
        if let Some(path) = overrides.session_file {
            self.session_file = path;
        }
        self
    }
}
