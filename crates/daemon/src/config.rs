use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use eeg_sensor::DeviceConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid WebSocket address '{addr}': {reason}")]
    InvalidAddress { addr: String, reason: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration for the engagement bridge
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Bind address, `ws://HOST:PORT`
    pub ws_addr: String,
    /// How often new samples are pulled from the device
    pub pull_interval_ms: u64,
    /// How often an engagement packet is computed and broadcast
    pub output_interval_ms: u64,
    /// Length of the band-power window in seconds
    pub window_secs: f64,
    /// Outbound messages buffered per subscriber before the oldest is dropped
    pub subscriber_queue_capacity: usize,
    /// Back-to-back overflows tolerated before a subscriber is disconnected
    pub max_consecutive_overflows: u32,
    /// Bound of the connection -> acquisition loop command channel
    pub command_channel_capacity: usize,
    pub device: DeviceConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ws_addr: "ws://0.0.0.0:8765".to_string(),
            pull_interval_ms: 200,
            output_interval_ms: 1000,
            window_secs: 1.0,
            subscriber_queue_capacity: 8,
            max_consecutive_overflows: 4,
            command_channel_capacity: 256,
            device: DeviceConfig::default(),
        }
    }
}

impl BridgeConfig {
    pub fn pull_interval(&self) -> Duration {
        Duration::from_millis(self.pull_interval_ms)
    }

    pub fn output_interval(&self) -> Duration {
        Duration::from_millis(self.output_interval_ms)
    }

    /// Window length in samples for a given sampling rate.
    pub fn window_len(&self, sample_rate: u32) -> usize {
        (self.window_secs * sample_rate as f64).round() as usize
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_ws_addr(&self.ws_addr)
    }

    /// Checks everything except the bind address.
    pub fn validate_acquisition(&self) -> Result<(), ConfigError> {
        if self.pull_interval_ms == 0 || self.output_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "pull and output intervals must be greater than zero".to_string(),
            ));
        }
        if !(self.window_secs.is_finite() && self.window_secs > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "window_secs must be a positive number, got {}",
                self.window_secs
            )));
        }
        if self.subscriber_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "subscriber_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.command_channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "command_channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_acquisition()?;
        self.socket_addr()?;
        Ok(())
    }
}

/// Parses `ws://HOST:PORT` into a socket address. Hostnames are resolved,
/// preferring an IPv4 address, so `localhost` binds `127.0.0.1`.
pub fn parse_ws_addr(addr: &str) -> Result<SocketAddr, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidAddress {
        addr: addr.to_string(),
        reason: reason.to_string(),
    };

    let host_port = addr
        .strip_prefix("ws://")
        .ok_or_else(|| invalid("must start with ws://"))?;
    let host_port = host_port.trim_end_matches('/');
    let (host, port) = host_port
        .rsplit_once(':')
        .ok_or_else(|| invalid("must include host:port"))?;
    let port: u16 = port.parse().map_err(|_| invalid("port must be an integer"))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    let resolved: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| invalid(&format!("could not resolve host: {}", e)))?
        .collect();
    resolved
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| resolved.first())
        .copied()
        .ok_or_else(|| invalid("host resolved to no addresses"))
}

/// Loads the bridge configuration from a TOML file, or defaults when no path
/// is given.
pub fn load_config(path: Option<&Path>) -> Result<BridgeConfig, ConfigError> {
    let config = match path {
        Some(path) => {
            let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        }
        None => BridgeConfig::default(),
    };
    Ok(config)
}
