//! Application configuration
//!
//! Loaded from `config.toml` in the platform config directory. Every field has
//! a default, so a partial file (or none at all) is valid.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::{Error, Result};

/// Full application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub audio: AudioConfig,
    pub watchdog: WatchdogConfig,
    pub receiver: ReceiverConfig,
}

/// Sockets and ports on the device side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Local address both device sockets bind to
    pub bind_address: IpAddr,
    /// Local pairing port
    pub pairing_port: u16,
    /// Local streaming port
    pub streaming_port: u16,
    /// Port the peer listens on for `HI`
    pub peer_pairing_port: u16,
    /// Port the peer listens on for heartbeats and audio
    pub peer_streaming_port: u16,
    /// Receive timeout of the pairing socket
    pub pairing_recv_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            pairing_port: DEFAULT_PAIRING_PORT,
            streaming_port: DEFAULT_STREAMING_PORT,
            peer_pairing_port: DEFAULT_PAIRING_PORT,
            peer_streaming_port: DEFAULT_STREAMING_PORT,
            pairing_recv_timeout_ms: DEFAULT_PAIRING_RECV_TIMEOUT_MS,
        }
    }
}

impl NetworkConfig {
    pub fn pairing_bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.pairing_port)
    }

    pub fn streaming_bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.streaming_port)
    }

    pub fn pairing_recv_timeout(&self) -> Duration {
        Duration::from_millis(self.pairing_recv_timeout_ms)
    }
}

/// Capture format and gain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Input device name; `None` picks the host default
    pub device: Option<String>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per datagram
    pub samples_per_packet: usize,
    /// Initial gain
    pub sensitivity: f32,
    /// Largest gain the sensitivity cell accepts
    pub max_sensitivity: f32,
    /// Frames buffered between capture thread and streamer
    pub frame_queue_capacity: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            samples_per_packet: DEFAULT_SAMPLES_PER_PACKET,
            sensitivity: DEFAULT_SENSITIVITY,
            max_sensitivity: DEFAULT_MAX_SENSITIVITY,
            frame_queue_capacity: FRAME_QUEUE_CAPACITY,
        }
    }
}

/// Liveness watchdog timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub heartbeat_interval_ms: u64,
    pub ack_timeout_ms: u64,
    pub peer_timeout_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT_MS,
            peer_timeout_ms: DEFAULT_PEER_TIMEOUT_MS,
        }
    }
}

impl WatchdogConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }
}

/// Desktop receiver settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    pub bind_address: IpAddr,
    pub pairing_port: u16,
    pub streaming_port: u16,
    /// Where `DISCOVER` probes are sent
    pub discovery_target: SocketAddr,
    /// Device streaming port used until the device's own address is seen
    pub device_streaming_port: u16,
    pub discovery_interval_ms: u64,
    pub keep_alive_interval_ms: u64,
    pub device_timeout_ms: u64,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            pairing_port: DEFAULT_PAIRING_PORT,
            streaming_port: DEFAULT_STREAMING_PORT,
            discovery_target: SocketAddr::new(
                IpAddr::V4(Ipv4Addr::BROADCAST),
                DEFAULT_PAIRING_PORT,
            ),
            device_streaming_port: DEFAULT_STREAMING_PORT,
            discovery_interval_ms: DEFAULT_DISCOVERY_INTERVAL_MS,
            keep_alive_interval_ms: DEFAULT_KEEP_ALIVE_INTERVAL_MS,
            device_timeout_ms: DEFAULT_DEVICE_TIMEOUT_MS,
        }
    }
}

impl ReceiverConfig {
    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms)
    }

    pub fn device_timeout(&self) -> Duration {
        Duration::from_millis(self.device_timeout_ms)
    }
}

impl AppConfig {
    /// Load from the platform config directory, falling back to defaults
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            tracing::info!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load and validate a specific TOML file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;

        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Write the configuration as pretty TOML, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;

        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Default location of `config.toml`
    pub fn config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "lan-wireless-mic")
            .ok_or_else(|| Error::Config("cannot determine config directory".into()))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Reject values the session loops cannot work with
    pub fn validate(&self) -> Result<()> {
        let audio = &self.audio;
        if audio.sample_rate == 0 {
            return Err(Error::Config("audio.sample_rate must be positive".into()));
        }
        if audio.channels == 0 {
            return Err(Error::Config("audio.channels must be positive".into()));
        }
        if audio.samples_per_packet == 0 || audio.samples_per_packet * 2 > MAX_DATAGRAM_SIZE {
            return Err(Error::Config(format!(
                "audio.samples_per_packet must be in 1..={}",
                MAX_DATAGRAM_SIZE / 2
            )));
        }
        if audio.frame_queue_capacity == 0 {
            return Err(Error::Config("audio.frame_queue_capacity must be positive".into()));
        }
        if audio.max_sensitivity.is_nan() || audio.max_sensitivity <= 0.0 {
            return Err(Error::Config("audio.max_sensitivity must be positive".into()));
        }
        if !(0.0..=audio.max_sensitivity).contains(&audio.sensitivity) {
            return Err(Error::Config(format!(
                "audio.sensitivity {} outside 0.0..={}",
                audio.sensitivity, audio.max_sensitivity
            )));
        }

        // Loops re-check the run flag after each bounded wait; keep the waits short.
        let waits = [
            ("network.pairing_recv_timeout_ms", self.network.pairing_recv_timeout_ms),
            ("watchdog.heartbeat_interval_ms", self.watchdog.heartbeat_interval_ms),
            ("watchdog.ack_timeout_ms", self.watchdog.ack_timeout_ms),
        ];
        for (name, value) in waits {
            if value == 0 || value > 1000 {
                return Err(Error::Config(format!("{} must be in 1..=1000", name)));
            }
        }

        let watchdog = &self.watchdog;
        if watchdog.ack_timeout_ms > watchdog.heartbeat_interval_ms {
            return Err(Error::Config(
                "watchdog.ack_timeout_ms must not exceed heartbeat_interval_ms".into(),
            ));
        }
        if watchdog.peer_timeout_ms <= watchdog.heartbeat_interval_ms {
            return Err(Error::Config(
                "watchdog.peer_timeout_ms must exceed heartbeat_interval_ms".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.network.pairing_port, 50004);
        assert_eq!(config.network.streaming_port, 50006);
        assert_eq!(config.watchdog.peer_timeout(), Duration::from_secs(10));
        assert_eq!(config.audio.sample_rate, 44_100);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [audio]
            sensitivity = 1.5

            [watchdog]
            peer_timeout_ms = 3000
            "#,
        )
        .unwrap();

        assert_eq!(config.audio.sensitivity, 1.5);
        assert_eq!(config.audio.max_sensitivity, DEFAULT_MAX_SENSITIVITY);
        assert_eq!(config.watchdog.peer_timeout_ms, 3000);
        assert_eq!(config.network, NetworkConfig::default());
    }

    #[test]
    fn test_validate_rejects_out_of_range_sensitivity() {
        let mut config = AppConfig::default();
        config.audio.sensitivity = 2.5;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.audio.max_sensitivity = 3.0;
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_long_waits() {
        let mut config = AppConfig::default();
        config.network.pairing_recv_timeout_ms = 5000;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.watchdog.peer_timeout_ms = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.audio.device = Some("USB Mic".to_string());
        config.network.peer_streaming_port = 6000;
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
