//! Application configuration
//!
//! Loaded from TOML. Every section has defaults, so an absent file or a
//! partial one is fine. The device address can be overridden from the
//! environment (`SDRCONNECT_HOST`, `SDRCONNECT_PORT`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};
use crate::protocol::DemodMode;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub device: DeviceConfig,
    pub session: SessionConfig,
    pub playback: PlaybackConfig,
    pub tuning: TuningDefaults,
}

/// Where the SDRconnect WebSocket lives
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub host: String,
    pub port: u16,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_DEVICE_PORT,
        }
    }
}

impl DeviceConfig {
    pub fn url(&self) -> String {
        format!("ws://{}:{}/", self.host, self.port)
    }
}

/// Reconnect and polling timings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    pub poll_interval_ms: u64,
    pub center_refresh_delay_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_base_ms: RECONNECT_BASE_MS,
            reconnect_max_ms: RECONNECT_MAX_MS,
            poll_interval_ms: SIGNAL_POLL_MS,
            center_refresh_delay_ms: CENTER_REFRESH_DELAY_MS,
        }
    }
}

impl SessionConfig {
    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn center_refresh_delay(&self) -> Duration {
        Duration::from_millis(self.center_refresh_delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.reconnect_base_ms == 0 {
            return Err(Error::Config("session.reconnect_base_ms must be non-zero".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("session.poll_interval_ms must be non-zero".into()));
        }
        Ok(())
    }
}

/// Which execution backend playback should use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// Try a real-time output thread, fall back to inline
    #[default]
    Auto,
    /// Skip the device check and always run inline
    Inline,
}

/// Where the inline backend sends rendered blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackOutput {
    #[default]
    Null,
    /// Signed 16-bit little-endian mono on stdout
    Stdout,
}

/// Playback buffer and backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub capacity: usize,
    pub prebuffer: usize,
    pub target_level: usize,
    pub sample_rate: u32,
    pub input_channels: u16,
    pub inline_block_size: usize,
    pub backend: BackendPreference,
    pub output_device: Option<String>,
    pub fallback_output: FallbackOutput,
    /// Blocks that may be in flight to the audio thread
    pub queue_depth: usize,
    pub volume: f32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            capacity: RING_BUFFER_CAPACITY,
            prebuffer: PRE_BUFFER_SAMPLES,
            target_level: TARGET_LEVEL,
            sample_rate: DEFAULT_SAMPLE_RATE,
            input_channels: DEFAULT_INPUT_CHANNELS,
            inline_block_size: INLINE_BLOCK_SIZE,
            backend: BackendPreference::Auto,
            output_device: None,
            fallback_output: FallbackOutput::Null,
            queue_depth: 1024,
            volume: 0.8,
        }
    }
}

impl PlaybackConfig {
    /// Wall-clock duration of one inline block
    pub fn inline_block_interval(&self) -> Duration {
        Duration::from_secs_f64(self.inline_block_size as f64 / self.sample_rate as f64)
    }

    /// Ring capacity must be a power of two; playback panics otherwise
    pub fn validate(&self) -> Result<()> {
        if !self.capacity.is_power_of_two() {
            return Err(Error::Config(format!(
                "playback.capacity must be a power of two, got {}",
                self.capacity
            )));
        }
        if self.prebuffer > self.capacity {
            return Err(Error::Config("playback.prebuffer exceeds capacity".into()));
        }
        if self.target_level > self.capacity {
            return Err(Error::Config("playback.target_level exceeds capacity".into()));
        }
        if self.input_channels == 0 {
            return Err(Error::Config("playback.input_channels must be at least 1".into()));
        }
        if self.inline_block_size == 0 || self.sample_rate == 0 {
            return Err(Error::Config(
                "playback.inline_block_size and sample_rate must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Defaults used when no explicit tune target is given
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningDefaults {
    pub default_demodulator: DemodMode,
    pub default_bandwidth: u32,
}

impl Default for TuningDefaults {
    fn default() -> Self {
        Self {
            default_demodulator: DemodMode::Am,
            default_bandwidth: 7500,
        }
    }
}

impl AppConfig {
    /// Parse a TOML document
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load from a file, validate, and apply environment overrides
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml(&text)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load from the platform config directory, or defaults if there is no file
    pub fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading configuration from {}", path.display());
                Self::load(&path)
            }
            _ => {
                let mut config = Self::default();
                config.apply_env();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// `<config dir>/sdr-audio-link/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "sdr-audio-link")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("SDRCONNECT_HOST") {
            if !host.is_empty() {
                self.device.host = host;
            }
        }
        if let Ok(port) = std::env::var("SDRCONNECT_PORT") {
            match port.parse() {
                Ok(port) => self.device.port = port,
                Err(_) => tracing::warn!("Ignoring invalid SDRCONNECT_PORT: {}", port),
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.playback.validate()?;
        self.session.validate()
    }
}
