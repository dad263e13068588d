//! Service configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::error::BeaconError;

/// Configuration for the index service.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct BeaconConfig {
    /// Directory holding the index snapshot and overlay directories.
    #[builder(default = "default_database_dir()")]
    #[serde(default = "default_database_dir")]
    pub database_dir: PathBuf,

    /// Base interval between directory-scan and mtime-check steps.
    #[builder(default = "Duration::from_millis(20)")]
    #[serde(default = "default_parse_timer", with = "millis")]
    pub parse_timer: Duration,

    /// Base interval between update steps.
    #[builder(default = "Duration::from_millis(30)")]
    #[serde(default = "default_update_timer", with = "millis")]
    pub update_timer: Duration,

    /// Delay before a full re-scan when no watch backend is available.
    #[builder(default = "Duration::from_secs(10)")]
    #[serde(default = "default_rescan_interval", with = "millis")]
    pub rescan_interval: Duration,

    /// Delay between the first pending update and the batched commit.
    #[builder(default = "Duration::from_millis(100)")]
    #[serde(default = "default_commit_delay", with = "millis")]
    pub commit_delay: Duration,

    /// Interval between device status polls.
    #[builder(default = "Duration::from_secs(2)")]
    #[serde(default = "default_device_poll_interval", with = "millis")]
    pub device_poll_interval: Duration,

    /// Interval between growing-file polls.
    #[builder(default = "Duration::from_secs(1)")]
    #[serde(default = "default_burst_interval", with = "millis")]
    pub burst_interval: Duration,

    /// Maximum items checked per mtime-check step.
    #[builder(default = "20")]
    #[serde(default = "default_mtime_batch")]
    pub mtime_batch: usize,

    /// Below this many queued items, one step drains the queue.
    #[builder(default = "10")]
    #[serde(default = "default_mtime_drain_threshold")]
    pub mtime_drain_threshold: usize,

    /// Throttled operations fire on every n-th attempt.
    #[builder(default = "10")]
    #[serde(default = "default_throttle_every")]
    pub throttle_every: u32,

    /// Use kernel change notification when available.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub watch: bool,

    /// Whether this process may create media rows.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub write_authority: bool,

    /// Channel cache file.
    #[builder(default)]
    #[serde(default)]
    pub channels_file: Option<PathBuf>,

    /// Program called with the path of a file whose preview is stale.
    #[builder(default)]
    #[serde(default)]
    pub thumbnailer: Option<PathBuf>,
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

fn default_database_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("beacon")
}

fn default_parse_timer() -> Duration {
    Duration::from_millis(20)
}

fn default_update_timer() -> Duration {
    Duration::from_millis(30)
}

fn default_rescan_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_commit_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_device_poll_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_burst_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_mtime_batch() -> usize {
    20
}

fn default_mtime_drain_threshold() -> usize {
    10
}

fn default_throttle_every() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

impl BeaconConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(ref dir) = self.database_dir {
            if dir.as_os_str().is_empty() {
                return Err("Database directory cannot be empty".to_string());
            }
        }
        if self.mtime_batch == Some(0) {
            return Err("mtime_batch must be positive".to_string());
        }
        if self.throttle_every == Some(0) {
            return Err("throttle_every must be positive".to_string());
        }
        for (name, value) in [
            ("parse_timer", self.parse_timer),
            ("update_timer", self.update_timer),
        ] {
            if value == Some(Duration::ZERO) {
                return Err(format!("{name} must be positive"));
            }
        }
        Ok(())
    }
}

impl BeaconConfig {
    /// Create a new config builder.
    pub fn builder() -> BeaconConfigBuilder {
        BeaconConfigBuilder::default()
    }

    /// Default location of the configuration file.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("beacon")
            .join("beacon.toml")
    }

    /// Load configuration from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, BeaconError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(BeaconError::io(path, e)),
        };
        Self::from_toml(&text)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, BeaconError> {
        let config: Self = toml::from_str(text).map_err(|e| BeaconError::InvalidConfig {
            message: e.to_string(),
        })?;
        if config.mtime_batch == 0 || config.throttle_every == 0 {
            return Err(BeaconError::InvalidConfig {
                message: "mtime_batch and throttle_every must be positive".to_string(),
            });
        }
        Ok(config)
    }

    /// Directory holding per-media overlay directories.
    pub fn overlay_root(&self) -> PathBuf {
        self.database_dir.join("overlay")
    }
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            database_dir: default_database_dir(),
            parse_timer: default_parse_timer(),
            update_timer: default_update_timer(),
            rescan_interval: default_rescan_interval(),
            commit_delay: default_commit_delay(),
            device_poll_interval: default_device_poll_interval(),
            burst_interval: default_burst_interval(),
            mtime_batch: default_mtime_batch(),
            mtime_drain_threshold: default_mtime_drain_threshold(),
            throttle_every: default_throttle_every(),
            watch: true,
            write_authority: true,
            channels_file: None,
            thumbnailer: None,
        }
    }
}
