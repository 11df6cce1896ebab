//! Compositor configuration
//!
//! Loaded from a TOML file with camelCase keys:
//!
//! ```toml
//! outputArrangement = "auto"
//! damageCoalesceWindowMs = 1
//! adapterHeartbeatTimeoutMs = 5000
//! backendDetachRetryLimit = 2
//! renderRetryLimit = 3
//!
//! [[output]]
//! name = "HDMI-A-1"
//! x = 1920
//! y = 0
//! scale = 1.5
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// How newly discovered outputs are placed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputArrangement {
    /// Outputs stay unplaced until positioned explicitly
    Manual,
    /// Outputs are placed left-to-right in discovery order
    #[default]
    Auto,
}

/// Per-output override, matched by output name
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputConfig {
    pub name: String,
    pub x: Option<i32>,
    pub y: Option<i32>,
    pub scale: Option<f64>,
}

impl OutputConfig {
    /// Explicit position, if both coordinates are given
    pub fn position(&self) -> Option<(i32, i32)> {
        self.x.zip(self.y)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub output_arrangement: OutputArrangement,
    pub damage_coalesce_window_ms: u64,
    pub adapter_heartbeat_timeout_ms: u64,
    pub backend_detach_retry_limit: u32,
    pub render_retry_limit: u32,
    pub seat_name: String,
    /// Refresh rate assumed for outputs that report none, in mHz
    pub default_refresh_mhz: u32,
    #[serde(rename = "output")]
    pub outputs: Vec<OutputConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_arrangement: OutputArrangement::Auto,
            damage_coalesce_window_ms: 1,
            adapter_heartbeat_timeout_ms: 5000,
            backend_detach_retry_limit: 2,
            render_retry_limit: 3,
            seat_name: "seat0".to_string(),
            default_refresh_mhz: 60_000,
            outputs: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Load configuration from a file if it exists, defaults otherwise
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.adapter_heartbeat_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "adapterHeartbeatTimeoutMs",
                reason: "must be greater than zero".into(),
            });
        }
        if self.default_refresh_mhz == 0 {
            return Err(ConfigError::Invalid {
                key: "defaultRefreshMhz",
                reason: "must be greater than zero".into(),
            });
        }
        for output in &self.outputs {
            if let Some(scale) = output.scale {
                if !(scale.is_finite() && scale > 0.0) {
                    return Err(ConfigError::Invalid {
                        key: "output.scale",
                        reason: format!("{} has scale {}", output.name, scale),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn damage_coalesce_window(&self) -> Duration {
        Duration::from_millis(self.damage_coalesce_window_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.adapter_heartbeat_timeout_ms)
    }

    /// Find the override for an output name
    pub fn output_config(&self, name: &str) -> Option<&OutputConfig> {
        self.outputs.iter().find(|o| o.name == name)
    }
}
