// THEORY:
// Every knob of the overlay is a user-facing tuning slider, so bad values degrade
// instead of failing: out-of-range numbers are clamped to the nearest bound and NaN
// falls back to the default. Clamping happens in exactly one place (`From<OverlaySettings>`)
// which both the setters and serde deserialization go through, so an
// `OverlayConfig` can never hold an out-of-range value.

use crate::core_modules::motion_map::EdgePolicy;
use crate::core_modules::overlay::OverlayStyle;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;

pub const SENSITIVITY_RANGE: RangeInclusive<f64> = 5.0..=50.0;
pub const DECAY_RANGE: RangeInclusive<f64> = 0.50..=0.95;
pub const UNIT_RANGE: RangeInclusive<f64> = 0.0..=1.0;
pub const MAX_DILATION_RADIUS: u32 = 16;

/// Top-level TOML file layout shared by the binaries.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub overlay: OverlayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        load_toml(path)
    }
}

/// Reads and parses any TOML-backed configuration type.
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
    toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Raw, unclamped overlay settings as they appear on the wire or in a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlaySettings {
    pub sensitivity: f64,
    pub decay: f64,
    pub dilation_radius: u32,
    pub dilation_edge: EdgePolicy,
    pub visibility_floor: f64,
    pub dim_factor: f64,
    pub pass_through_dim: f64,
    pub stale_after_ms: Option<u64>,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            sensitivity: default_sensitivity(),
            decay: default_decay(),
            dilation_radius: default_dilation_radius(),
            dilation_edge: EdgePolicy::default(),
            visibility_floor: default_visibility_floor(),
            dim_factor: default_dim_factor(),
            pass_through_dim: default_pass_through_dim(),
            stale_after_ms: None,
        }
    }
}

/// Validated tuning parameters for a `MotionOverlayEngine`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "OverlaySettings", into = "OverlaySettings")]
pub struct OverlayConfig {
    sensitivity: f64,
    decay: f64,
    dilation_radius: u32,
    dilation_edge: EdgePolicy,
    visibility_floor: f64,
    dim_factor: f64,
    pass_through_dim: f64,
    stale_after: Option<Duration>,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        OverlaySettings::default().into()
    }
}

impl From<OverlaySettings> for OverlayConfig {
    fn from(raw: OverlaySettings) -> Self {
        Self {
            sensitivity: clamp_or(raw.sensitivity, SENSITIVITY_RANGE, default_sensitivity()),
            decay: clamp_or(raw.decay, DECAY_RANGE, default_decay()),
            dilation_radius: raw.dilation_radius.min(MAX_DILATION_RADIUS),
            dilation_edge: raw.dilation_edge,
            visibility_floor: clamp_or(
                raw.visibility_floor,
                UNIT_RANGE,
                default_visibility_floor(),
            ),
            dim_factor: clamp_or(raw.dim_factor, UNIT_RANGE, default_dim_factor()),
            pass_through_dim: clamp_or(
                raw.pass_through_dim,
                UNIT_RANGE,
                default_pass_through_dim(),
            ),
            stale_after: raw.stale_after_ms.map(Duration::from_millis),
        }
    }
}

impl From<OverlayConfig> for OverlaySettings {
    fn from(config: OverlayConfig) -> Self {
        Self {
            sensitivity: config.sensitivity,
            decay: config.decay,
            dilation_radius: config.dilation_radius,
            dilation_edge: config.dilation_edge,
            visibility_floor: config.visibility_floor,
            dim_factor: config.dim_factor,
            pass_through_dim: config.pass_through_dim,
            stale_after_ms: config
                .stale_after
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        }
    }
}

impl OverlayConfig {
    /// Per-pixel grayscale delta that counts as motion.
    pub fn sensitivity(&self) -> f64 {
        self.sensitivity
    }

    pub fn set_sensitivity(&mut self, sensitivity: f64) -> &mut Self {
        self.sensitivity = clamp_or(sensitivity, SENSITIVITY_RANGE, default_sensitivity());
        self
    }

    /// Temporal smoothing factor; higher is smoother and slower.
    pub fn decay(&self) -> f64 {
        self.decay
    }

    pub fn set_decay(&mut self, decay: f64) -> &mut Self {
        self.decay = clamp_or(decay, DECAY_RANGE, default_decay());
        self
    }

    pub fn dilation_radius(&self) -> u32 {
        self.dilation_radius
    }

    pub fn set_dilation_radius(&mut self, radius: u32) -> &mut Self {
        self.dilation_radius = radius.min(MAX_DILATION_RADIUS);
        self
    }

    pub fn dilation_edge(&self) -> EdgePolicy {
        self.dilation_edge
    }

    pub fn set_dilation_edge(&mut self, edge: EdgePolicy) -> &mut Self {
        self.dilation_edge = edge;
        self
    }

    pub fn visibility_floor(&self) -> f64 {
        self.visibility_floor
    }

    pub fn set_visibility_floor(&mut self, floor: f64) -> &mut Self {
        self.visibility_floor = clamp_or(floor, UNIT_RANGE, default_visibility_floor());
        self
    }

    pub fn dim_factor(&self) -> f64 {
        self.dim_factor
    }

    pub fn set_dim_factor(&mut self, factor: f64) -> &mut Self {
        self.dim_factor = clamp_or(factor, UNIT_RANGE, default_dim_factor());
        self
    }

    /// Brightness of the frame shown while the engine (re)seeds.
    pub fn pass_through_dim(&self) -> f64 {
        self.pass_through_dim
    }

    pub fn set_pass_through_dim(&mut self, factor: f64) -> &mut Self {
        self.pass_through_dim = clamp_or(factor, UNIT_RANGE, default_pass_through_dim());
        self
    }

    /// Gap between frames after which the previous frame is no longer diffed against.
    pub fn stale_after(&self) -> Option<Duration> {
        self.stale_after
    }

    pub fn set_stale_after(&mut self, limit: Option<Duration>) -> &mut Self {
        self.stale_after = limit;
        self
    }

    pub fn style(&self) -> OverlayStyle {
        OverlayStyle {
            visibility_floor: self.visibility_floor,
            dim_factor: self.dim_factor,
        }
    }
}

fn clamp_or(value: f64, range: RangeInclusive<f64>, fallback: f64) -> f64 {
    if value.is_nan() {
        fallback
    } else {
        value.clamp(*range.start(), *range.end())
    }
}

// Default value functions
fn default_sensitivity() -> f64 {
    18.0
}
fn default_decay() -> f64 {
    0.85
}
fn default_dilation_radius() -> u32 {
    1
}
fn default_visibility_floor() -> f64 {
    0.15
}
fn default_dim_factor() -> f64 {
    0.3
}
fn default_pass_through_dim() -> f64 {
    0.35
}
fn default_log_level() -> String {
    "info".into()
}
