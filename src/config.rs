//! Engine configuration, loadable from TOML.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from parsing or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The TOML did not parse.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// `false` behaves like a platform without audio output.
    pub audio_enabled: bool,
    pub sample_rate: u32,
    /// Frames per render block.
    pub block_size: usize,
    /// Initial effects bus gain.
    pub effects_volume: f32,
    /// Requests queued while waiting for activation; oldest dropped beyond this.
    pub max_deferred: usize,
    pub music: MusicConfig,
}

/// Tempo, look-ahead and music bus settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MusicConfig {
    pub bpm: f64,
    pub beats_per_bar: u32,
    /// Seconds of music kept queued ahead of the clock.
    pub lookahead: f64,
    /// Seconds between scheduler ticks; must be shorter than `lookahead`.
    pub tick_interval: f64,
    /// Offset from `now` for the first generated block.
    pub start_epsilon: f64,
    /// Music bus level at rest and after a stop.
    pub gain: f32,
    /// Time constant of the fade applied by `stop`.
    pub stop_time_constant: f64,
    /// Delay after `stop` before the bus level is restored.
    pub restore_delay: f64,
    /// Time constant used by `fade` when none is given.
    pub fade_time_constant: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            audio_enabled: true,
            sample_rate: 44100,
            block_size: 128,
            effects_volume: 0.5,
            max_deferred: 32,
            music: MusicConfig::default(),
        }
    }
}

impl Default for MusicConfig {
    fn default() -> Self {
        Self {
            bpm: 125.0,
            beats_per_bar: 4,
            lookahead: 3.84,
            tick_interval: 0.96,
            start_epsilon: 0.05,
            gain: 0.18,
            stop_time_constant: 0.3,
            restore_delay: 1.5,
            fade_time_constant: 0.5,
        }
    }
}

impl MusicConfig {
    pub fn beat_duration(&self) -> f64 {
        60.0 / self.bpm
    }

    pub fn bar_duration(&self) -> f64 {
        self.beat_duration() * self.beats_per_bar as f64
    }

    /// One scheduler block: two bars, one chord.
    pub fn block_duration(&self) -> f64 {
        2.0 * self.bar_duration()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.bpm > 0.0 && self.bpm <= 300.0) {
            return Err(ConfigError::Invalid(format!("bpm {} outside 0..=300", self.bpm)));
        }
        if !(3..=16).contains(&self.beats_per_bar) {
            return Err(ConfigError::Invalid(format!(
                "beats_per_bar {} outside 3..=16",
                self.beats_per_bar
            )));
        }
        if !self.lookahead.is_finite() {
            return Err(ConfigError::Invalid(format!("lookahead {} is not finite", self.lookahead)));
        }
        if !(self.tick_interval > 0.0 && self.tick_interval < self.lookahead) {
            return Err(ConfigError::Invalid(format!(
                "tick_interval ({}) must be positive and shorter than lookahead ({})",
                self.tick_interval, self.lookahead
            )));
        }
        // Each tick must still find the watermark past `now + start_epsilon`.
        if !(self.start_epsilon > 0.0 && self.start_epsilon + self.tick_interval <= self.lookahead) {
            return Err(ConfigError::Invalid(format!(
                "start_epsilon ({}) plus tick_interval ({}) must fit within lookahead ({})",
                self.start_epsilon, self.tick_interval, self.lookahead
            )));
        }
        for (name, value) in [
            ("stop_time_constant", self.stop_time_constant),
            ("restore_delay", self.restore_delay),
            ("fade_time_constant", self.fade_time_constant),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::Invalid(format!("{} {} must be finite and non-negative", name, value)));
            }
        }
        if !(0.0..=1.0).contains(&self.gain) {
            return Err(ConfigError::Invalid(format!("music gain {} outside 0..=1", self.gain)));
        }
        Ok(())
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document. Missing keys take defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_size == 0 {
            return Err(ConfigError::Invalid("block_size must be at least 1".into()));
        }
        self.music.validate()
    }
}
