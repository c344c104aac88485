use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PlayerError, Result};
use crate::monitor::MonitorConfig;
use crate::retry::RetryConfig;
use crate::tuning::{BufferTuningConfig, TuningBounds};

/// Transport-control timing and initial sink settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlsConfig {
    /// Quiet period after the last command before the controls hide.
    pub hide_after_ms: u64,
    /// Refresh period of the elapsed-time display.
    pub elapsed_tick_ms: u64,
    /// 0..=100
    pub initial_volume: u8,
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            hide_after_ms: 3000,
            elapsed_tick_ms: 1000,
            initial_volume: 100,
        }
    }
}

impl ControlsConfig {
    pub fn hide_after(&self) -> Duration {
        Duration::from_millis(self.hide_after_ms)
    }

    pub fn elapsed_tick(&self) -> Duration {
        Duration::from_millis(self.elapsed_tick_ms)
    }
}

/// Top-level player configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub retry: RetryConfig,
    /// Initial buffering parameters of every session.
    pub tuning: BufferTuningConfig,
    pub bounds: TuningBounds,
    pub monitor: MonitorConfig,
    pub controls: ControlsConfig,
}

impl PlayerConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.base_delay_ms == 0 {
            return Err(PlayerError::configuration(
                "retry.base_delay_ms must be greater than zero",
            ));
        }
        if !(self.bounds.floor_secs > 0.0 && self.bounds.floor_secs <= self.bounds.ceiling_secs) {
            return Err(PlayerError::configuration(format!(
                "tuning bounds are inconsistent: floor {}s, ceiling {}s",
                self.bounds.floor_secs, self.bounds.ceiling_secs
            )));
        }
        if self.bounds.step_secs <= 0.0 {
            return Err(PlayerError::configuration(
                "bounds.step_secs must be greater than zero",
            ));
        }
        let initial = self.tuning.max_buffer_length_secs;
        if initial < self.bounds.floor_secs || initial > self.bounds.ceiling_secs {
            return Err(PlayerError::configuration(format!(
                "initial max buffer length {initial}s is outside [{}, {}]",
                self.bounds.floor_secs, self.bounds.ceiling_secs
            )));
        }
        if self.monitor.low_watermark_secs >= self.monitor.high_watermark_secs {
            return Err(PlayerError::configuration(format!(
                "low watermark {}s must be below high watermark {}s",
                self.monitor.low_watermark_secs, self.monitor.high_watermark_secs
            )));
        }
        if self.monitor.sample_interval_ms == 0 || self.controls.elapsed_tick_ms == 0 {
            return Err(PlayerError::configuration(
                "sample and elapsed-time periods must be greater than zero",
            ));
        }
        if self.controls.initial_volume > 100 {
            return Err(PlayerError::configuration(format!(
                "initial volume {} is outside 0..=100",
                self.controls.initial_volume
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PlayerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.controls.hide_after(), Duration::from_secs(3));
        assert_eq!(config.monitor.sample_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = PlayerConfig::from_json_str(
            r#"{ "retry": { "max_attempts": 8 }, "monitor": { "low_watermark_secs": 1.5 } }"#,
        )
        .unwrap();
        assert_eq!(config.retry.max_attempts, 8);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.monitor.low_watermark_secs, 1.5);
        assert_eq!(config.monitor.high_watermark_secs, 10.0);
        assert_eq!(config.tuning, BufferTuningConfig::default());
    }

    #[test]
    fn test_inverted_watermarks_rejected() {
        let err = PlayerConfig::from_json_str(
            r#"{ "monitor": { "low_watermark_secs": 12.0, "high_watermark_secs": 10.0 } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, PlayerError::Configuration { .. }));
    }

    #[test]
    fn test_initial_buffer_outside_bounds_rejected() {
        let mut config = PlayerConfig::default();
        config.tuning.max_buffer_length_secs = 90.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_missing_file() {
        let err = PlayerConfig::from_json_file("/nonexistent/steadycast.json").unwrap_err();
        assert!(matches!(err, PlayerError::Io { .. }));
    }
}
