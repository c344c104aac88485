//! Buffer health monitor.
//!
//! Each sample compares the buffered edge with the playhead and nudges the
//! target buffer length within [`TuningBounds`]. The monitor never declares
//! a fault; its only outputs are a retuned config and a resume hint.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::sink::SinkSnapshot;
use crate::tuning::{BufferTuningConfig, TuningBounds};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub sample_interval_ms: u64,
    /// Below this much buffer the target buffer grows.
    pub low_watermark_secs: f64,
    /// Above this much buffer the target buffer shrinks.
    pub high_watermark_secs: f64,
    /// A paused sink with at least this much buffer is resumed.
    pub resume_threshold_secs: f64,
    /// Below this much buffer a playing session counts as buffering.
    pub stall_threshold_secs: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 1000,
            low_watermark_secs: 2.0,
            high_watermark_secs: 10.0,
            resume_threshold_secs: 3.0,
            stall_threshold_secs: 0.5,
        }
    }
}

impl MonitorConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

/// Result of one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleOutcome {
    pub health: f64,
    /// `tuning` was changed and should be pushed to the engine.
    pub retuned: bool,
    /// Playback should be resumed.
    pub resume: bool,
    /// The buffer is too thin to keep playing smoothly.
    pub stalled: bool,
}

#[derive(Debug, Clone)]
pub struct BufferHealthMonitor {
    config: MonitorConfig,
    bounds: TuningBounds,
}

impl BufferHealthMonitor {
    pub fn new(config: MonitorConfig, bounds: TuningBounds) -> Self {
        Self { config, bounds }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Evaluate one sample.
    ///
    /// `may_resume` is false while the pause was requested by the user or
    /// the runtime is blocking autoplay.
    pub fn sample(
        &self,
        snapshot: &SinkSnapshot,
        tuning: &mut BufferTuningConfig,
        may_resume: bool,
    ) -> SampleOutcome {
        let health = snapshot.buffer_health();
        let playing = !snapshot.paused;

        let retuned = if health < self.config.low_watermark_secs && playing {
            let grown = tuning.grow(&self.bounds);
            if grown {
                debug!(
                    health,
                    target = tuning.max_buffer_length_secs,
                    "Buffer running low, raising target buffer"
                );
            }
            grown
        } else if health > self.config.high_watermark_secs {
            let shrunk = tuning.shrink(&self.bounds);
            if shrunk {
                debug!(
                    health,
                    target = tuning.max_buffer_length_secs,
                    "Buffer ahead of target, lowering latency"
                );
            }
            shrunk
        } else {
            false
        };

        let resume = !playing && may_resume && health > self.config.resume_threshold_secs;

        SampleOutcome {
            health,
            retuned,
            resume,
            stalled: playing && health < self.config.stall_threshold_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::BufferedRange;

    fn snapshot(position: f64, edge: f64, paused: bool) -> SinkSnapshot {
        SinkSnapshot {
            position,
            buffered: vec![BufferedRange::new(0.0, edge)],
            paused,
        }
    }

    fn monitor() -> BufferHealthMonitor {
        BufferHealthMonitor::new(MonitorConfig::default(), TuningBounds::default())
    }

    #[test]
    fn test_low_buffer_while_playing_grows_target_up_to_ceiling() {
        let monitor = monitor();
        let mut tuning = BufferTuningConfig {
            max_buffer_length_secs: 50.0,
            ..Default::default()
        };

        let mut outcomes = Vec::new();
        for tick in 0..3 {
            let position = 10.0 + tick as f64;
            outcomes.push(monitor.sample(&snapshot(position, position + 1.5, false), &mut tuning, true));
        }

        assert!(outcomes.iter().all(|o| o.health == 1.5));
        assert!(outcomes[0].retuned);
        assert!(outcomes[1].retuned);
        assert!(!outcomes[2].retuned);
        assert!(outcomes.iter().all(|o| !o.resume));
        assert!(outcomes.iter().all(|o| !o.stalled));
        assert_eq!(tuning.max_buffer_length_secs, 60.0);
    }

    #[test]
    fn test_low_buffer_while_paused_does_not_grow() {
        let monitor = monitor();
        let mut tuning = BufferTuningConfig::default();
        let outcome = monitor.sample(&snapshot(5.0, 6.0, true), &mut tuning, true);
        assert!(!outcome.retuned);
        assert!(!outcome.resume);
        assert_eq!(tuning, BufferTuningConfig::default());
    }

    #[test]
    fn test_deep_buffer_shrinks_toward_floor() {
        let monitor = monitor();
        let mut tuning = BufferTuningConfig {
            max_buffer_length_secs: 15.0,
            ..Default::default()
        };
        assert!(monitor.sample(&snapshot(0.0, 25.0, false), &mut tuning, true).retuned);
        assert_eq!(tuning.max_buffer_length_secs, 10.0);
        assert!(!monitor.sample(&snapshot(0.0, 25.0, false), &mut tuning, true).retuned);
    }

    #[test]
    fn test_paused_sink_with_buffer_resumes() {
        let monitor = monitor();
        let mut tuning = BufferTuningConfig::default();
        let outcome = monitor.sample(&snapshot(4.0, 8.0, true), &mut tuning, true);
        assert!(outcome.resume);

        let held = monitor.sample(&snapshot(4.0, 8.0, true), &mut tuning, false);
        assert!(!held.resume);

        let thin = monitor.sample(&snapshot(4.0, 6.0, true), &mut tuning, true);
        assert!(!thin.resume);
    }

    #[test]
    fn test_thin_buffer_while_playing_is_stalled() {
        let monitor = monitor();
        let mut tuning = BufferTuningConfig::default();
        let outcome = monitor.sample(&snapshot(9.8, 10.0, false), &mut tuning, true);
        assert!(outcome.stalled);
        assert!(outcome.retuned);
    }
}
