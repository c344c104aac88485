//! Buffering parameters handed to the streaming engine.
//!
//! The record is serialized in camelCase so it can be forwarded verbatim to
//! an engine that takes hls.js-style configuration.

use serde::{Deserialize, Serialize};

/// Mutable buffering parameters of a playback session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BufferTuningConfig {
    /// Target forward buffer length in seconds.
    pub max_buffer_length_secs: f64,
    /// Hard upper limit of the forward buffer in seconds.
    pub max_max_buffer_length_secs: f64,
    /// Already-played media kept behind the playhead, in seconds.
    pub back_buffer_length_secs: f64,
    /// Distance from the live edge, in target durations.
    pub live_sync_duration_count: u32,
    /// Maximum tolerated distance from the live edge, in target durations.
    pub live_max_latency_duration_count: u32,
    pub manifest_loading_max_retry: u32,
    pub manifest_loading_timeout_ms: u64,
    pub level_loading_max_retry: u32,
    pub level_loading_timeout_ms: u64,
    pub frag_loading_max_retry: u32,
    pub frag_loading_timeout_ms: u64,
    pub low_latency_mode: bool,
}

impl Default for BufferTuningConfig {
    fn default() -> Self {
        Self {
            max_buffer_length_secs: 30.0,
            max_max_buffer_length_secs: 60.0,
            back_buffer_length_secs: 30.0,
            live_sync_duration_count: 3,
            live_max_latency_duration_count: 10,
            manifest_loading_max_retry: 4,
            manifest_loading_timeout_ms: 10_000,
            level_loading_max_retry: 4,
            level_loading_timeout_ms: 10_000,
            frag_loading_max_retry: 6,
            frag_loading_timeout_ms: 20_000,
            low_latency_mode: false,
        }
    }
}

/// Floor/ceiling for the adaptive target buffer length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningBounds {
    pub floor_secs: f64,
    pub ceiling_secs: f64,
    /// Amount moved per monitor decision.
    pub step_secs: f64,
}

impl Default for TuningBounds {
    fn default() -> Self {
        Self {
            floor_secs: 10.0,
            ceiling_secs: 60.0,
            step_secs: 5.0,
        }
    }
}

impl TuningBounds {
    pub fn clamp(&self, secs: f64) -> f64 {
        secs.clamp(self.floor_secs, self.ceiling_secs)
    }
}

impl BufferTuningConfig {
    /// Raise the target buffer by one step. Returns true if it changed.
    pub fn grow(&mut self, bounds: &TuningBounds) -> bool {
        let target = bounds.clamp(self.max_buffer_length_secs + bounds.step_secs);
        self.set_target(target)
    }

    /// Lower the target buffer by one step. Returns true if it changed.
    pub fn shrink(&mut self, bounds: &TuningBounds) -> bool {
        let target = bounds.clamp(self.max_buffer_length_secs - bounds.step_secs);
        self.set_target(target)
    }

    fn set_target(&mut self, target: f64) -> bool {
        if (target - self.max_buffer_length_secs).abs() < f64::EPSILON {
            return false;
        }
        self.max_buffer_length_secs = target;
        // The hard limit never sits below the target.
        if self.max_max_buffer_length_secs < target {
            self.max_max_buffer_length_secs = target;
        }
        true
    }
}
