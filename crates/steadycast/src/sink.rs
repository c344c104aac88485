//! Media sink contract: the playable surface that receives decoded frames.

use crate::engine::EngineEvents;

/// MIME type probed to decide whether the sink can play HLS on its own.
pub const HLS_MIME_TYPE: &str = "application/vnd.apple.mpegurl";

/// A contiguous buffered time range, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferedRange {
    pub start: f64,
    pub end: f64,
}

impl BufferedRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }
}

/// Point-in-time reading of the sink.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SinkSnapshot {
    /// Current playback position in seconds.
    pub position: f64,
    pub buffered: Vec<BufferedRange>,
    pub paused: bool,
}

impl SinkSnapshot {
    /// Seconds of downloaded media ahead of the playhead.
    pub fn buffer_health(&self) -> f64 {
        let edge = self
            .buffered
            .iter()
            .map(|range| range.end)
            .fold(f64::NEG_INFINITY, f64::max);
        if edge.is_finite() {
            (edge - self.position).max(0.0)
        } else {
            0.0
        }
    }
}

/// A play request refused by the runtime (autoplay policy and the like).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("play request rejected: {reason}")]
pub struct PlaybackRejected {
    pub reason: String,
}

impl PlaybackRejected {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// The media element the controller drives.
///
/// Only the driver calls into the sink; UI commands reach it through the
/// controller so the projected state stays consistent.
pub trait MediaSink {
    /// Whether the sink can decode the given container type natively.
    fn can_play_natively(&self, mime: &str) -> bool;

    /// Bind a URL directly to the sink, bypassing the adaptive engine.
    ///
    /// Lifecycle and error notifications are reported through `events`.
    fn load_native(&mut self, url: &str, events: EngineEvents);

    /// Drop whatever source is currently bound.
    fn release_source(&mut self);

    fn play(&mut self) -> Result<(), PlaybackRejected>;

    fn pause(&mut self);

    /// `level` is linear in `0.0..=1.0`.
    fn set_volume(&mut self, level: f64, muted: bool);

    fn set_fullscreen(&mut self, fullscreen: bool);

    fn snapshot(&self) -> SinkSnapshot;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_health_uses_latest_edge() {
        let snapshot = SinkSnapshot {
            position: 12.0,
            buffered: vec![BufferedRange::new(0.0, 8.0), BufferedRange::new(10.0, 15.5)],
            paused: false,
        };
        assert_eq!(snapshot.buffer_health(), 3.5);
    }

    #[test]
    fn test_buffer_health_never_negative() {
        let snapshot = SinkSnapshot {
            position: 20.0,
            buffered: vec![BufferedRange::new(0.0, 18.0)],
            paused: false,
        };
        assert_eq!(snapshot.buffer_health(), 0.0);
        assert_eq!(SinkSnapshot::default().buffer_health(), 0.0);
    }
}
