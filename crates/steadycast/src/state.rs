//! Controller phases and the read-only state projected to the UI.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Phase of the resilience state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Attaching,
    Loading,
    Playing,
    Buffering,
    /// User-requested pause. Never entered because of a fault.
    Paused,
    Reconnecting,
    FailingOver,
    FatalError,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Attaching => "attaching",
            Self::Loading => "loading",
            Self::Playing => "playing",
            Self::Buffering => "buffering",
            Self::Paused => "paused",
            Self::Reconnecting => "reconnecting",
            Self::FailingOver => "failing_over",
            Self::FatalError => "fatal_error",
        }
    }

    /// Phases in which the buffer monitor samples.
    pub fn is_monitored(&self) -> bool {
        matches!(self, Self::Playing | Self::Buffering | Self::Paused)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What presentation components render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    pub is_loading: bool,
    pub is_playing: bool,
    pub has_error: bool,
    pub is_muted: bool,
    /// 0..=100
    pub volume: u8,
    pub show_controls: bool,
    pub is_fullscreen: bool,
    pub elapsed_time: String,
}

impl PlaybackState {
    pub fn new(volume: u8) -> Self {
        let volume = volume.min(100);
        Self {
            is_loading: false,
            is_playing: false,
            has_error: false,
            is_muted: volume == 0,
            volume,
            show_controls: false,
            is_fullscreen: false,
            elapsed_time: format_elapsed(0.0),
        }
    }
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Format a playback position as `MM:SS`, or `H:MM:SS` from one hour on.
pub fn format_elapsed(secs: f64) -> String {
    let total = if secs.is_finite() && secs > 0.0 {
        secs.floor() as u64
    } else {
        0
    };
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}
