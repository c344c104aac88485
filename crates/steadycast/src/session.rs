//! The live binding between one descriptor and the sink.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::descriptor::StreamDescriptor;
use crate::engine::PlaybackBackend;
use crate::retry::RetryBudget;
use crate::tuning::BufferTuningConfig;

/// Identity of a playback session.
///
/// A fresh id is minted for every attach, including a fail-over, so timers
/// and engine events from an earlier binding never match the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// State owned exclusively by the controller for the active binding.
#[derive(Debug, Clone)]
pub struct PlaybackSession {
    pub id: SessionId,
    pub descriptor: StreamDescriptor,
    pub active_url: String,
    pub using_fallback: bool,
    pub backend: PlaybackBackend,
    pub started_at: DateTime<Utc>,
    pub retry: RetryBudget,
    pub tuning: BufferTuningConfig,
    /// The buffer monitor ticker has been scheduled for this session.
    pub monitor_armed: bool,
    /// Manifest has loaded at least once; used to close out a reconnect.
    pub has_played: bool,
    /// The runtime refused to start playback without a user gesture.
    pub autoplay_blocked: bool,
    /// The user paused playback; only the user resumes it.
    pub user_paused: bool,
    /// Decoder recoveries requested so far, for diagnostics.
    pub media_recoveries: u32,
}

impl PlaybackSession {
    pub fn new(
        id: SessionId,
        descriptor: StreamDescriptor,
        active_url: String,
        using_fallback: bool,
        backend: PlaybackBackend,
        retry: RetryBudget,
        tuning: BufferTuningConfig,
    ) -> Self {
        Self {
            id,
            descriptor,
            active_url,
            using_fallback,
            backend,
            started_at: Utc::now(),
            retry,
            tuning,
            monitor_armed: false,
            has_played: false,
            autoplay_blocked: false,
            user_paused: false,
            media_recoveries: 0,
        }
    }

    /// The URL a fail-over would switch to, if one is still available.
    pub fn fail_over_target(&self) -> Option<&str> {
        if self.using_fallback {
            None
        } else {
            self.descriptor.fallback()
        }
    }

    /// Seconds since the session was created.
    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}
