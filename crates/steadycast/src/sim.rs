//! In-process engine and sink doubles.
//!
//! Both keep their state behind an `Arc<Mutex<_>>` so a test or the CLI can
//! inspect and steer them while a driver owns the trait objects.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::engine::{AttachRequest, EngineEvent, EngineEvents, StreamingEngine};
use crate::sink::{BufferedRange, HLS_MIME_TYPE, MediaSink, PlaybackRejected, SinkSnapshot};
use crate::tuning::BufferTuningConfig;

/// A call received by [`ScriptedEngine`].
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Attach { url: String, tuning: BufferTuningConfig },
    Detach,
    ResumeLoading,
    RecoverDecodeFault,
    ApplyTuning(BufferTuningConfig),
}

#[derive(Default)]
struct EngineShared {
    calls: Vec<EngineCall>,
    events: Option<EngineEvents>,
}

/// Streaming engine that records calls and emits only what it is told to.
pub struct ScriptedEngine {
    shared: Arc<Mutex<EngineShared>>,
    supported: bool,
    auto_manifest: bool,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(EngineShared::default())),
            supported: true,
            auto_manifest: false,
        }
    }

    pub fn with_supported(mut self, supported: bool) -> Self {
        self.supported = supported;
        self
    }

    /// Report `ManifestReady` on attach and `SegmentBuffered` on resume.
    pub fn with_auto_manifest(mut self, auto: bool) -> Self {
        self.auto_manifest = auto;
        self
    }

    pub fn remote(&self) -> EngineRemote {
        EngineRemote {
            shared: Arc::clone(&self.shared),
        }
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(events) = &self.shared.lock().events {
            events.emit(event);
        }
    }
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingEngine for ScriptedEngine {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn attach(&mut self, _sink: &mut dyn MediaSink, request: AttachRequest, events: EngineEvents) {
        {
            let mut shared = self.shared.lock();
            shared.calls.push(EngineCall::Attach {
                url: request.url,
                tuning: request.tuning,
            });
            shared.events = Some(events);
        }
        if self.auto_manifest {
            self.emit(EngineEvent::ManifestReady);
        }
    }

    fn detach(&mut self) {
        let mut shared = self.shared.lock();
        shared.calls.push(EngineCall::Detach);
        shared.events = None;
    }

    fn resume_loading(&mut self) {
        self.shared.lock().calls.push(EngineCall::ResumeLoading);
        if self.auto_manifest {
            self.emit(EngineEvent::SegmentBuffered);
        }
    }

    fn recover_decode_fault(&mut self) {
        self.shared.lock().calls.push(EngineCall::RecoverDecodeFault);
    }

    fn apply_tuning(&mut self, tuning: &BufferTuningConfig) {
        self.shared
            .lock()
            .calls
            .push(EngineCall::ApplyTuning(tuning.clone()));
    }
}

/// Shared view of a [`ScriptedEngine`].
#[derive(Clone)]
pub struct EngineRemote {
    shared: Arc<Mutex<EngineShared>>,
}

impl EngineRemote {
    /// Emit an event for the currently attached session.
    ///
    /// Returns false when nothing is attached.
    pub fn emit(&self, event: EngineEvent) -> bool {
        match &self.shared.lock().events {
            Some(events) => {
                events.emit(event);
                true
            }
            None => false,
        }
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.shared.lock().calls.clone()
    }

    /// URLs passed to every attach so far, in order.
    pub fn attached_urls(&self) -> Vec<String> {
        self.shared
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                EngineCall::Attach { url, .. } => Some(url.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, matches: impl Fn(&EngineCall) -> bool) -> usize {
        self.shared.lock().calls.iter().filter(|c| matches(c)).count()
    }

    pub fn clear_calls(&self) {
        self.shared.lock().calls.clear();
    }
}

#[derive(Debug)]
struct SinkState {
    position: f64,
    buffered_end: f64,
    paused: bool,
    volume: f64,
    muted: bool,
    fullscreen: bool,
    source: Option<String>,
    native_hls: bool,
    reject_next_play: bool,
    play_requests: u32,
    events: Option<EngineEvents>,
}

impl Default for SinkState {
    fn default() -> Self {
        Self {
            position: 0.0,
            buffered_end: 0.0,
            paused: true,
            volume: 1.0,
            muted: false,
            fullscreen: false,
            source: None,
            native_hls: false,
            reject_next_play: false,
            play_requests: 0,
            events: None,
        }
    }
}

/// Virtual media element. Clones share the same element.
#[derive(Debug, Clone, Default)]
pub struct VirtualSink {
    state: Arc<Mutex<SinkState>>,
}

impl VirtualSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advertise native HLS playback.
    pub fn with_native_hls(self, native: bool) -> Self {
        self.state.lock().native_hls = native;
        self
    }

    /// Refuse the next play request, as a browser does before any gesture.
    pub fn with_autoplay_blocked(self) -> Self {
        self.state.lock().reject_next_play = true;
        self
    }

    /// Append `secs` of media to the buffer.
    pub fn feed(&self, secs: f64) {
        self.state.lock().buffered_end += secs;
    }

    /// Let `secs` of wall time pass. Playback stops at the buffered edge.
    pub fn advance(&self, secs: f64) {
        let mut state = self.state.lock();
        if !state.paused {
            state.position = (state.position + secs).min(state.buffered_end.max(state.position));
        }
    }

    /// Pause from the runtime side, e.g. a stalled decoder.
    pub fn interrupt(&self) {
        self.state.lock().paused = true;
    }

    /// Emit an event for a natively bound source.
    pub fn emit(&self, event: EngineEvent) -> bool {
        match &self.state.lock().events {
            Some(events) => {
                events.emit(event);
                true
            }
            None => false,
        }
    }

    pub fn source(&self) -> Option<String> {
        self.state.lock().source.clone()
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    pub fn volume(&self) -> (f64, bool) {
        let state = self.state.lock();
        (state.volume, state.muted)
    }

    pub fn is_fullscreen(&self) -> bool {
        self.state.lock().fullscreen
    }

    pub fn play_requests(&self) -> u32 {
        self.state.lock().play_requests
    }
}

impl MediaSink for VirtualSink {
    fn can_play_natively(&self, mime: &str) -> bool {
        mime == HLS_MIME_TYPE && self.state.lock().native_hls
    }

    fn load_native(&mut self, url: &str, events: EngineEvents) {
        {
            let mut state = self.state.lock();
            state.source = Some(url.to_string());
            state.events = Some(events.clone());
        }
        events.emit(EngineEvent::ManifestReady);
    }

    fn release_source(&mut self) {
        let mut state = self.state.lock();
        state.source = None;
        state.events = None;
        state.position = 0.0;
        state.buffered_end = 0.0;
        state.paused = true;
    }

    fn play(&mut self) -> Result<(), PlaybackRejected> {
        let mut state = self.state.lock();
        state.play_requests += 1;
        if state.reject_next_play {
            state.reject_next_play = false;
            return Err(PlaybackRejected::new("play() requires a user gesture"));
        }
        state.paused = false;
        Ok(())
    }

    fn pause(&mut self) {
        self.state.lock().paused = true;
    }

    fn set_volume(&mut self, level: f64, muted: bool) {
        let mut state = self.state.lock();
        state.volume = level.clamp(0.0, 1.0);
        state.muted = muted;
    }

    fn set_fullscreen(&mut self, fullscreen: bool) {
        self.state.lock().fullscreen = fullscreen;
    }

    fn snapshot(&self) -> SinkSnapshot {
        let state = self.state.lock();
        let buffered = if state.buffered_end > 0.0 {
            vec![BufferedRange::new(0.0, state.buffered_end)]
        } else {
            Vec::new()
        };
        SinkSnapshot {
            position: state.position,
            buffered,
            paused: state.paused,
        }
    }
}
