//! Streaming engine adapter contract.
//!
//! The engine owns manifest loading, segment buffering and the bitrate
//! ladder. The controller only sees it through [`StreamingEngine`] and the
//! events it emits on an [`EngineEvents`] channel.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::FaultClass;
use crate::session::SessionId;
use crate::sink::{HLS_MIME_TYPE, MediaSink};
use crate::tuning::BufferTuningConfig;

/// Events emitted by a streaming engine (or a natively bound sink).
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The manifest was loaded and parsed.
    ManifestReady,
    /// A segment was appended to the sink's buffer.
    SegmentBuffered,
    /// A fault the engine cannot recover from without intervention.
    Fatal { class: FaultClass, detail: String },
}

impl EngineEvent {
    pub fn network(detail: impl Into<String>) -> Self {
        Self::Fatal {
            class: FaultClass::Network,
            detail: detail.into(),
        }
    }

    pub fn media(detail: impl Into<String>) -> Self {
        Self::Fatal {
            class: FaultClass::Media,
            detail: detail.into(),
        }
    }

    pub fn other(detail: impl Into<String>) -> Self {
        Self::Fatal {
            class: FaultClass::Unclassified,
            detail: detail.into(),
        }
    }
}

/// Session-tagged sender handed to an engine at attach time.
///
/// Every event carries the id of the session it was attached for, so events
/// from a detached engine can be recognised and dropped.
#[derive(Debug, Clone)]
pub struct EngineEvents {
    session: SessionId,
    tx: mpsc::UnboundedSender<(SessionId, EngineEvent)>,
}

impl EngineEvents {
    pub fn new(session: SessionId, tx: mpsc::UnboundedSender<(SessionId, EngineEvent)>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Queue an event. Silently dropped once the driver is gone.
    pub fn emit(&self, event: EngineEvent) {
        trace!(session = %self.session, ?event, "Engine event");
        let _ = self.tx.send((self.session, event));
    }
}

/// Parameters of a single attach.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachRequest {
    pub url: String,
    pub tuning: BufferTuningConfig,
}

/// The adaptive streaming capability.
///
/// None of these calls report errors directly: faults arrive asynchronously
/// as [`EngineEvent::Fatal`].
pub trait StreamingEngine {
    /// Whether the adaptive engine can run in this environment.
    fn is_supported(&self) -> bool;

    fn attach(&mut self, sink: &mut dyn MediaSink, request: AttachRequest, events: EngineEvents);

    /// Must be safe to call even if `attach` never completed.
    fn detach(&mut self);

    /// Restart loading after a network fault without dropping buffered data.
    fn resume_loading(&mut self);

    /// Attempt decoder recovery without refetching the manifest.
    fn recover_decode_fault(&mut self);

    fn apply_tuning(&mut self, tuning: &BufferTuningConfig);
}

/// What the runtime can do, probed once per driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SinkCapabilities {
    pub adaptive_engine: bool,
    pub native_hls: bool,
}

impl SinkCapabilities {
    pub fn probe<E: StreamingEngine + ?Sized, S: MediaSink + ?Sized>(engine: &E, sink: &S) -> Self {
        Self {
            adaptive_engine: engine.is_supported(),
            native_hls: sink.can_play_natively(HLS_MIME_TYPE),
        }
    }
}

/// How a session is bound to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackBackend {
    /// The adaptive streaming engine drives the sink.
    AdaptiveEngine,
    /// The sink plays the URL on its own.
    NativeDecoder,
    /// Neither is available.
    Unsupported,
}

impl PlaybackBackend {
    /// Prefer the adaptive engine, then native playback.
    pub fn select(capabilities: &SinkCapabilities) -> Self {
        if capabilities.adaptive_engine {
            Self::AdaptiveEngine
        } else if capabilities.native_hls {
            Self::NativeDecoder
        } else {
            Self::Unsupported
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdaptiveEngine => "adaptive_engine",
            Self::NativeDecoder => "native_decoder",
            Self::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for PlaybackBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
