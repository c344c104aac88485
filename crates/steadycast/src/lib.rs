//! # steadycast-engine
//!
//! Playback resilience for live adaptive-bitrate streams.
//!
//! The crate attaches a streaming engine to a media sink, classifies and
//! recovers from streaming faults, retunes buffering from periodic buffer
//! health samples and projects a small observable state for a UI.
//!
//! ## Component Overview
//!
//! - [`Controller`]: pure state machine, `handle(input) -> Transition`
//! - [`BufferHealthMonitor`]: sample-driven buffer tuning
//! - [`StreamingEngine`] / [`MediaSink`]: adapter contracts
//! - [`PlayerDriver`] / [`PlayerHandle`]: tokio event loop executing effects
//! - [`DescriptorSource`]: resolves a channel to its stream URLs
//! - [`sim`]: in-process engine and sink doubles
//!
//! ## License
//!
//! MIT License

pub mod config;
pub mod controller;
pub mod descriptor;
pub mod driver;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod retry;
pub mod session;
pub mod sim;
pub mod sink;
pub mod state;
pub mod timer;
pub mod tuning;

pub use config::{ControlsConfig, PlayerConfig};
pub use controller::{Controller, Effect, Input, Transition, UiCommand};
pub use descriptor::{
    ChannelRequest, DescriptorSource, HttpDescriptorSource, StaticDescriptorSource,
    StreamDescriptor,
};
pub use driver::{PlayerDriver, PlayerHandle};
pub use engine::{
    AttachRequest, EngineEvent, EngineEvents, PlaybackBackend, SinkCapabilities, StreamingEngine,
};
pub use error::{FaultClass, PlayerError, Result};
pub use monitor::{BufferHealthMonitor, MonitorConfig, SampleOutcome};
pub use retry::{RetryBudget, RetryConfig};
pub use session::{PlaybackSession, SessionId};
pub use sink::{BufferedRange, MediaSink, PlaybackRejected, SinkSnapshot};
pub use state::{Phase, PlaybackState};
pub use timer::{TimerKey, TimerKind, TimerSpec};
pub use tuning::{BufferTuningConfig, TuningBounds};
