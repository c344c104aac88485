//! Playback resilience state machine.
//!
//! [`Controller`] never touches the engine, the sink or a clock. Every input
//! returns a [`Transition`]: the resulting phase and the ordered list of
//! [`Effect`]s the caller must perform. The async driver in
//! [`crate::driver`] is the production executor; tests read the effects
//! directly.

use tracing::{debug, error, info, trace, warn};

use crate::config::PlayerConfig;
use crate::descriptor::StreamDescriptor;
use crate::engine::{EngineEvent, PlaybackBackend, SinkCapabilities};
use crate::error::{FaultClass, PlayerError, Result};
use crate::monitor::BufferHealthMonitor;
use crate::retry::RetryBudget;
use crate::session::{PlaybackSession, SessionId};
use crate::sink::SinkSnapshot;
use crate::state::{Phase, PlaybackState, format_elapsed};
use crate::timer::{TimerKey, TimerKind, TimerSpec};
use crate::tuning::BufferTuningConfig;

/// Transport commands issued by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiCommand {
    TogglePlay,
    /// 0..=100; larger values are clamped.
    SetVolume(u8),
    ToggleMute,
    ToggleFullscreen,
    /// Pointer activity over the player.
    RevealControls,
}

/// Something that happened outside the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Engine {
        session: SessionId,
        event: EngineEvent,
    },
    Timer(TimerKey),
    /// The sink refused a [`Effect::Play`] issued for `session`.
    PlayRejected { session: SessionId, reason: String },
    Command(UiCommand),
}

/// A side effect requested by the controller, executed in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Bind `url` to the sink through `backend`, tagging events with `session`.
    Attach {
        session: SessionId,
        backend: PlaybackBackend,
        url: String,
        tuning: BufferTuningConfig,
    },
    Detach,
    ReleaseSource,
    ResumeLoading,
    RecoverDecodeFault,
    ApplyTuning(BufferTuningConfig),
    Play(SessionId),
    Pause,
    SetVolume { volume: u8, muted: bool },
    SetFullscreen(bool),
    Schedule(TimerSpec),
    Cancel(TimerKey),
    CancelSession(SessionId),
    CancelAllTimers,
    Publish(PlaybackState),
}

/// Outcome of feeding one input to the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub phase: Phase,
    pub effects: Vec<Effect>,
}

impl Transition {
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// The state published by this transition, if any.
    pub fn published(&self) -> Option<&PlaybackState> {
        self.effects.iter().rev().find_map(|effect| match effect {
            Effect::Publish(state) => Some(state),
            _ => None,
        })
    }
}

pub struct Controller {
    config: PlayerConfig,
    capabilities: SinkCapabilities,
    monitor: BufferHealthMonitor,
    phase: Phase,
    session: Option<PlaybackSession>,
    next_session_id: u64,
    /// Generation of the controls auto-hide timer.
    controls_epoch: u64,
    view: PlaybackState,
    last_published: Option<(Phase, PlaybackState)>,
    /// Volume restored when unmuting from zero.
    last_audible_volume: u8,
}

impl Controller {
    pub fn new(config: PlayerConfig, capabilities: SinkCapabilities) -> Self {
        let monitor = BufferHealthMonitor::new(config.monitor.clone(), config.bounds.clone());
        let view = PlaybackState::new(config.controls.initial_volume);
        let last_audible_volume = match view.volume {
            0 => 100,
            v => v,
        };
        Self {
            config,
            capabilities,
            monitor,
            phase: Phase::Idle,
            session: None,
            next_session_id: 1,
            controls_epoch: 0,
            view,
            last_published: None,
            last_audible_volume,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn session(&self) -> Option<&PlaybackSession> {
        self.session.as_ref()
    }

    pub fn view(&self) -> &PlaybackState {
        &self.view
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Begin playback of `descriptor`, tearing down any current session.
    ///
    /// An invalid descriptor is rejected without touching the current state.
    pub fn start(&mut self, descriptor: StreamDescriptor) -> Result<Transition> {
        descriptor.validate()?;

        // An empty primary means the fallback is the only source left.
        let (url, using_fallback) = match (descriptor.primary(), descriptor.fallback()) {
            (Some(primary), _) => (primary.to_string(), false),
            (None, Some(fallback)) => (fallback.to_string(), true),
            (None, None) => {
                return Err(PlayerError::invalid_descriptor(
                    &descriptor.channel_id,
                    "no playable URL",
                ));
            }
        };

        let mut fx = Vec::new();
        if let Some(previous) = self.session.take() {
            debug!(session = %previous.id, "Tearing down previous session");
            fx.push(Effect::CancelSession(previous.id));
            fx.push(Effect::Detach);
            fx.push(Effect::ReleaseSource);
        }

        self.view.is_playing = false;
        self.view.elapsed_time = format_elapsed(0.0);
        info!(
            channel = %descriptor.channel_id,
            url = %url,
            using_fallback,
            "Starting playback"
        );
        self.bind(descriptor, url, using_fallback, &mut fx);
        self.reveal_controls(&mut fx);

        Ok(self.finish(fx))
    }

    /// Tear everything down and return to `Idle`. Idempotent.
    pub fn stop(&mut self) -> Transition {
        if self.phase == Phase::Idle && self.session.is_none() {
            return Transition {
                phase: self.phase,
                effects: Vec::new(),
            };
        }

        if let Some(session) = self.session.take() {
            info!(session = %session.id, uptime_secs = session.uptime_secs(), "Stopping playback");
        }
        let mut fx = vec![
            Effect::CancelAllTimers,
            Effect::Detach,
            Effect::ReleaseSource,
        ];
        // Any hide timer still in flight belongs to an older epoch now.
        self.controls_epoch += 1;
        self.phase = Phase::Idle;
        self.view.is_playing = false;
        self.view.show_controls = false;
        self.publish_if_changed(&mut fx);
        Transition {
            phase: self.phase,
            effects: fx,
        }
    }

    /// Feed one input. `snapshot` is the sink as of now.
    pub fn handle(&mut self, input: Input, snapshot: &SinkSnapshot) -> Transition {
        let mut fx = Vec::new();
        match input {
            Input::Engine { session, event } => {
                if self.is_current(session) {
                    self.on_engine_event(event, &mut fx);
                } else {
                    debug!(session = %session, ?event, "Dropping event from stale session");
                }
            }
            Input::Timer(key) => self.on_timer(key, snapshot, &mut fx),
            Input::PlayRejected { session, reason } => {
                if let Some(current) = self.session.as_mut().filter(|s| s.id == session) {
                    warn!(session = %session, %reason, "Play request rejected by the sink");
                    current.autoplay_blocked = true;
                    self.view.is_playing = false;
                }
            }
            Input::Command(command) => self.on_command(command, &mut fx),
        }
        self.finish(fx)
    }

    fn is_current(&self, session: SessionId) -> bool {
        self.session.as_ref().is_some_and(|s| s.id == session)
    }

    fn mint_session_id(&mut self) -> SessionId {
        let id = SessionId::new(self.next_session_id);
        self.next_session_id += 1;
        id
    }

    /// Create a session for `url` and attach it.
    fn bind(
        &mut self,
        descriptor: StreamDescriptor,
        url: String,
        using_fallback: bool,
        fx: &mut Vec<Effect>,
    ) {
        let id = self.mint_session_id();
        let backend = PlaybackBackend::select(&self.capabilities);
        let session = PlaybackSession::new(
            id,
            descriptor,
            url.clone(),
            using_fallback,
            backend,
            RetryBudget::new(&self.config.retry),
            self.config.tuning.clone(),
        );
        self.session = Some(session);

        if backend == PlaybackBackend::Unsupported {
            warn!(session = %id, url = %url, "No playback backend available for this sink");
            self.fail_over(fx);
            return;
        }

        info!(session = %id, url = %url, %backend, using_fallback, "Attaching stream");
        self.phase = Phase::Attaching;
        fx.push(Effect::Attach {
            session: id,
            backend,
            url,
            tuning: self.config.tuning.clone(),
        });
        fx.push(Effect::Schedule(TimerSpec::repeating(
            TimerKey::session(TimerKind::ElapsedTick, id),
            self.config.controls.elapsed_tick(),
        )));
    }

    /// Drop the current session and move to the fallback, or give up.
    fn fail_over(&mut self, fx: &mut Vec<Effect>) {
        let Some(session) = self.session.take() else {
            return;
        };
        self.phase = Phase::FailingOver;
        fx.push(Effect::CancelSession(session.id));
        fx.push(Effect::Detach);
        self.view.is_playing = false;

        match session.fail_over_target() {
            Some(fallback) => {
                let fallback = fallback.to_string();
                warn!(
                    session = %session.id,
                    from = %session.active_url,
                    to = %fallback,
                    "Failing over to fallback source"
                );
                self.bind(session.descriptor, fallback, true, fx);
            }
            None => {
                error!(
                    session = %session.id,
                    channel = %session.descriptor.channel_id,
                    url = %session.active_url,
                    "No source left to play, giving up"
                );
                fx.push(Effect::ReleaseSource);
                self.phase = Phase::FatalError;
            }
        }
    }

    fn on_engine_event(&mut self, event: EngineEvent, fx: &mut Vec<Effect>) {
        match event {
            EngineEvent::ManifestReady => self.on_manifest_ready(fx),
            EngineEvent::SegmentBuffered => self.on_segment_buffered(fx),
            EngineEvent::Fatal { class, detail } => match class {
                FaultClass::Network => self.on_network_fault(&detail, fx),
                FaultClass::Media => {
                    if let Some(session) = self.session.as_mut() {
                        session.media_recoveries += 1;
                        warn!(
                            session = %session.id,
                            recoveries = session.media_recoveries,
                            %detail,
                            "Media fault, recovering decoder"
                        );
                        fx.push(Effect::RecoverDecodeFault);
                    }
                }
                FaultClass::Unclassified => {
                    warn!(%detail, phase = %self.phase, "Unclassified fault");
                    self.fail_over(fx);
                }
            },
        }
    }

    fn on_manifest_ready(&mut self, fx: &mut Vec<Effect>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.retry.reset();

        match self.phase {
            Phase::Attaching | Phase::Loading | Phase::Reconnecting => {
                info!(session = %session.id, url = %session.active_url, "Manifest ready, starting playback");
                if self.phase == Phase::Reconnecting {
                    fx.push(Effect::Cancel(TimerKey::session(
                        TimerKind::Reconnect,
                        session.id,
                    )));
                }
                session.has_played = true;
                if session.user_paused {
                    self.phase = Phase::Paused;
                    self.view.is_playing = false;
                } else {
                    self.phase = Phase::Playing;
                    self.view.is_playing = true;
                    fx.push(Effect::Play(session.id));
                }
                if !session.monitor_armed {
                    session.monitor_armed = true;
                    fx.push(Effect::Schedule(TimerSpec::repeating(
                        TimerKey::session(TimerKind::BufferSample, session.id),
                        self.config.monitor.sample_interval(),
                    )));
                }
            }
            _ => trace!(session = %session.id, phase = %self.phase, "Manifest reloaded"),
        }
    }

    fn on_segment_buffered(&mut self, fx: &mut Vec<Effect>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match self.phase {
            Phase::Loading if session.has_played => {
                debug!(
                    session = %session.id,
                    attempts = session.retry.attempts(),
                    "Loading resumed after reconnect"
                );
                // The reconnect resolved; later faults start a fresh budget.
                session.retry.reset();
                if session.user_paused {
                    self.phase = Phase::Paused;
                    self.view.is_playing = false;
                } else {
                    self.phase = Phase::Playing;
                    self.view.is_playing = !session.autoplay_blocked;
                }
            }
            Phase::Buffering
                if !session.autoplay_blocked && !session.user_paused && !self.view.is_playing =>
            {
                fx.push(Effect::Play(session.id));
                self.view.is_playing = true;
            }
            _ => {}
        }
    }

    fn on_network_fault(&mut self, detail: &str, fx: &mut Vec<Effect>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match session.retry.try_consume() {
            Some(delay) => {
                warn!(
                    session = %session.id,
                    attempt = session.retry.attempts(),
                    max_attempts = session.retry.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    url = %session.active_url,
                    %detail,
                    "Network fault, scheduling reconnect"
                );
                // Same key as any pending reconnect, so it is replaced.
                fx.push(Effect::Schedule(TimerSpec::once(
                    TimerKey::session(TimerKind::Reconnect, session.id),
                    delay,
                )));
                self.phase = Phase::Reconnecting;
            }
            None => {
                warn!(
                    session = %session.id,
                    attempts = session.retry.attempts(),
                    %detail,
                    "Reconnect budget exhausted"
                );
                self.fail_over(fx);
            }
        }
    }

    fn on_timer(&mut self, key: TimerKey, snapshot: &SinkSnapshot, fx: &mut Vec<Effect>) {
        if key.kind == TimerKind::HideControls {
            if key.generation == self.controls_epoch {
                self.view.show_controls = false;
            }
            return;
        }

        let Some(session) = self.session.as_mut().filter(|s| key.belongs_to(s.id)) else {
            trace!(?key, "Ignoring stale timer");
            return;
        };

        match key.kind {
            TimerKind::Reconnect => {
                if self.phase == Phase::Reconnecting {
                    debug!(session = %session.id, attempt = session.retry.attempts(), "Resuming loading");
                    self.phase = Phase::Loading;
                    fx.push(Effect::ResumeLoading);
                }
            }
            TimerKind::BufferSample => {
                if !self.phase.is_monitored() {
                    return;
                }
                let may_resume =
                    self.phase != Phase::Paused && !session.user_paused && !session.autoplay_blocked;
                let outcome = self.monitor.sample(snapshot, &mut session.tuning, may_resume);
                if outcome.retuned {
                    fx.push(Effect::ApplyTuning(session.tuning.clone()));
                }
                if outcome.resume {
                    debug!(session = %session.id, health = outcome.health, "Buffer refilled, resuming playback");
                    fx.push(Effect::Play(session.id));
                    self.view.is_playing = true;
                }

                let stall = self.monitor.config().stall_threshold_secs;
                match self.phase {
                    Phase::Playing if outcome.stalled => {
                        debug!(session = %session.id, health = outcome.health, "Buffer stalled");
                        self.phase = Phase::Buffering;
                    }
                    Phase::Buffering if outcome.health >= stall => {
                        self.phase = Phase::Playing;
                    }
                    _ => {}
                }
            }
            TimerKind::ElapsedTick => {
                self.view.elapsed_time = format_elapsed(snapshot.position);
            }
            TimerKind::HideControls => {}
        }
    }

    fn on_command(&mut self, command: UiCommand, fx: &mut Vec<Effect>) {
        match command {
            UiCommand::TogglePlay => self.toggle_play(fx),
            UiCommand::SetVolume(volume) => {
                let volume = volume.min(100);
                self.view.volume = volume;
                self.view.is_muted = volume == 0;
                if volume > 0 {
                    self.last_audible_volume = volume;
                }
                fx.push(Effect::SetVolume {
                    volume,
                    muted: self.view.is_muted,
                });
            }
            UiCommand::ToggleMute => {
                if self.view.is_muted {
                    if self.view.volume == 0 {
                        self.view.volume = self.last_audible_volume;
                    }
                    self.view.is_muted = false;
                } else {
                    self.view.is_muted = true;
                }
                fx.push(Effect::SetVolume {
                    volume: self.view.volume,
                    muted: self.view.is_muted,
                });
            }
            UiCommand::ToggleFullscreen => {
                self.view.is_fullscreen = !self.view.is_fullscreen;
                fx.push(Effect::SetFullscreen(self.view.is_fullscreen));
            }
            UiCommand::RevealControls => {}
        }
        self.reveal_controls(fx);
    }

    fn toggle_play(&mut self, fx: &mut Vec<Effect>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match self.phase {
            Phase::Playing | Phase::Buffering
                if self.view.is_playing && !session.autoplay_blocked =>
            {
                fx.push(Effect::Pause);
                session.user_paused = true;
                self.phase = Phase::Paused;
                self.view.is_playing = false;
            }
            Phase::Playing | Phase::Buffering => {
                session.autoplay_blocked = false;
                session.user_paused = false;
                fx.push(Effect::Play(session.id));
                self.view.is_playing = true;
            }
            Phase::Paused => {
                session.autoplay_blocked = false;
                session.user_paused = false;
                fx.push(Effect::Play(session.id));
                self.phase = Phase::Playing;
                self.view.is_playing = true;
            }
            _ => trace!(phase = %self.phase, "Toggle play ignored"),
        }
    }

    fn reveal_controls(&mut self, fx: &mut Vec<Effect>) {
        self.controls_epoch += 1;
        self.view.show_controls = true;
        fx.push(Effect::Schedule(TimerSpec::once(
            TimerKey::controls(self.controls_epoch),
            self.config.controls.hide_after(),
        )));
    }

    fn finish(&mut self, mut fx: Vec<Effect>) -> Transition {
        self.publish_if_changed(&mut fx);
        Transition {
            phase: self.phase,
            effects: fx,
        }
    }

    fn publish_if_changed(&mut self, fx: &mut Vec<Effect>) {
        self.view.is_loading = matches!(
            self.phase,
            Phase::Attaching
                | Phase::Loading
                | Phase::Buffering
                | Phase::Reconnecting
                | Phase::FailingOver
        );
        self.view.has_error = self.phase == Phase::FatalError;

        let unchanged = self
            .last_published
            .as_ref()
            .is_some_and(|(phase, view)| *phase == self.phase && *view == self.view);
        if unchanged {
            return;
        }
        self.last_published = Some((self.phase, self.view.clone()));
        fx.push(Effect::Publish(self.view.clone()));
    }
}
