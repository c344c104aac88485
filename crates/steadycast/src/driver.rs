//! Tokio event loop that executes controller effects.
//!
//! The driver owns the controller, the engine, the sink and the timers, and
//! is the only task that touches any of them. Everything else talks to it
//! through a [`PlayerHandle`].

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PlayerConfig;
use crate::controller::{Controller, Effect, Input, Transition, UiCommand};
use crate::descriptor::{ChannelRequest, DescriptorSource, StreamDescriptor};
use crate::engine::{
    AttachRequest, EngineEvent, EngineEvents, PlaybackBackend, SinkCapabilities, StreamingEngine,
};
use crate::error::{PlayerError, Result};
use crate::session::SessionId;
use crate::sink::MediaSink;
use crate::state::{Phase, PlaybackState};
use crate::timer::{TimerFired, TimerRegistry};

/// Capacity of the driver's command mailbox.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 64;

enum DriverMessage {
    Open {
        request: ChannelRequest,
        reply: oneshot::Sender<Result<()>>,
    },
    Start {
        descriptor: StreamDescriptor,
        reply: oneshot::Sender<Result<()>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Command(UiCommand),
}

struct Resolved {
    generation: u64,
    request: ChannelRequest,
    result: Result<StreamDescriptor>,
    reply: oneshot::Sender<Result<()>>,
}

/// What the sink is currently bound to.
struct Attachment {
    session: SessionId,
    backend: PlaybackBackend,
    url: String,
}

pub struct PlayerDriver<E, S> {
    controller: Controller,
    engine: E,
    sink: S,
    timers: TimerRegistry,
    source: Option<Arc<dyn DescriptorSource>>,
    attachment: Option<Attachment>,
    /// Bumped by every open, start and stop; older resolutions are dropped.
    open_generation: u64,
    inbox: mpsc::Receiver<DriverMessage>,
    resolved_tx: mpsc::UnboundedSender<Resolved>,
    resolved_rx: mpsc::UnboundedReceiver<Resolved>,
    engine_tx: mpsc::UnboundedSender<(SessionId, EngineEvent)>,
    engine_rx: mpsc::UnboundedReceiver<(SessionId, EngineEvent)>,
    timer_rx: mpsc::UnboundedReceiver<TimerFired>,
    state_tx: watch::Sender<PlaybackState>,
    phase_tx: watch::Sender<Phase>,
    cancel: CancellationToken,
}

impl<E, S> PlayerDriver<E, S>
where
    E: StreamingEngine,
    S: MediaSink,
{
    pub fn new(config: PlayerConfig, engine: E, sink: S) -> Result<(Self, PlayerHandle)> {
        config.validate()?;

        let capabilities = SinkCapabilities::probe(&engine, &sink);
        debug!(?capabilities, backend = %PlaybackBackend::select(&capabilities), "Probed sink capabilities");
        let controller = Controller::new(config, capabilities);

        let (inbox_tx, inbox) = mpsc::channel(DEFAULT_MAILBOX_CAPACITY);
        let (resolved_tx, resolved_rx) = mpsc::unbounded_channel();
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(controller.view().clone());
        let (phase_tx, phase_rx) = watch::channel(controller.phase());
        let cancel = CancellationToken::new();

        let handle = PlayerHandle {
            tx: inbox_tx,
            state: state_rx,
            phase: phase_rx,
            cancel: cancel.clone(),
        };
        let driver = Self {
            controller,
            engine,
            sink,
            timers: TimerRegistry::new(timer_tx),
            source: None,
            attachment: None,
            open_generation: 0,
            inbox,
            resolved_tx,
            resolved_rx,
            engine_tx,
            engine_rx,
            timer_rx,
            state_tx,
            phase_tx,
            cancel,
        };
        Ok((driver, handle))
    }

    /// Descriptor source used by [`PlayerHandle::open`].
    pub fn with_source(mut self, source: Arc<dyn DescriptorSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Run until shut down or every handle is dropped. Tears down on exit.
    pub async fn run(mut self) {
        info!("Player driver started");
        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!("Player driver cancelled");
                    break;
                }

                msg = self.inbox.recv() => match msg {
                    Some(msg) => self.on_message(msg),
                    None => {
                        debug!("All player handles dropped");
                        break;
                    }
                },

                Some(resolved) = self.resolved_rx.recv() => self.on_resolved(resolved),

                Some((session, event)) = self.engine_rx.recv() => {
                    self.dispatch(Input::Engine { session, event });
                }

                Some(fired) = self.timer_rx.recv() => {
                    if self.timers.fired(&fired) {
                        self.dispatch(Input::Timer(fired.key));
                    }
                }
            }
        }

        let transition = self.controller.stop();
        self.apply(transition);
        self.timers.cancel_all();
        info!("Player driver stopped");
    }

    fn on_message(&mut self, msg: DriverMessage) {
        match msg {
            DriverMessage::Open { request, reply } => self.open(request, reply),
            DriverMessage::Start { descriptor, reply } => {
                self.open_generation += 1;
                let _ = reply.send(self.start(descriptor));
            }
            DriverMessage::Stop { reply } => {
                self.open_generation += 1;
                let transition = self.controller.stop();
                self.apply(transition);
                let _ = reply.send(());
            }
            DriverMessage::Command(command) => self.dispatch(Input::Command(command)),
        }
    }

    fn open(&mut self, request: ChannelRequest, reply: oneshot::Sender<Result<()>>) {
        let Some(source) = self.source.clone() else {
            let _ = reply.send(Err(PlayerError::configuration(
                "no descriptor source configured",
            )));
            return;
        };
        self.open_generation += 1;
        let generation = self.open_generation;
        let tx = self.resolved_tx.clone();
        debug!(channel = %request.channel_id, generation, "Resolving channel");

        // Resolution happens off the loop so commands and timers keep flowing.
        tokio::spawn(async move {
            let result = source.resolve(&request).await;
            let _ = tx.send(Resolved {
                generation,
                request,
                result,
                reply,
            });
        });
    }

    fn on_resolved(&mut self, resolved: Resolved) {
        let Resolved {
            generation,
            request,
            result,
            reply,
        } = resolved;

        if generation != self.open_generation {
            debug!(channel = %request.channel_id, generation, "Dropping superseded resolution");
            let _ = reply.send(Err(PlayerError::Superseded {
                channel: request.channel_id,
            }));
            return;
        }

        let outcome = match result {
            Ok(descriptor) => self.start(descriptor),
            Err(e) => {
                warn!(channel = %request.channel_id, error = %e, "Failed to resolve channel");
                Err(e)
            }
        };
        let _ = reply.send(outcome);
    }

    fn start(&mut self, descriptor: StreamDescriptor) -> Result<()> {
        let transition = self.controller.start(descriptor)?;
        self.apply(transition);
        Ok(())
    }

    fn dispatch(&mut self, input: Input) {
        let snapshot = self.sink.snapshot();
        let transition = self.controller.handle(input, &snapshot);
        self.apply(transition);
    }

    /// Execute effects in order. A rejected play is fed back as an input.
    fn apply(&mut self, mut transition: Transition) {
        loop {
            let mut rejected = None;
            for effect in transition.effects {
                if let Some(rejection) = self.execute(effect) {
                    rejected = Some(rejection);
                }
            }
            self.phase_tx.send_if_modified(|phase| {
                let changed = *phase != transition.phase;
                *phase = transition.phase;
                changed
            });

            let Some((session, reason)) = rejected else {
                break;
            };
            let snapshot = self.sink.snapshot();
            transition = self
                .controller
                .handle(Input::PlayRejected { session, reason }, &snapshot);
        }
    }

    fn execute(&mut self, effect: Effect) -> Option<(SessionId, String)> {
        match effect {
            Effect::Attach {
                session,
                backend,
                url,
                tuning,
            } => {
                let events = EngineEvents::new(session, self.engine_tx.clone());
                match backend {
                    PlaybackBackend::AdaptiveEngine => self.engine.attach(
                        &mut self.sink,
                        AttachRequest {
                            url: url.clone(),
                            tuning,
                        },
                        events,
                    ),
                    PlaybackBackend::NativeDecoder => self.sink.load_native(&url, events),
                    PlaybackBackend::Unsupported => {
                        warn!(session = %session, "Attach requested without a backend");
                    }
                }
                self.attachment = Some(Attachment {
                    session,
                    backend,
                    url,
                });
            }
            Effect::Detach => match self.attachment.take() {
                Some(Attachment {
                    backend: PlaybackBackend::NativeDecoder,
                    ..
                }) => self.sink.release_source(),
                _ => self.engine.detach(),
            },
            Effect::ReleaseSource => self.sink.release_source(),
            Effect::ResumeLoading => self.reload(|engine| engine.resume_loading()),
            Effect::RecoverDecodeFault => self.reload(|engine| engine.recover_decode_fault()),
            Effect::ApplyTuning(tuning) => {
                if self
                    .attachment
                    .as_ref()
                    .is_some_and(|a| a.backend == PlaybackBackend::AdaptiveEngine)
                {
                    self.engine.apply_tuning(&tuning);
                }
            }
            Effect::Play(session) => {
                if let Err(rejected) = self.sink.play() {
                    return Some((session, rejected.reason));
                }
            }
            Effect::Pause => self.sink.pause(),
            Effect::SetVolume { volume, muted } => {
                self.sink.set_volume(f64::from(volume) / 100.0, muted);
            }
            Effect::SetFullscreen(fullscreen) => self.sink.set_fullscreen(fullscreen),
            Effect::Schedule(spec) => self.timers.schedule(spec),
            Effect::Cancel(key) => self.timers.cancel(&key),
            Effect::CancelSession(session) => self.timers.cancel_session(session),
            Effect::CancelAllTimers => self.timers.cancel_all(),
            Effect::Publish(state) => {
                self.state_tx.send_replace(state);
            }
        }
        None
    }

    /// Engine-side recovery, or a fresh native load when the sink plays the
    /// URL on its own.
    fn reload(&mut self, engine_op: impl FnOnce(&mut E)) {
        let Some(attachment) = &self.attachment else {
            return;
        };
        match attachment.backend {
            PlaybackBackend::AdaptiveEngine => engine_op(&mut self.engine),
            PlaybackBackend::NativeDecoder => {
                let events = EngineEvents::new(attachment.session, self.engine_tx.clone());
                self.sink.load_native(&attachment.url, events);
            }
            PlaybackBackend::Unsupported => {}
        }
    }
}

/// Cloneable handle to a running [`PlayerDriver`].
#[derive(Clone)]
pub struct PlayerHandle {
    tx: mpsc::Sender<DriverMessage>,
    state: watch::Receiver<PlaybackState>,
    phase: watch::Receiver<Phase>,
    cancel: CancellationToken,
}

impl PlayerHandle {
    /// Resolve a channel through the configured source and start it.
    pub async fn open(&self, request: ChannelRequest) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(DriverMessage::Open { request, reply }).await?;
        rx.await.map_err(|_| PlayerError::DriverClosed)?
    }

    pub async fn start(&self, descriptor: StreamDescriptor) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(DriverMessage::Start { descriptor, reply })
            .await?;
        rx.await.map_err(|_| PlayerError::DriverClosed)?
    }

    /// Returns once timers are cancelled and the sink is released.
    pub async fn stop(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(DriverMessage::Stop { reply }).await?;
        rx.await.map_err(|_| PlayerError::DriverClosed)
    }

    pub fn toggle_play(&self) -> Result<()> {
        self.command(UiCommand::TogglePlay)
    }

    pub fn set_volume(&self, volume: u8) -> Result<()> {
        self.command(UiCommand::SetVolume(volume))
    }

    pub fn toggle_mute(&self) -> Result<()> {
        self.command(UiCommand::ToggleMute)
    }

    pub fn toggle_fullscreen(&self) -> Result<()> {
        self.command(UiCommand::ToggleFullscreen)
    }

    pub fn reveal_controls(&self) -> Result<()> {
        self.command(UiCommand::RevealControls)
    }

    /// Latest published state.
    pub fn state(&self) -> PlaybackState {
        self.state.borrow().clone()
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.state.clone()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.phase.clone()
    }

    /// Stop the driver. It tears down before exiting.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// UI commands are best effort: a full mailbox drops the command.
    fn command(&self, command: UiCommand) -> Result<()> {
        match self.tx.try_send(DriverMessage::Command(command)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(?command, "Player mailbox full, dropping command");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(PlayerError::DriverClosed),
        }
    }

    async fn send(&self, msg: DriverMessage) -> Result<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| PlayerError::DriverClosed)
    }
}
