//! Wall-clock pump for the simulated engine and sink.
//!
//! Every tick the sink's playhead advances by the tick length and, while the
//! stream is flowing, the engine appends slightly more media than is played.
//! Scripted faults are injected when their offset is reached.

use std::io::{self, Write};
use std::time::Duration;

use serde::Serialize;
use steadycast_engine::sim::{EngineRemote, VirtualSink};
use steadycast_engine::{Phase, PlaybackState, PlayerHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::script::{FaultScript, ScriptedFault};

pub const TICK: Duration = Duration::from_millis(100);

/// Media appended per second of wall time while segments flow.
pub const FEED_RATE: f64 = 1.1;

/// Media buffered before the first sample, so playback starts healthy.
pub const INITIAL_BUFFER_SECS: f64 = 4.0;

/// Whether the engine is delivering segments in this phase.
pub fn is_flowing(phase: Phase) -> bool {
    matches!(phase, Phase::Playing | Phase::Buffering | Phase::Paused)
}

/// One published state, as printed on stdout.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusLine<'a> {
    pub t: f64,
    pub phase: Phase,
    #[serde(flatten)]
    pub state: &'a PlaybackState,
}

pub struct Simulation {
    handle: PlayerHandle,
    engine: EngineRemote,
    sink: VirtualSink,
    script: FaultScript,
    duration: Duration,
}

impl Simulation {
    pub fn new(
        handle: PlayerHandle,
        engine: EngineRemote,
        sink: VirtualSink,
        script: FaultScript,
        duration: Duration,
    ) -> Self {
        Self {
            handle,
            engine,
            sink,
            script,
            duration,
        }
    }

    /// Runs until the duration elapses, the player gives up or `token` fires.
    pub async fn run(self, token: CancellationToken) {
        let started = Instant::now();
        let mut interval = tokio::time::interval(TICK);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut pending = self.script.faults().iter().peekable();
        let mut primed = false;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {}
            }

            let elapsed = started.elapsed();
            if elapsed >= self.duration {
                info!("Simulation finished after {:.1}s", elapsed.as_secs_f64());
                break;
            }

            while let Some(fault) = pending.next_if(|f| f.at <= elapsed) {
                self.inject(fault);
            }

            let phase = self.handle.phase();
            if phase == Phase::FatalError {
                warn!("Player gave up on both sources");
                break;
            }
            if is_flowing(phase) {
                if !primed {
                    self.sink.feed(INITIAL_BUFFER_SECS);
                    primed = true;
                }
                self.sink.feed(TICK.as_secs_f64() * FEED_RATE);
            } else if phase == Phase::Idle {
                primed = false;
            }
            self.sink.advance(TICK.as_secs_f64());
        }
    }

    fn inject(&self, fault: &ScriptedFault) {
        info!(
            "Injecting {:?} fault at {:.1}s",
            fault.kind,
            fault.at.as_secs_f64()
        );
        match fault.kind.event(fault.at) {
            Some(event) => {
                // The native decoder reports through the sink.
                if !self.engine.emit(event.clone()) && !self.sink.emit(event) {
                    debug!("No source attached, fault dropped");
                }
            }
            None => self.sink.interrupt(),
        }
    }
}

/// Prints every published state as a JSON line until `token` fires.
///
/// In raw terminal mode lines need an explicit carriage return.
pub async fn print_states(handle: PlayerHandle, token: CancellationToken, raw: bool) {
    let started = Instant::now();
    let mut states = handle.subscribe();
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        let state = states.borrow_and_update().clone();
        let line = StatusLine {
            t: started.elapsed().as_secs_f64(),
            phase: handle.phase(),
            state: &state,
        };
        match serde_json::to_string(&line) {
            Ok(json) => {
                let mut stdout = io::stdout().lock();
                let ending = if raw { "\r\n" } else { "\n" };
                if write!(stdout, "{json}{ending}")
                    .and_then(|_| stdout.flush())
                    .is_err()
                {
                    break;
                }
            }
            Err(e) => warn!("Failed to serialize state: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use steadycast_engine::sim::ScriptedEngine;
    use steadycast_engine::{PlayerConfig, PlayerDriver, StreamDescriptor};

    use super::*;

    #[test]
    fn test_status_line_is_flat() {
        let state = PlaybackState::new(80);
        let line = StatusLine {
            t: 1.5,
            phase: Phase::Reconnecting,
            state: &state,
        };
        let json = serde_json::to_value(&line).unwrap();
        assert_eq!(json["phase"], "reconnecting");
        assert_eq!(json["volume"], 80);
        assert_eq!(json["t"], 1.5);
        assert!(json.get("isLoading").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scripted_network_fault_recovers() {
        let engine = ScriptedEngine::new().with_auto_manifest(true);
        let remote = engine.remote();
        let sink = VirtualSink::new();
        let (driver, handle) =
            PlayerDriver::new(PlayerConfig::default(), engine, sink.clone()).unwrap();
        let driver_task = tokio::spawn(driver.run());

        handle
            .start(StreamDescriptor::new("7112", "A").with_fallback("B"))
            .await
            .unwrap();
        let script: FaultScript = "net@2".parse().unwrap();
        Simulation::new(
            handle.clone(),
            remote.clone(),
            sink.clone(),
            script,
            Duration::from_secs(6),
        )
        .run(CancellationToken::new())
        .await;

        assert_eq!(handle.phase(), Phase::Playing);
        assert_eq!(remote.attached_urls(), vec!["A".to_string()]);
        assert!(!sink.is_paused());

        handle.shutdown();
        driver_task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unclassified_faults_end_simulation_early() {
        let engine = ScriptedEngine::new().with_auto_manifest(true);
        let remote = engine.remote();
        let sink = VirtualSink::new();
        let (driver, handle) =
            PlayerDriver::new(PlayerConfig::default(), engine, sink.clone()).unwrap();
        let driver_task = tokio::spawn(driver.run());

        handle
            .start(StreamDescriptor::new("7112", "A").with_fallback("B"))
            .await
            .unwrap();
        let started = Instant::now();
        Simulation::new(
            handle.clone(),
            remote.clone(),
            sink,
            "other@1,other@2".parse().unwrap(),
            Duration::from_secs(60),
        )
        .run(CancellationToken::new())
        .await;

        assert_eq!(handle.phase(), Phase::FatalError);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(
            remote.attached_urls(),
            vec!["A".to_string(), "B".to_string()]
        );

        handle.shutdown();
        driver_task.await.unwrap();
    }
}
