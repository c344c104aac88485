//! Cancellable one-shot and repeating timers keyed by owner identity.
//!
//! A fired timer only delivers its [`TimerKey`]; the controller decides
//! whether the key still belongs to the current session or controls epoch.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::session::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Backoff before resuming loading after a network fault.
    Reconnect,
    /// Buffer health sample.
    BufferSample,
    /// Elapsed-time refresh.
    ElapsedTick,
    /// Auto-hide of the transport controls.
    HideControls,
}

impl TimerKind {
    /// Timers whose generation is a session id.
    pub fn is_session_scoped(&self) -> bool {
        !matches!(self, Self::HideControls)
    }
}

/// Identity of a timer: what it does and which owner generation armed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub kind: TimerKind,
    pub generation: u64,
}

impl TimerKey {
    pub fn session(kind: TimerKind, session: SessionId) -> Self {
        Self {
            kind,
            generation: session.get(),
        }
    }

    pub fn controls(epoch: u64) -> Self {
        Self {
            kind: TimerKind::HideControls,
            generation: epoch,
        }
    }

    /// Whether this key was armed by the given session.
    pub fn belongs_to(&self, session: SessionId) -> bool {
        self.kind.is_session_scoped() && self.generation == session.get()
    }
}

/// A timer to arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSpec {
    pub key: TimerKey,
    pub delay: Duration,
    /// Re-fire every `period` after the first delay.
    pub period: Option<Duration>,
}

impl TimerSpec {
    pub fn once(key: TimerKey, delay: Duration) -> Self {
        Self {
            key,
            delay,
            period: None,
        }
    }

    pub fn repeating(key: TimerKey, period: Duration) -> Self {
        Self {
            key,
            delay: period,
            period: Some(period),
        }
    }
}

/// Delivered when a timer expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub key: TimerKey,
    /// Which arming of `key` fired.
    serial: u64,
}

struct ArmedTimer {
    token: CancellationToken,
    serial: u64,
    repeating: bool,
}

/// Live timers of a driver, one cancellation token per key.
pub struct TimerRegistry {
    timers: HashMap<TimerKey, ArmedTimer>,
    fired_tx: mpsc::UnboundedSender<TimerFired>,
    next_serial: u64,
}

impl TimerRegistry {
    pub fn new(fired_tx: mpsc::UnboundedSender<TimerFired>) -> Self {
        Self {
            timers: HashMap::new(),
            fired_tx,
            next_serial: 0,
        }
    }

    /// Arm a timer. An existing timer with the same key is replaced.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(&mut self, spec: TimerSpec) {
        let token = CancellationToken::new();
        self.next_serial += 1;
        let fired = TimerFired {
            key: spec.key,
            serial: self.next_serial,
        };
        let armed = ArmedTimer {
            token: token.clone(),
            serial: fired.serial,
            repeating: spec.period.is_some(),
        };
        if let Some(previous) = self.timers.insert(spec.key, armed) {
            previous.token.cancel();
        }
        trace!(key = ?spec.key, delay_ms = spec.delay.as_millis() as u64, "Timer armed");

        let tx = self.fired_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(spec.delay) => {}
            }
            if token.is_cancelled() || tx.send(fired).is_err() {
                return;
            }

            let Some(period) = spec.period else {
                return;
            };
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if token.is_cancelled() || tx.send(fired).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    /// Acknowledge a delivery. Returns false if the timer was cancelled or
    /// re-armed after this delivery was queued.
    pub fn fired(&mut self, fired: &TimerFired) -> bool {
        let Some(armed) = self.timers.get(&fired.key) else {
            return false;
        };
        if armed.serial != fired.serial {
            return false;
        }
        if !armed.repeating {
            self.timers.remove(&fired.key);
        }
        true
    }

    pub fn cancel(&mut self, key: &TimerKey) {
        if let Some(armed) = self.timers.remove(key) {
            armed.token.cancel();
        }
    }

    /// Cancel every timer armed by a session.
    pub fn cancel_session(&mut self, session: SessionId) {
        self.timers.retain(|key, armed| {
            if key.belongs_to(session) {
                armed.token.cancel();
                false
            } else {
                true
            }
        });
    }

    pub fn cancel_all(&mut self) {
        for (_, armed) in self.timers.drain() {
            armed.token.cancel();
        }
    }

    pub fn is_armed(&self, key: &TimerKey) -> bool {
        self.timers.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (TimerRegistry, mpsc::UnboundedReceiver<TimerFired>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TimerRegistry::new(tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_shot_fires_once() {
        let (mut timers, mut rx) = registry();
        let key = TimerKey::session(TimerKind::Reconnect, SessionId::new(1));
        timers.schedule(TimerSpec::once(key, Duration::from_secs(2)));

        tokio::time::sleep(Duration::from_millis(1999)).await;
        assert!(rx.try_recv().is_err());
        tokio::time::sleep(Duration::from_millis(2)).await;
        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.key, key);
        assert!(timers.fired(&fired));
        assert!(!timers.is_armed(&key));
        assert!(!timers.fired(&fired));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeating_timer_ticks_until_cancelled() {
        let (mut timers, mut rx) = registry();
        let key = TimerKey::session(TimerKind::BufferSample, SessionId::new(3));
        timers.schedule(TimerSpec::repeating(key, Duration::from_secs(1)));

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(1001)).await;
            let fired = rx.recv().await.unwrap();
            assert_eq!(fired.key, key);
            assert!(timers.fired(&fired));
        }
        assert!(timers.is_armed(&key));

        timers.cancel_session(SessionId::new(3));
        assert!(timers.is_empty());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescheduling_replaces_pending_timer() {
        let (mut timers, mut rx) = registry();
        let key = TimerKey::controls(1);
        timers.schedule(TimerSpec::once(key, Duration::from_secs(1)));
        timers.schedule(TimerSpec::once(key, Duration::from_secs(3)));
        assert_eq!(timers.len(), 1);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(rx.try_recv().is_err());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rx.recv().await.map(|f| f.key), Some(key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_from_replaced_arming_is_rejected() {
        let (mut timers, mut rx) = registry();
        let key = TimerKey::session(TimerKind::Reconnect, SessionId::new(2));
        timers.schedule(TimerSpec::once(key, Duration::from_secs(1)));
        tokio::time::sleep(Duration::from_millis(1001)).await;
        let stale = rx.recv().await.unwrap();

        // Re-armed before the first delivery was handled.
        timers.schedule(TimerSpec::once(key, Duration::from_secs(2)));
        assert!(!timers.fired(&stale));
        assert!(timers.is_armed(&key));

        tokio::time::sleep(Duration::from_millis(2001)).await;
        let fresh = rx.recv().await.unwrap();
        assert!(timers.fired(&fresh));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_session_keeps_other_owners() {
        let (mut timers, _rx) = registry();
        let session = SessionId::new(4);
        timers.schedule(TimerSpec::once(
            TimerKey::session(TimerKind::Reconnect, session),
            Duration::from_secs(1),
        ));
        timers.schedule(TimerSpec::once(
            TimerKey::session(TimerKind::Reconnect, SessionId::new(5)),
            Duration::from_secs(1),
        ));
        // Controls epoch 4 is not session 4.
        timers.schedule(TimerSpec::once(TimerKey::controls(4), Duration::from_secs(1)));

        timers.cancel_session(session);
        assert_eq!(timers.len(), 2);
        assert!(timers.is_armed(&TimerKey::controls(4)));

        timers.cancel_all();
        assert!(timers.is_empty());
    }
}
