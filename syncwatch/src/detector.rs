//! Local network stall detection.
//!
//! The player does not report buffering directly. Instead, every tick the
//! detector compares the player's `core-idle` flag with the play/pause state
//! the session asked for: idle while it should be playing (or advancing while
//! it should be paused) is taken as a stall. Entering and leaving a stall is
//! latched so each transition is broadcast exactly once.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::applier::duration_to_nanos;
use crate::broadcast::Broadcaster;
use crate::error::SyncError;
use crate::player::Playback;
use crate::state::{SessionEvent, StallSource};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// What a single tick observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub elapsed: Duration,
    pub total: Duration,
    pub paused: bool,
    pub buffering: bool,
}

pub struct BufferingDetector {
    playback: Playback,
    broadcaster: Arc<Broadcaster>,
    stalled: bool,
}

impl BufferingDetector {
    pub fn new(playback: Playback, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            playback,
            broadcaster,
            stalled: false,
        }
    }

    /// Poll the player once and broadcast a stall transition if there is one
    pub async fn tick(&mut self) -> Result<Snapshot, SyncError> {
        let player = self.playback.player();
        let state = self.playback.state();
        let events = self.playback.events();

        let total = player.duration().await?;
        state.set_total(total);
        if total > Duration::ZERO && state.mark_ready() {
            tracing::info!(total = total.as_secs_f64(), "Player is ready");
            events.emit(SessionEvent::PlayerReady { total });
        }

        let elapsed = player.elapsed().await?;
        let idle = player.core_idle().await?;

        let paused = state.intended_paused();
        let buffering = idle != paused;

        if buffering && !self.stalled {
            self.stalled = true;
            state.set_local_stall(true);
            tracing::info!(elapsed = elapsed.as_secs_f64(), "Buffering");
            events.emit(SessionEvent::Stall {
                source: StallSource::Local,
                stalled: true,
            });

            self.broadcaster.buffering(true);
            self.broadcaster.pause(true);
            self.broadcaster.position(duration_to_nanos(elapsed));
        } else if !buffering && self.stalled {
            self.stalled = false;
            state.set_local_stall(false);
            tracing::info!("Done buffering");
            events.emit(SessionEvent::Stall {
                source: StallSource::Local,
                stalled: false,
            });

            self.broadcaster.buffering(false);
            self.broadcaster.pause(false);
        }

        if !state.seeking() {
            tracing::trace!(
                total = total.as_secs_f64(),
                elapsed = elapsed.as_secs_f64(),
                remaining = total.saturating_sub(elapsed).as_secs_f64(),
                "Updating progress"
            );
            events.emit(SessionEvent::progress(elapsed, total));
        }

        Ok(Snapshot {
            elapsed,
            total,
            paused,
            buffering: self.stalled,
        })
    }

    /// Tick every `period` until cancelled. Ticks that could not reach the
    /// player are retried on the next one; any other failure ends the
    /// session.
    pub async fn run(mut self, period: Duration, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => match self.tick().await {
                    Ok(_) => {}
                    Err(SyncError::Player { source }) if source.is_connect() => {
                        tracing::warn!(error = %source, "Could not poll player");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Could not poll player");
                        self.playback.events().emit(SessionEvent::Fatal {
                            error: e.to_string(),
                        });
                        cancel.cancel();
                        break;
                    }
                },
            }
        }

        tracing::debug!("Stopped buffering detector");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::testing::FakePlayer;
    use syncwatch_mpv::MpvError;
    use crate::state::{EventSink, SessionState};
    use syncwatch_net::Envelope;

    fn detector(player: Arc<FakePlayer>) -> (BufferingDetector, Arc<Broadcaster>, Arc<SessionState>) {
        let state = Arc::new(SessionState::new());
        let (events, _rx) = EventSink::new();
        let broadcaster = Arc::new(Broadcaster::default());
        let playback = Playback::new(player, state.clone(), events);
        (
            BufferingDetector::new(playback, broadcaster.clone()),
            broadcaster,
            state,
        )
    }

    #[tokio::test]
    async fn test_stall_transitions_are_latched() {
        let player = Arc::new(FakePlayer::default());
        player.set_duration(Duration::from_secs(600));
        player.set_elapsed(Duration::from_secs(5));

        let (mut detector, broadcaster, state) = detector(player.clone());
        state.set_intended_paused(false);
        let mut subscription = broadcaster.subscribe().unwrap();

        // idle while it should be playing
        player.set_core_idle(true);
        assert!(detector.tick().await.unwrap().buffering);
        assert!(detector.tick().await.unwrap().buffering);
        assert!(state.local_stall());

        assert_eq!(
            subscription.drain(),
            vec![
                Envelope::pause(true),
                Envelope::position(5e9),
                Envelope::buffering(true),
            ]
        );

        player.set_core_idle(false);
        assert!(!detector.tick().await.unwrap().buffering);
        assert!(!detector.tick().await.unwrap().buffering);
        assert!(!state.local_stall());

        assert_eq!(
            subscription.drain(),
            vec![Envelope::pause(false), Envelope::buffering(false)]
        );
    }

    #[tokio::test]
    async fn test_idle_while_paused_is_not_a_stall() {
        let player = Arc::new(FakePlayer::default());
        player.set_core_idle(true);

        let (mut detector, broadcaster, state) = detector(player);
        assert!(state.intended_paused());

        assert!(!detector.tick().await.unwrap().buffering);
        assert_eq!(broadcaster.published(), 0);
    }

    #[tokio::test]
    async fn test_ready_once_duration_is_known() {
        let player = Arc::new(FakePlayer::default());
        player.set_core_idle(true);
        let (mut detector, _broadcaster, state) = detector(player.clone());

        detector.tick().await.unwrap();
        assert!(!state.ready());

        player.set_duration(Duration::from_secs(60));
        detector.tick().await.unwrap();
        assert!(state.ready());
        assert_eq!(state.total(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_player_errors_end_the_session() {
        let player = Arc::new(FakePlayer::default());
        player.fail_with(|| MpvError::Command {
            error: "invalid parameter".to_string(),
        });

        let (events, mut rx) = EventSink::new();
        let playback = Playback::new(player, Arc::new(SessionState::new()), events);
        let detector = BufferingDetector::new(playback, Arc::new(Broadcaster::default()));

        let cancel = CancellationToken::new();
        detector.run(DEFAULT_POLL_INTERVAL, cancel.clone()).await;

        assert!(cancel.is_cancelled());
        assert!(matches!(
            rx.recv().await,
            Some(SessionEvent::Fatal { error }) if error.contains("invalid parameter")
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_player_is_retried() {
        let player = Arc::new(FakePlayer::default());
        player.fail_with(|| MpvError::Connect {
            path: "/tmp/mpv.sock".into(),
            source: std::io::ErrorKind::ConnectionRefused.into(),
        });
        let (detector, _broadcaster, _state) = detector(player.clone());

        let cancel = CancellationToken::new();
        let task = tokio::spawn(detector.run(DEFAULT_POLL_INTERVAL, cancel.clone()));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!cancel.is_cancelled());

        player.recover();
        player.set_core_idle(true);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!cancel.is_cancelled());

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let player = Arc::new(FakePlayer::default());
        player.set_core_idle(true);
        let (detector, _broadcaster, _state) = detector(player);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(detector.run(DEFAULT_POLL_INTERVAL, cancel.clone()));
        tokio::time::sleep(Duration::from_secs(1)).await;

        cancel.cancel();
        task.await.unwrap();
    }
}
