//! Operations the engine needs from the local media player

use std::sync::Arc;
use std::time::Duration;

use syncwatch_mpv::{MpvClient, MpvError};
use tokio_util::sync::CancellationToken;

use crate::state::{EventSink, SessionEvent, SessionState};

#[async_trait::async_trait]
pub trait Player: Send + Sync {
    /// Block until the control endpoint accepts requests, retrying every
    /// `interval`
    async fn wait_ready(
        &self,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), MpvError>;

    async fn set_paused(&self, paused: bool) -> Result<(), MpvError>;

    async fn seek(&self, position: Duration) -> Result<(), MpvError>;

    async fn elapsed(&self) -> Result<Duration, MpvError>;

    async fn duration(&self) -> Result<Duration, MpvError>;

    /// Whether the player is currently not advancing playback
    async fn core_idle(&self) -> Result<bool, MpvError>;
}

#[async_trait::async_trait]
impl Player for MpvClient {
    async fn wait_ready(
        &self,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), MpvError> {
        self.wait_until_ready(interval, cancel).await
    }

    async fn set_paused(&self, paused: bool) -> Result<(), MpvError> {
        tracing::info!(paused, "Setting playback state");
        MpvClient::set_paused(self, paused).await
    }

    async fn seek(&self, position: Duration) -> Result<(), MpvError> {
        tracing::info!(position = position.as_secs_f64(), "Seeking");
        self.seek_absolute(position).await
    }

    async fn elapsed(&self) -> Result<Duration, MpvError> {
        MpvClient::elapsed(self).await
    }

    async fn duration(&self) -> Result<Duration, MpvError> {
        MpvClient::duration(self).await
    }

    async fn core_idle(&self) -> Result<bool, MpvError> {
        MpvClient::core_idle(self).await
    }
}

/// Applies play/pause and seek to the local player and keeps the session
/// state and display in step. Never talks to peers.
#[derive(Clone)]
pub struct Playback {
    player: Arc<dyn Player>,
    state: Arc<SessionState>,
    events: EventSink,
}

impl Playback {
    pub fn new(player: Arc<dyn Player>, state: Arc<SessionState>, events: EventSink) -> Self {
        Self {
            player,
            state,
            events,
        }
    }

    pub fn player(&self) -> &Arc<dyn Player> {
        &self.player
    }

    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    pub async fn set_paused(&self, paused: bool) -> Result<(), MpvError> {
        self.state.set_intended_paused(paused);
        self.player.set_paused(paused).await?;
        self.events.emit(SessionEvent::Paused { paused });
        Ok(())
    }

    pub async fn seek(&self, position: Duration) -> Result<(), MpvError> {
        self.player.seek(position).await?;
        self.events
            .emit(SessionEvent::progress(position, self.state.total()));
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scriptable in-memory player

    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        SetPaused(bool),
        Seek(Duration),
    }

    #[derive(Debug, Default)]
    pub struct FakePlayer {
        pub calls: Mutex<Vec<Call>>,
        pub elapsed: Mutex<Duration>,
        pub duration: Mutex<Duration>,
        pub core_idle: Mutex<bool>,
        /// Every property read fails with this while set
        pub failure: Mutex<Option<fn() -> MpvError>>,
    }

    impl FakePlayer {
        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub fn set_core_idle(&self, idle: bool) {
            *self.core_idle.lock().unwrap() = idle;
        }

        pub fn set_elapsed(&self, elapsed: Duration) {
            *self.elapsed.lock().unwrap() = elapsed;
        }

        pub fn set_duration(&self, duration: Duration) {
            *self.duration.lock().unwrap() = duration;
        }

        pub fn fail_with(&self, error: fn() -> MpvError) {
            *self.failure.lock().unwrap() = Some(error);
        }

        pub fn recover(&self) {
            *self.failure.lock().unwrap() = None;
        }

        fn read<T: Copy>(&self, value: &Mutex<T>) -> Result<T, MpvError> {
            match *self.failure.lock().unwrap() {
                Some(error) => Err(error()),
                None => Ok(*value.lock().unwrap()),
            }
        }
    }

    #[async_trait::async_trait]
    impl Player for FakePlayer {
        async fn wait_ready(&self, _: Duration, _: &CancellationToken) -> Result<(), MpvError> {
            Ok(())
        }

        async fn set_paused(&self, paused: bool) -> Result<(), MpvError> {
            self.calls.lock().unwrap().push(Call::SetPaused(paused));
            Ok(())
        }

        async fn seek(&self, position: Duration) -> Result<(), MpvError> {
            self.calls.lock().unwrap().push(Call::Seek(position));
            Ok(())
        }

        async fn elapsed(&self) -> Result<Duration, MpvError> {
            self.read(&self.elapsed)
        }

        async fn duration(&self) -> Result<Duration, MpvError> {
            self.read(&self.duration)
        }

        async fn core_idle(&self) -> Result<bool, MpvError> {
            self.read(&self.core_idle)
        }
    }
}
