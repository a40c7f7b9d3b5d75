//! Applies envelopes received from peers to the local player.
//!
//! The applier has no handle on the [`crate::Broadcaster`]: whatever a peer
//! tells us is applied locally and never echoed back out.

use std::time::Duration;

use syncwatch_net::Envelope;

use crate::error::SyncError;
use crate::player::Playback;
use crate::state::{SessionEvent, StallSource};

#[derive(Clone)]
pub struct RemoteApplier {
    playback: Playback,
}

impl RemoteApplier {
    pub fn new(playback: Playback) -> Self {
        Self { playback }
    }

    pub async fn apply(&self, envelope: &Envelope) -> Result<(), SyncError> {
        match envelope {
            Envelope::Pause { pause } => self.playback.set_paused(*pause).await?,
            Envelope::Position { position } => {
                self.playback.seek(nanos_to_duration(*position)).await?
            }
            Envelope::Buffering { buffering } => {
                let state = self.playback.state();
                state.set_remote_stall(*buffering);
                self.playback.events().emit(SessionEvent::Stall {
                    source: StallSource::Remote,
                    stalled: *buffering,
                });

                // Pausing through `Playback` also records the intent, so the
                // local detector does not read the forced pause as a stall of
                // its own.
                self.playback.set_paused(*buffering).await?;
            }
            Envelope::Magnet(magnet) => {
                tracing::info!(magnet = %magnet.magnet, path = %magnet.path, "Got magnet link");
            }
        }

        Ok(())
    }
}

/// Wire positions are nanoseconds as a float. Negative or non-finite values
/// become zero.
pub fn nanos_to_duration(nanos: f64) -> Duration {
    Duration::try_from_secs_f64(nanos / 1e9).unwrap_or_default()
}

pub fn duration_to_nanos(duration: Duration) -> f64 {
    duration.as_nanos() as f64
}
