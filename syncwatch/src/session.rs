//! A running watch session.
//!
//! Owns the broadcaster, the detector and every peer task. All of them are
//! spawned on one [`TaskTracker`] and stopped through one
//! [`CancellationToken`], so [`WatchSession::close`] tears everything down in
//! one go.

use std::sync::Arc;
use std::time::Duration;

use syncwatch_net::{Credentials, MagnetLink, Transport};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::applier::{RemoteApplier, duration_to_nanos};
use crate::broadcast::{self, Broadcaster};
use crate::detector::{self, BufferingDetector};
use crate::error::SyncError;
use crate::handshake::{HandshakeBuffer, Negotiated};
use crate::peer::{PeerContext, serve_peer};
use crate::player::{Player, Playback};
use crate::state::{EventSink, SessionState};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Detector tick
    pub poll_interval: Duration,
    /// Retry interval while the player's control socket is not up yet
    pub retry_interval: Duration,
    /// Per-peer queue length of each broadcast bus
    pub bus_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: detector::DEFAULT_POLL_INTERVAL,
            retry_interval: Duration::from_millis(100),
            bus_capacity: broadcast::DEFAULT_CAPACITY,
        }
    }
}

pub struct WatchSession {
    credentials: Credentials,
    magnet: MagnetLink,
    playback: Playback,
    broadcaster: Arc<Broadcaster>,
    transport: Arc<dyn Transport>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl WatchSession {
    /// Wait for the player, then start the detector and serve peers.
    ///
    /// `magnet` is what new peers are told about the session. When joining,
    /// the host stream from the handshake is served right away.
    pub async fn start(
        negotiated: Negotiated,
        magnet: MagnetLink,
        player: Arc<dyn Player>,
        events: EventSink,
        config: &SessionConfig,
        cancel: CancellationToken,
    ) -> Result<Self, SyncError> {
        let Negotiated {
            credentials,
            transport,
            node_ids,
            joined,
        } = negotiated;

        if let Err(e) = player.wait_ready(config.retry_interval, &cancel).await {
            if let Err(close) = transport.close().await {
                tracing::warn!(error = %close, "Could not close transport");
            }
            return Err(e.into());
        }
        tracing::debug!("Player control socket is up");

        let state = Arc::new(SessionState::new());
        let playback = Playback::new(player, state, events);
        let broadcaster = Arc::new(Broadcaster::new(config.bus_capacity));
        let tracker = TaskTracker::new();

        let ctx = PeerContext {
            broadcaster: broadcaster.clone(),
            applier: RemoteApplier::new(playback.clone()),
            playback: playback.clone(),
            magnet: magnet.clone(),
            cancel: cancel.clone(),
        };

        tracker.spawn(log_node_ids(node_ids, cancel.clone()));
        tracker.spawn(
            BufferingDetector::new(playback.clone(), broadcaster.clone())
                .run(config.poll_interval, cancel.clone()),
        );
        if let Some(joined) = joined {
            tracker.spawn(serve_peer(ctx.clone(), joined.channel, joined.buffer));
        }
        tracker.spawn(accept_loop(transport.clone(), ctx, tracker.clone()));

        Ok(Self {
            credentials,
            magnet,
            playback,
            broadcaster,
            transport,
            cancel,
            tracker,
        })
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn magnet(&self) -> &MagnetLink {
        &self.magnet
    }

    pub fn state(&self) -> &Arc<SessionState> {
        self.playback.state()
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Pause or resume locally and tell every peer.
    ///
    /// Ignored while a stall indicator is shown; returns whether it was
    /// applied.
    pub async fn set_paused(&self, paused: bool) -> Result<bool, SyncError> {
        if self.state().stalled() {
            tracing::debug!(paused, "Ignoring play/pause while buffering");
            return Ok(false);
        }

        self.broadcaster.pause(paused);
        self.playback.set_paused(paused).await?;
        Ok(true)
    }

    pub async fn toggle_paused(&self) -> Result<bool, SyncError> {
        self.set_paused(!self.state().intended_paused()).await
    }

    /// Seek locally and tell every peer. Ignored while a stall indicator is
    /// shown.
    pub async fn seek(&self, position: Duration) -> Result<bool, SyncError> {
        if self.state().stalled() {
            tracing::debug!("Ignoring seek while buffering");
            return Ok(false);
        }

        let state = self.playback.state();
        state.set_seeking(true);
        self.broadcaster.position(duration_to_nanos(position));
        let result = self.playback.seek(position).await;
        state.set_seeking(false);

        result?;
        Ok(true)
    }

    /// Resolves once the session was closed or failed
    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }

    /// Stop everything. Safe to call more than once.
    pub async fn close(&self) {
        self.cancel.cancel();
        if let Err(e) = self.transport.close().await {
            tracing::warn!(error = %e, "Could not close transport");
        }
        self.broadcaster.close();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

async fn accept_loop(transport: Arc<dyn Transport>, ctx: PeerContext, tracker: TaskTracker) {
    loop {
        let peer = tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            peer = transport.accept() => match peer {
                Some(peer) => peer,
                None => break,
            },
        };

        tracing::debug!(peer_id = %peer.peer_id, channel = %peer.channel_id, "Accepted peer");
        tracker.spawn(serve_peer(
            ctx.clone(),
            peer.into_channel(),
            HandshakeBuffer::new(),
        ));
    }
}

async fn log_node_ids(mut node_ids: mpsc::Receiver<String>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            id = node_ids.recv() => match id {
                Some(id) => tracing::info!(node_id = %id, "Connected to transport"),
                None => break,
            },
        }
    }
}
