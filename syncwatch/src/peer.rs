//! Lifetime of one connected peer.
//!
//! Each peer gets a writer task that first sends the session snapshot
//! (`Pause(true)` followed by the magnet) and then forwards everything the
//! [`Broadcaster`] publishes, and a receive loop that replays the handshake
//! backlog before decoding the live stream and handing every envelope to the
//! [`RemoteApplier`].

use std::sync::Arc;
use std::time::Duration;

use syncwatch_net::{Envelope, MagnetLink, PeerChannel, PeerWriter};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::applier::{RemoteApplier, duration_to_nanos};
use crate::broadcast::{Broadcaster, Subscription};
use crate::handshake::HandshakeBuffer;
use crate::player::Playback;
use crate::state::SessionEvent;

const WRITER_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Everything a peer task needs, shared by all peers of a session
#[derive(Clone)]
pub struct PeerContext {
    pub broadcaster: Arc<Broadcaster>,
    pub applier: RemoteApplier,
    pub playback: Playback,
    pub magnet: MagnetLink,
    pub cancel: CancellationToken,
}

/// Serve one peer until its stream ends, it sends garbage, a player call
/// fails or the session is cancelled
pub async fn serve_peer(ctx: PeerContext, channel: PeerChannel, mut backlog: HandshakeBuffer) {
    let PeerChannel {
        peer_id,
        channel_id,
        mut reader,
        writer,
    } = channel;

    let Some(subscription) = ctx.broadcaster.subscribe() else {
        tracing::debug!(%peer_id, "Session is closing, dropping peer");
        return;
    };

    let state = ctx.playback.state();
    let connected = state.peer_joined();
    tracing::info!(%peer_id, channel = %channel_id, connected, "Peer joined");
    ctx.playback.events().emit(SessionEvent::PeerJoined {
        peer_id: peer_id.clone(),
        connected,
    });

    let peer_cancel = ctx.cancel.child_token();
    let writer_task = tokio::spawn(write_loop(
        writer,
        subscription,
        ctx.magnet.clone(),
        peer_cancel.clone(),
        peer_id.clone(),
    ));

    match ctx.playback.player().elapsed().await {
        Ok(elapsed) if elapsed > Duration::ZERO => {
            ctx.broadcaster.position(duration_to_nanos(elapsed));
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(%peer_id, error = %e, "Could not read position for new peer"),
    }

    loop {
        let envelope = match backlog.pop() {
            Some(envelope) => envelope,
            None => {
                let next = tokio::select! {
                    _ = peer_cancel.cancelled() => break,
                    next = reader.next() => next,
                };

                match next {
                    Ok(Some(envelope)) => envelope,
                    Ok(None) => {
                        tracing::debug!(%peer_id, "Peer closed its stream");
                        break;
                    }
                    Err(e) => {
                        tracing::debug!(%peer_id, error = %e, "Could not decode structure, dropping peer");
                        break;
                    }
                }
            }
        };

        tracing::debug!(%peer_id, %envelope, "Applying remote command");
        if let Err(e) = ctx.applier.apply(&envelope).await {
            tracing::error!(%peer_id, error = %e, "Could not apply remote command");
            ctx.playback.events().emit(SessionEvent::Fatal {
                error: e.to_string(),
            });
            ctx.cancel.cancel();
            break;
        }
    }

    peer_cancel.cancel();
    stop_writer(writer_task, &peer_id).await;

    let connected = state.peer_left();
    tracing::info!(%peer_id, connected, "Peer left");
    ctx.playback
        .events()
        .emit(SessionEvent::PeerLeft { peer_id, connected });
}

/// Give the cancelled writer a moment to shut its stream down, then abort it
async fn stop_writer(mut writer_task: JoinHandle<()>, peer_id: &str) {
    match tokio::time::timeout(WRITER_SHUTDOWN_GRACE, &mut writer_task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(%peer_id, error = %e, "Peer writer task failed"),
        Err(_) => {
            tracing::debug!(%peer_id, "Peer writer is stuck, aborting it");
            writer_task.abort();
        }
    }
}

async fn write_loop(
    mut writer: PeerWriter,
    mut subscription: Subscription,
    magnet: MagnetLink,
    cancel: CancellationToken,
    peer_id: String,
) {
    for envelope in [Envelope::pause(true), Envelope::Magnet(magnet)] {
        if !send(&mut writer, &envelope, &cancel, &peer_id).await {
            return;
        }
    }

    loop {
        let envelope = tokio::select! {
            _ = cancel.cancelled() => break,
            envelope = subscription.recv() => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
        };

        if !send(&mut writer, &envelope, &cancel, &peer_id).await {
            return;
        }
    }

    let _ = writer.shutdown().await;
}

/// Write one envelope; false once the peer is gone or the session is
/// cancelled. A peer that stopped reading blocks the write until then.
async fn send(
    writer: &mut PeerWriter,
    envelope: &Envelope,
    cancel: &CancellationToken,
    peer_id: &str,
) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => {
            tracing::debug!(%peer_id, "Cancelled while sending {}", envelope.kind());
            false
        }
        sent = writer.send(envelope) => match sent {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(%peer_id, error = %e, "Could not encode {}, stopping", envelope.kind());
                false
            }
        },
    }
}
