//! In-process transport backed by `tokio::io::duplex` pipes.
//!
//! Used to wire sessions together inside one process, mainly in tests:
//! [`MemoryHub::connect`] creates a pipe, hands one end to whoever accepts on
//! the transport and returns the other end to the caller.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::io::DuplexStream;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::transport::{Peer, PeerIo, Transport, TransportError};

const PIPE_CAPACITY: usize = 64 * 1024;

pub struct MemoryTransport {
    node_id: String,
    peers: Mutex<mpsc::Receiver<Peer>>,
    closed: CancellationToken,
    opened: AtomicUsize,
}

/// Dialing side of a [`MemoryTransport`]
#[derive(Clone)]
pub struct MemoryHub {
    peers: mpsc::Sender<Peer>,
}

impl MemoryTransport {
    pub fn new(node_id: impl Into<String>) -> (Self, MemoryHub) {
        let (tx, rx) = mpsc::channel(16);
        let transport = Self {
            node_id: node_id.into(),
            peers: Mutex::new(rx),
            closed: CancellationToken::new(),
            opened: AtomicUsize::new(0),
        };
        (transport, MemoryHub { peers: tx })
    }

    /// How many times [`Transport::open`] was called
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

impl MemoryHub {
    /// Connect a new peer; returns the remote end of its stream, or `None`
    /// if the transport is gone
    pub async fn connect(&self, peer_id: &str) -> Option<DuplexStream> {
        let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
        self.attach(peer_id, uuid::Uuid::new_v4().to_string(), local)
            .await
            .then_some(remote)
    }

    /// Hand an existing stream to the transport as a connected peer
    pub async fn attach(&self, peer_id: &str, channel_id: String, stream: impl PeerIo) -> bool {
        let peer = Peer::new(peer_id, channel_id, stream);
        self.peers.send(peer).await.is_ok()
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    async fn open(&self) -> Result<mpsc::Receiver<String>, TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.opened.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(1);
        let _ = tx.send(self.node_id.clone()).await;
        Ok(rx)
    }

    async fn accept(&self) -> Option<Peer> {
        let mut peers = tokio::select! {
            _ = self.closed.cancelled() => return None,
            peers = self.peers.lock() => peers,
        };

        tokio::select! {
            _ = self.closed.cancelled() => None,
            peer = peers.recv() => peer,
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.cancel();
        Ok(())
    }
}
